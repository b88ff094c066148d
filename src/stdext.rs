//! Small helpers around raw libc calls.

use std::io;

pub(crate) trait IsMinusOne {
    fn is_minus_one(&self) -> bool;
}

macro_rules! impl_is_minus_one {
    ($($t:ty)*) => {
        $(impl IsMinusOne for $t {
            fn is_minus_one(&self) -> bool {
                *self == -1
            }
        })*
    };
}

impl_is_minus_one! { i32 i64 isize }

/// Turn a libc `-1` return into the `io::Error` for `errno`.
pub(crate) fn cvt<T: IsMinusOne>(t: T) -> io::Result<T> {
    if t.is_minus_one() {
        Err(io::Error::last_os_error())
    } else {
        Ok(t)
    }
}

/// Like [`cvt`], calling `f` again for as long as it fails with `EINTR`.
pub(crate) fn cvt_r<T: IsMinusOne>(mut f: impl FnMut() -> T) -> io::Result<T> {
    loop {
        match cvt(f()) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cvt_reports_errno() {
        assert_eq!(cvt(3i32).unwrap(), 3);

        // SAFETY: closing an invalid descriptor only sets errno.
        let err = cvt(unsafe { libc::close(-1) }).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn cvt_r_retries_interrupted_calls() {
        let mut calls = 0;
        let result = cvt_r(|| {
            calls += 1;
            if calls < 3 {
                // SAFETY: errno is thread local and writable.
                unsafe { *libc::__errno_location() = libc::EINTR };
                -1i32
            } else {
                7
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 3);
    }
}
