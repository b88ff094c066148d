//! The result vocabulary shared by every component.
//!
//! Callers that only care about the category of a failure (the kernel-probe
//! front end, for instance) use [`Error::status`] and match on [`Status`];
//! everything inside the crate propagates the richer [`Error`].

use std::{io, path::PathBuf};

use thiserror::Error;

/// Coarse outcome of an operation.
///
/// The discriminants are stable so they can be handed across a process or
/// language boundary unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    InvalidArgument = -1,
    UnsupportedArchitecture = -2,
    NotImplemented = -3,
    Io = -4,
    BadFormat = -5,
    NoDebugData = -6,
    CacheFull = -7,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The caller broke a contract: missing buffers, zero capacity, a stale
    /// handle, a register set from a different format version.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported architecture tag {0}")]
    UnsupportedArchitecture(u16),

    /// Valid input that uses a feature this engine does not interpret, such as
    /// a DWARF expression opcode or a `textrel` pointer encoding.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("I/O error on {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("bad format: {0}")]
    BadFormat(String),

    #[error("no debug data in {}", .0.display())]
    NoDebugData(PathBuf),

    #[error("module cache is full ({0} active slots)")]
    CacheFull(usize),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

impl Error {
    pub fn status(&self) -> Status {
        match self {
            Error::InvalidArgument(_) => Status::InvalidArgument,
            Error::UnsupportedArchitecture(_) => Status::UnsupportedArchitecture,
            Error::NotImplemented(_) => Status::NotImplemented,
            Error::Io { .. } => Status::Io,
            Error::BadFormat(_) => Status::BadFormat,
            Error::NoDebugData(_) => Status::NoDebugData,
            Error::CacheFull(_) => Status::CacheFull,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn bad_format(msg: impl Into<String>) -> Self {
        Error::BadFormat(msg.into())
    }

    pub(crate) fn not_implemented(msg: impl Into<String>) -> Self {
        Error::NotImplemented(msg.into())
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }
}

impl From<&Error> for Status {
    fn from(err: &Error) -> Self {
        err.status()
    }
}

impl<T> From<&Result<T>> for Status {
    fn from(res: &Result<T>) -> Self {
        match res {
            Ok(_) => Status::Ok,
            Err(err) => err.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(Status::InvalidArgument.code(), -1);
        assert_eq!(Status::UnsupportedArchitecture.code(), -2);
        assert_eq!(Status::NotImplemented.code(), -3);
        assert_eq!(Status::CacheFull.code(), -7);
    }

    #[test]
    fn errors_map_to_their_category() {
        let err = Error::io("/nope", io::Error::from_raw_os_error(libc::ENOENT));
        assert_eq!(err.status(), Status::Io);
        assert_eq!(Error::CacheFull(16).status(), Status::CacheFull);

        let res: Result<()> = Err(Error::bad_format("truncated"));
        assert_eq!(Status::from(&res), Status::BadFormat);
        assert_eq!(Status::from(&Ok::<_, Error>(1)), Status::Ok);
    }
}
