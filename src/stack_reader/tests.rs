use super::*;
use crate::status::Status;
use crate::testutil::init_tracing;

/// A session on this very process. Nothing is ptrace-attached, so it is
/// marked detached again before it drops.
fn own_session(backend: Backend) -> Session {
    Session {
        pid: std::process::id() as i32,
        tid: std::process::id() as i32,
        backend,
        mem: None,
        attached: true,
    }
}

fn forget(mut session: Session) {
    session.attached = false;
}

#[test]
fn attach_validates_arguments() {
    let reader = StackReader::new(true);
    for pid in [0, -1] {
        let err = reader.attach(pid, 1).unwrap_err();
        assert_eq!(err.status(), Status::InvalidArgument);
    }

    let err = StackReader::new(false)
        .attach(std::process::id() as i32, 0)
        .unwrap_err();
    assert_eq!(err.status(), Status::InvalidArgument);
}

#[test]
fn attach_to_a_missing_process_is_io() {
    init_tracing();
    // Above the kernel's PID_MAX_LIMIT, so never a live process.
    let err = StackReader::new(true).attach(0x7fff_fff0, 0).unwrap_err();
    assert_eq!(err.status(), Status::Io);
}

#[test]
fn reads_own_memory() {
    let value = 0x1122_3344_5566_7788u64;
    let address = &value as *const u64 as u64;

    for backend in [Backend::ProcessVm, Backend::ProcMem] {
        let mut session = own_session(backend);
        assert_eq!(session.read_u64(address).unwrap(), value);

        let mut half = [0; 4];
        session.read(address, &mut half).unwrap();
        assert_eq!(half, 0x5566_7788u32.to_le_bytes());
        forget(session);
    }
}

#[test]
fn unreadable_addresses_switch_to_proc_mem() {
    init_tracing();
    let mut session = own_session(Backend::ProcessVm);

    let err = session.read(0, &mut [0; 8]).unwrap_err();
    assert_eq!(err.status(), Status::Io);
    assert_eq!(session.backend(), Backend::ProcMem);
    assert!(session.mem.is_some());

    // The switch is permanent.
    let value = 42u64;
    assert_eq!(session.read_u64(&value as *const u64 as u64).unwrap(), 42);
    assert_eq!(session.backend(), Backend::ProcMem);
    forget(session);
}

#[test]
fn zero_length_and_detached_reads_are_invalid() {
    let mut session = own_session(Backend::ProcessVm);
    let err = session.read(0x1000, &mut []).unwrap_err();
    assert_eq!(err.status(), Status::InvalidArgument);

    session.attached = false;
    session.detach();
    assert!(!session.is_attached());
    let err = session.read(0x1000, &mut [0; 8]).unwrap_err();
    assert_eq!(err.status(), Status::InvalidArgument);
}

#[test]
fn only_unavailable_calls_fall_back() {
    for errno in [libc::ENOSYS, libc::EPERM, libc::ESRCH, libc::EFAULT] {
        assert!(wants_fallback(errno), "errno {errno}");
    }
    for errno in [libc::EINVAL, libc::ENOMEM, libc::EIO, libc::EAGAIN, libc::EINTR, 0] {
        assert!(!wants_fallback(errno), "errno {errno}");
    }
}
