//! Fault-notification descriptor creation.
//!
//! The client side of the handoff protocol hands the daemon a userfaultfd
//! so the external fault-servicing engine can intercept page faults in the
//! mapped window. Creation performs the mandatory UFFDIO_API handshake
//! before the descriptor is usable.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

const UFFD_API: u64 = 0xAA;

#[repr(C)]
struct UffdioApi {
    api: u64,
    features: u64,
    ioctls: u64,
}

// UFFDIO_API = _IOWR(0xAA, 0x3F, struct uffdio_api)
nix::ioctl_readwrite!(uffdio_api, 0xAA, 0x3F, UffdioApi);

/// Creates a userfaultfd and completes the API handshake.
///
/// The descriptor is close-on-exec and nonblocking; the caller transfers it
/// to the daemon during handoff and must not retain a copy afterwards.
pub fn create_notifier() -> io::Result<OwnedFd> {
    let raw = unsafe {
        libc::syscall(
            libc::SYS_userfaultfd,
            libc::O_CLOEXEC | libc::O_NONBLOCK,
        )
    };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw as RawFd) };

    let mut api = UffdioApi {
        api: UFFD_API,
        features: 0,
        ioctls: 0,
    };
    unsafe { uffdio_api(fd.as_raw_fd(), &mut api) }
        .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
    Ok(fd)
}
