//! Descriptor passing over the handoff connection.
//!
//! The handoff protocol moves two capabilities between client and server as
//! SCM_RIGHTS ancillary data riding alongside a fixed-layout payload: the
//! shared-memory-object descriptor (server to client) and the
//! fault-notification descriptor (client to server).
//!
//! Ownership is explicit at the type level. [`send_fd`] borrows, for a
//! sender that keeps serving the descriptor to other peers. [`transfer_fd`]
//! consumes an [`OwnedFd`]: once the kernel has duplicated the descriptor
//! into the message the sender's copy is closed, and use-after-transfer is
//! a compile error.

use std::io::{self, IoSlice, IoSliceMut, Read};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::cmsg_space;
use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};

fn nix_err(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

/// Sends `payload` with a borrowed descriptor attached. The sender keeps
/// its copy.
pub fn send_fd<F: AsFd>(sock: &UnixStream, payload: &[u8], fd: F) -> io::Result<()> {
    let raw = [fd.as_fd().as_raw_fd()];
    let iov = [IoSlice::new(payload)];
    let cmsg = [ControlMessage::ScmRights(&raw)];
    let sent = sendmsg::<()>(sock.as_raw_fd(), &iov, &cmsg, MsgFlags::empty(), None)
        .map_err(nix_err)?;
    if sent != payload.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            "short sendmsg with attached descriptor",
        ));
    }
    Ok(())
}

/// Sends `payload` and transfers ownership of the descriptor to the peer.
/// The local copy is closed before this returns.
pub fn transfer_fd(sock: &UnixStream, payload: &[u8], fd: OwnedFd) -> io::Result<()> {
    send_fd(sock, payload, &fd)
    // fd drops here: the peer's copy is now the only one.
}

/// Receives exactly `payload.len()` bytes and one attached descriptor.
pub fn recv_fd(sock: &UnixStream, payload: &mut [u8]) -> io::Result<OwnedFd> {
    let mut cmsg_buf = cmsg_space!([RawFd; 1]);
    let received;
    let mut fd = None;
    {
        let mut iov = [IoSliceMut::new(payload)];
        let msg = recvmsg::<()>(
            sock.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buf),
            MsgFlags::empty(),
        )
        .map_err(nix_err)?;
        received = msg.bytes;
        for cmsg in msg.cmsgs().map_err(nix_err)? {
            if let ControlMessageOwned::ScmRights(fds) = cmsg {
                if let Some(&raw) = fds.first() {
                    fd = Some(unsafe { OwnedFd::from_raw_fd(raw) });
                }
            }
        }
    }
    if received == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer closed during descriptor exchange",
        ));
    }
    // The descriptor rides with the first byte; any payload remainder
    // follows as plain stream data.
    if received < payload.len() {
        let mut rest = sock;
        rest.read_exact(&mut payload[received..])?;
    }
    fd.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            "message carried no descriptor",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Seek, SeekFrom, Write};

    #[test]
    fn descriptor_and_payload_cross_socketpair() {
        let (a, b) = UnixStream::pair().unwrap();

        let path = std::env::temp_dir().join(format!("remmap_fdpass_{}", std::process::id()));
        let mut file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.write_all(b"carried").unwrap();

        let payload = [0xabu8; 24];
        send_fd(&a, &payload, &file).unwrap();

        let mut got = [0u8; 24];
        let fd = recv_fd(&b, &mut got).unwrap();
        assert_eq!(got, payload);

        // The received descriptor refers to the same open file description.
        let mut received = File::from(fd);
        received.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = String::new();
        received.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "carried");

        std::fs::remove_file(&path).unwrap();
    }
}
