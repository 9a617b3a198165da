//! Client side: per-filename mapping registry and the handoff session.
//!
//! `ClientManager` keeps one persistent connection to the daemon (opened
//! lazily, reused across filenames for the process lifetime) and one
//! [`SessionHandle`] per mapped filename. The handoff itself runs inline on
//! the calling thread:
//!
//! 1. send `ActionRequest{Map, filename}`, create the fault notifier
//! 2. receive the region window plus the shared-object descriptor and map
//!    it at exactly the given base (both sides must agree on the address)
//! 3. transfer the notifier back, wait for the one-byte ack; the daemon now
//!    owns fault servicing for the range

use std::collections::HashMap;
use std::ffi::c_void;
use std::io;
use std::mem::size_of;
use std::num::NonZeroUsize;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

use crate::error::{Error, Result};
use crate::fdpass;
use crate::uffd;
use crate::wire::{self, ActionKind, ActionRequest, RegionLoc, ACK_OK};

/// Factory for the fault-notification descriptor sent during handoff.
///
/// Defaults to [`uffd::create_notifier`]; tests substitute a plain pipe
/// since the protocol moves the descriptor without interpreting it.
pub type NotifierFactory = fn() -> io::Result<OwnedFd>;

/// A completed handoff for one filename. Holds the client's copy of the
/// shared-object descriptor and the agreed window; the fault notifier was
/// transferred to the daemon and is no longer ours.
pub struct SessionHandle {
    filename: String,
    shared: OwnedFd,
    base: NonNull<u8>,
    loc: RegionLoc,
}

impl SessionHandle {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn loc(&self) -> RegionLoc {
        self.loc
    }
}

/// Per-process registry of mapped filenames.
pub struct ClientManager {
    server_path: PathBuf,
    conn: Option<UnixStream>,
    sessions: HashMap<String, SessionHandle>,
    notifier: NotifierFactory,
}

impl ClientManager {
    pub fn new<P: AsRef<Path>>(server_path: P) -> Self {
        Self::with_notifier(server_path, uffd::create_notifier)
    }

    pub fn with_notifier<P: AsRef<Path>>(server_path: P, notifier: NotifierFactory) -> Self {
        Self {
            server_path: server_path.as_ref().to_path_buf(),
            conn: None,
            sessions: HashMap::new(),
            notifier,
        }
    }

    /// Maps `filename` through the daemon and returns the base address the
    /// server's allocator chose. A filename mapped twice is rejected, not
    /// merged.
    pub fn map(&mut self, filename: &str, prot: ProtFlags, flags: MapFlags) -> Result<NonNull<u8>> {
        if self.sessions.contains_key(filename) {
            log::error!("{} is already mapped for this process", filename);
            return Err(Error::AlreadyMapped(filename.to_string()));
        }
        let factory = self.notifier;
        let stream = self.connection()?;
        match establish(stream, filename, prot, flags, factory) {
            Ok(handle) => {
                let base = handle.base();
                self.sessions.insert(filename.to_string(), handle);
                Ok(base)
            }
            Err(e) => {
                // A failure mid-handoff leaves the shared connection at an
                // unknown protocol position; drop it so the next map
                // reconnects cleanly.
                log::error!("handoff for {} failed: {}", filename, e);
                self.conn = None;
                Err(e)
            }
        }
    }

    /// Unmaps `filename`: drops the local view, then runs the teardown
    /// exchange. Unknown filenames are a logged no-op on the daemon side
    /// and an error here.
    pub fn unmap(&mut self, filename: &str) -> Result<()> {
        let Some(handle) = self.sessions.remove(filename) else {
            log::error!("no mapping for {}", filename);
            return Err(Error::NotMapped(filename.to_string()));
        };
        unsafe {
            munmap(handle.base.cast::<c_void>(), handle.loc.size as usize)?;
        }
        let request = ActionRequest::new(ActionKind::Unmap, filename)?;
        let stream = self.connection()?;
        wire::write_msg(stream, &request)?;
        await_ack(stream)
        // handle drops here, closing the shared-object descriptor
    }

    pub fn is_mapped(&self, filename: &str) -> bool {
        self.sessions.contains_key(filename)
    }

    pub fn mapped_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, filename: &str) -> Option<&SessionHandle> {
        self.sessions.get(filename)
    }

    fn connection(&mut self) -> Result<&mut UnixStream> {
        let stream = match self.conn.take() {
            Some(s) => s,
            None => UnixStream::connect(&self.server_path).map_err(|e| {
                log::error!(
                    "unable to reach daemon at {}: {}",
                    self.server_path.display(),
                    e
                );
                e
            })?,
        };
        Ok(self.conn.insert(stream))
    }
}

/// Runs the map handoff against one connection service loop.
fn establish(
    stream: &mut UnixStream,
    filename: &str,
    prot: ProtFlags,
    flags: MapFlags,
    notifier_factory: NotifierFactory,
) -> Result<SessionHandle> {
    let request = ActionRequest::new(ActionKind::Map, filename)?;
    wire::write_msg(stream, &request)?;
    let notifier = notifier_factory()?;

    let mut loc_buf = [0u8; size_of::<RegionLoc>()];
    let shared = fdpass::recv_fd(stream, &mut loc_buf)?;
    let loc: RegionLoc = wire::read_msg(&mut &loc_buf[..])?;
    let addr = NonZeroUsize::new(loc.base as usize)
        .ok_or(Error::Protocol("server sent a null region base"))?;
    let len = NonZeroUsize::new(loc.size as usize)
        .ok_or(Error::Protocol("server sent an empty region"))?;

    // Fixed placement: both sides address the region by the same base, so
    // the kernel must not relocate it.
    let base = unsafe {
        mmap(
            Some(addr),
            len,
            prot,
            flags | MapFlags::MAP_SHARED | MapFlags::MAP_FIXED,
            &shared,
            0,
        )?
    };
    let base = base.cast::<u8>();

    // The notifier crosses over here; ownership transfers with the ack and
    // our copy closes inside transfer_fd.
    let base_bytes = (base.as_ptr() as u64).to_ne_bytes();
    fdpass::transfer_fd(stream, &base_bytes, notifier)?;
    await_ack(stream)?;

    Ok(SessionHandle {
        filename: filename.to_string(),
        shared,
        base,
        loc,
    })
}

fn await_ack(stream: &mut UnixStream) -> Result<()> {
    let status: u8 = wire::read_msg(stream)?;
    if status != ACK_OK {
        return Err(Error::Protocol("nonzero status acknowledgment"));
    }
    Ok(())
}
