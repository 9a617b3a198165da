//! Daemon side: region directory, address-space allocator, and the
//! per-connection service loop.
//!
//! ```text
//! accept loop ──▶ serve_connection (one thread per client)
//!                     │
//!                     ├── ServerContext.lookup_or_create ──▶ RegionDirectory
//!                     │        (mutex: directory + allocator cursor)
//!                     └── FaultEngine.register(region, notifier)
//! ```
//!
//! Regions are created once per distinct filename and live for the daemon
//! process lifetime; repeated requests reuse the same [`MappedRegion`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use nix::unistd::ftruncate;

use crate::engine::{FaultEngine, Registration};
use crate::error::Result;
use crate::fdpass;
use crate::wire::{self, ActionKind, ActionRequest, RegionLoc, ACK_OK};

/// First virtual address handed out to a region. High enough to stay clear
/// of heap, stacks, and ordinary mappings in client processes.
pub const REGION_BASE_ADDR: u64 = 0x6000_0000_0000;

const PAGE_SIZE: u64 = 4096;

/// One backing file the daemon has ever served: its descriptor, the shared
/// memory object sized to it, and the address window every client maps it
/// at. Owned exclusively by the region directory.
pub struct MappedRegion {
    backing: File,
    shared: OwnedFd,
    loc: RegionLoc,
}

impl MappedRegion {
    pub fn backing(&self) -> &File {
        &self.backing
    }

    pub fn shared(&self) -> BorrowedFd<'_> {
        self.shared.as_fd()
    }

    pub fn loc(&self) -> RegionLoc {
        self.loc
    }
}

/// Bump allocator over the shared virtual address range. The cursor only
/// advances; windows never overlap because each advance is by the full
/// page-aligned size of the window just handed out.
pub struct AddressAllocator {
    next: u64,
}

impl AddressAllocator {
    pub fn new(base: u64) -> Self {
        Self { next: base }
    }

    /// Hands out the next window. `size` is the exact region size; the
    /// cursor advances by its page-aligned round-up so every base stays
    /// page-aligned.
    pub fn alloc(&mut self, size: u64) -> RegionLoc {
        debug_assert!(size > 0);
        let base = self.next;
        self.next += (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        RegionLoc { base, size }
    }
}

struct RegionDirectory {
    regions: HashMap<String, Arc<MappedRegion>>,
    allocator: AddressAllocator,
}

/// Daemon-wide state shared by every connection thread. Constructed once in
/// main (or a test) and moved into an `Arc`; there is no ambient global.
pub struct ServerContext<E: FaultEngine> {
    directory: Mutex<RegionDirectory>,
    engine: E,
}

impl<E: FaultEngine> ServerContext<E> {
    pub fn new(engine: E) -> Self {
        Self::with_base_addr(engine, REGION_BASE_ADDR)
    }

    pub fn with_base_addr(engine: E, base: u64) -> Self {
        Self {
            directory: Mutex::new(RegionDirectory {
                regions: HashMap::new(),
                allocator: AddressAllocator::new(base),
            }),
            engine,
        }
    }

    /// Resolves `filename` to its region, creating one on first request.
    /// Directory lookup and cursor advance share one critical section, so
    /// concurrent connections cannot race a creation or overlap windows.
    fn lookup_or_create(&self, filename: &str) -> io::Result<Arc<MappedRegion>> {
        let mut dir = self.directory.lock().unwrap();
        if let Some(region) = dir.regions.get(filename) {
            return Ok(Arc::clone(region));
        }

        let backing = File::open(filename)?;
        let size = backing.metadata()?.len();
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "backing file is empty",
            ));
        }
        let shared = create_shared_object(size)?;
        let loc = dir.allocator.alloc(size);
        let region = Arc::new(MappedRegion {
            backing,
            shared,
            loc,
        });
        dir.regions.insert(filename.to_string(), Arc::clone(&region));
        log::info!(
            "created region {:#x}+{:#x} for {}",
            loc.base,
            loc.size,
            filename
        );
        Ok(region)
    }

    /// Window of an already-created region, if any.
    pub fn region_loc(&self, filename: &str) -> Option<RegionLoc> {
        self.directory
            .lock()
            .unwrap()
            .regions
            .get(filename)
            .map(|r| r.loc)
    }

    pub fn region_count(&self) -> usize {
        self.directory.lock().unwrap().regions.len()
    }
}

/// Anonymous shared memory object sized to the backing file.
fn create_shared_object(size: u64) -> io::Result<OwnedFd> {
    let raw = unsafe {
        libc::memfd_create(
            c"remmap-region".as_ptr(),
            libc::MFD_CLOEXEC,
        )
    };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    ftruncate(&fd, size as i64).map_err(|e| io::Error::from_raw_os_error(e as i32))?;
    Ok(fd)
}

/// Connection service loop: one blocking request at a time until the peer
/// closes. Fault-servicing grants are held here, per connection, keyed by
/// filename; Unmap drops the grant (deregistering) before acking.
pub fn serve_connection<E: FaultEngine>(
    ctx: &ServerContext<E>,
    mut stream: UnixStream,
) -> Result<()> {
    let mut grants: HashMap<String, Box<dyn Registration>> = HashMap::new();
    loop {
        let request: ActionRequest = match wire::read_msg(&mut stream) {
            Ok(r) => r,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let filename = request.filename()?.to_string();
        match request.kind()? {
            ActionKind::Map => {
                let region = ctx.lookup_or_create(&filename)?;

                // Window and shared-object capability, one message. The
                // directory keeps its descriptor; the client owns the copy.
                fdpass::send_fd(&stream, wire::as_bytes(&region.loc), region.shared())?;

                // Client answers with its mapped base and the notifier.
                let mut base_buf = [0u8; 8];
                let notifier = fdpass::recv_fd(&stream, &mut base_buf)?;
                let base = u64::from_ne_bytes(base_buf);
                if base != region.loc.base {
                    log::warn!(
                        "client mapped {} at {:#x}, window is {:#x}",
                        filename,
                        base,
                        region.loc.base
                    );
                }

                let grant = ctx.engine.register(&region, notifier)?;
                grants.insert(filename, grant);
                stream.write_all(&[ACK_OK])?;
            }
            ActionKind::Unmap => {
                if grants.remove(&filename).is_none() {
                    log::warn!("unmap of {}: no grant on this connection", filename);
                }
                stream.write_all(&[ACK_OK])?;
            }
        }
    }
}

/// Accepts connections forever, one service thread each.
pub fn serve<E: FaultEngine + 'static>(
    ctx: Arc<ServerContext<E>>,
    listener: UnixListener,
) -> Result<()> {
    for stream in listener.incoming() {
        let stream = stream?;
        let ctx = Arc::clone(&ctx);
        thread::spawn(move || {
            if let Err(e) = serve_connection(&ctx, stream) {
                log::error!("connection service loop failed: {}", e);
            }
        });
    }
    Ok(())
}

/// Binds the rendezvous socket and serves until process exit.
pub fn run_daemon<E: FaultEngine + 'static>(
    ctx: Arc<ServerContext<E>>,
    socket_path: &Path,
) -> Result<()> {
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    log::info!("listening on {}", socket_path.display());
    serve(ctx, listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopEngine;
    struct NoopGrant;
    impl Registration for NoopGrant {}
    impl FaultEngine for NoopEngine {
        fn register(
            &self,
            _region: &MappedRegion,
            _notifier: OwnedFd,
        ) -> io::Result<Box<dyn Registration>> {
            Ok(Box::new(NoopGrant))
        }
    }

    fn scratch_file(tag: &str, len: usize) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("remmap_srv_{}_{}", tag, std::process::id()));
        let mut f = File::create(&path).unwrap();
        f.write_all(&vec![0x5au8; len]).unwrap();
        path
    }

    #[test]
    fn allocator_windows_never_overlap() {
        let mut alloc = AddressAllocator::new(REGION_BASE_ADDR);
        let sizes = [1u64, 4096, 4097, 1 << 20, 123];
        let locs: Vec<RegionLoc> = sizes.iter().map(|&s| alloc.alloc(s)).collect();
        for (i, a) in locs.iter().enumerate() {
            assert_eq!(a.base % PAGE_SIZE, 0, "window base must stay page-aligned");
            for b in &locs[i + 1..] {
                assert!(!a.overlaps(b), "{:?} overlaps {:?}", a, b);
            }
        }
    }

    #[test]
    fn region_creation_is_idempotent() {
        let path = scratch_file("idem", 8192);
        let name = path.to_str().unwrap();
        let ctx = ServerContext::new(NoopEngine);

        let first = ctx.lookup_or_create(name).unwrap();
        let second = ctx.lookup_or_create(name).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.loc(), second.loc());
        assert_eq!(ctx.region_count(), 1);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn empty_backing_file_rejected() {
        let path = scratch_file("empty", 0);
        let ctx = ServerContext::new(NoopEngine);
        assert!(ctx.lookup_or_create(path.to_str().unwrap()).is_err());
        assert_eq!(ctx.region_count(), 0);
        std::fs::remove_file(&path).unwrap();
    }
}
