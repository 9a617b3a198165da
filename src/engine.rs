//! Seam to the external page-fault-servicing engine.
//!
//! The daemon does not interpret page faults itself. After the handoff it
//! hands the region and the client's fault-notification descriptor to a
//! [`FaultEngine`] and keeps the returned [`Registration`] alive for as long
//! as the client holds the mapping.

use std::fs::File;
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::fs::FileExt;

use crate::server::MappedRegion;

/// Fault-servicing rights for one region, held per client connection.
/// Dropping the registration relinquishes them.
pub trait Registration: Send {}

/// Engine that services page faults for registered regions.
pub trait FaultEngine: Send + Sync {
    /// Delegates fault servicing for `region` to the engine.
    ///
    /// `notifier` is the descriptor the client created and transferred
    /// during handoff; the engine owns it for the registration's lifetime.
    fn register(
        &self,
        region: &MappedRegion,
        notifier: OwnedFd,
    ) -> io::Result<Box<dyn Registration>>;
}

/// Engine that populates the shared object with the backing file's bytes at
/// registration time, so pages are resident before the client's first
/// access. Stands in for a demand-paging engine where one is not wired up;
/// the daemon binary and the integration tests run on it.
pub struct PrefillEngine;

struct PrefillGrant {
    _notifier: OwnedFd,
}

impl Registration for PrefillGrant {}

impl FaultEngine for PrefillEngine {
    fn register(
        &self,
        region: &MappedRegion,
        notifier: OwnedFd,
    ) -> io::Result<Box<dyn Registration>> {
        let loc = region.loc();
        let shared = File::from(region.shared().try_clone_to_owned()?);

        let mut buf = vec![0u8; (1usize << 20).min(loc.size as usize)];
        let mut offset = 0u64;
        while offset < loc.size {
            let n = buf.len().min((loc.size - offset) as usize);
            region.backing().read_exact_at(&mut buf[..n], offset)?;
            shared.write_all_at(&buf[..n], offset)?;
            offset += n as u64;
        }

        Ok(Box::new(PrefillGrant { _notifier: notifier }))
    }
}
