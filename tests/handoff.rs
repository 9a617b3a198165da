//! Integration tests for the handoff protocol: a real daemon thread with
//! the prefill engine, driven by real clients over a unix socket.
//!
//! The fault notifier is a plain pipe descriptor: the protocol transfers it
//! without interpreting it, and unprivileged userfaultfd is disabled on
//! many kernels.

use std::fs::{self, File};
use std::io::Write;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use nix::sys::mman::{MapFlags, ProtFlags};

use remmap::{serve, ClientManager, Error, PrefillEngine, ServerContext};

fn pipe_notifier() -> std::io::Result<OwnedFd> {
    let (read_end, write_end) = nix::unistd::pipe()
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    // Leak the write end so the read end stays a valid open descriptor.
    std::mem::forget(write_end);
    Ok(read_end)
}

/// Each test gets its own daemon and its own allocator base: all tests
/// share one address space, and fixed-address windows must not collide
/// across concurrently running tests.
fn spawn_daemon(tag: &str, base: u64) -> PathBuf {
    let sock = std::env::temp_dir().join(format!("remmap_{}_{}.sock", tag, std::process::id()));
    let _ = fs::remove_file(&sock);
    let listener = UnixListener::bind(&sock).unwrap();
    let ctx = Arc::new(ServerContext::with_base_addr(PrefillEngine, base));
    thread::spawn(move || {
        let _ = serve(ctx, listener);
    });
    sock
}

fn scratch_file(tag: &str, contents: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("remmap_data_{}_{}", tag, std::process::id()));
    let mut f = File::create(&path).unwrap();
    f.write_all(contents).unwrap();
    path
}

#[test]
fn duplicate_mapping_is_rejected() {
    let sock = spawn_daemon("dup", 0x6000_0000_0000);
    let file = scratch_file("dup", &[7u8; 8192]);
    let name = file.to_str().unwrap();

    let mut client = ClientManager::with_notifier(&sock, pipe_notifier);
    client
        .map(name, ProtFlags::PROT_READ, MapFlags::MAP_SHARED)
        .unwrap();
    assert!(client.is_mapped(name));

    let second = client.map(name, ProtFlags::PROT_READ, MapFlags::MAP_SHARED);
    assert!(matches!(second, Err(Error::AlreadyMapped(_))));
    assert_eq!(client.mapped_count(), 1);

    client.unmap(name).unwrap();
    assert_eq!(client.mapped_count(), 0);
    fs::remove_file(&file).unwrap();
}

#[test]
fn windows_do_not_overlap_and_regions_are_shared() {
    let sock = spawn_daemon("overlap", 0x6100_0000_0000);
    let files = [
        scratch_file("ov_a", &[1u8; 4096]),
        scratch_file("ov_b", &[2u8; 12000]),
        scratch_file("ov_c", &[3u8; 5000]),
    ];

    let mut client_a = ClientManager::with_notifier(&sock, pipe_notifier);
    let mut client_b = ClientManager::with_notifier(&sock, pipe_notifier);

    let name_a = files[0].to_str().unwrap();
    let name_b = files[1].to_str().unwrap();
    let name_c = files[2].to_str().unwrap();

    client_a
        .map(name_a, ProtFlags::PROT_READ, MapFlags::MAP_SHARED)
        .unwrap();
    client_a
        .map(name_b, ProtFlags::PROT_READ, MapFlags::MAP_SHARED)
        .unwrap();
    client_b
        .map(name_c, ProtFlags::PROT_READ, MapFlags::MAP_SHARED)
        .unwrap();
    // Same filename from a second connection reuses the same region.
    client_b
        .map(name_a, ProtFlags::PROT_READ, MapFlags::MAP_SHARED)
        .unwrap();

    let loc_a = client_a.session(name_a).unwrap().loc();
    let loc_b = client_a.session(name_b).unwrap().loc();
    let loc_c = client_b.session(name_c).unwrap().loc();
    let loc_a2 = client_b.session(name_a).unwrap().loc();

    assert_eq!(loc_a, loc_a2);
    let distinct = [loc_a, loc_b, loc_c];
    for (i, x) in distinct.iter().enumerate() {
        for y in &distinct[i + 1..] {
            assert!(!x.overlaps(y), "{:?} overlaps {:?}", x, y);
        }
    }

    for f in &files {
        fs::remove_file(f).unwrap();
    }
}

#[test]
fn mapped_bytes_match_backing_file() {
    let sock = spawn_daemon("fidelity", 0x6200_0000_0000);
    let contents: Vec<u8> = (0..3 * 4096 + 123).map(|i| (i * 31 + 7) as u8).collect();
    let file = scratch_file("fidelity", &contents);
    let name = file.to_str().unwrap();

    let mut client = ClientManager::with_notifier(&sock, pipe_notifier);
    let base = client
        .map(name, ProtFlags::PROT_READ, MapFlags::MAP_SHARED)
        .unwrap();
    let loc = client.session(name).unwrap().loc();
    assert_eq!(loc.size as usize, contents.len());

    let mapped = unsafe { std::slice::from_raw_parts(base.as_ptr(), contents.len()) };
    assert_eq!(mapped, &contents[..]);

    client.unmap(name).unwrap();
    fs::remove_file(&file).unwrap();
}

#[test]
fn unmap_of_unknown_filename_is_rejected() {
    let sock = spawn_daemon("unknown", 0x6300_0000_0000);
    let file = scratch_file("unknown", &[9u8; 4096]);
    let name = file.to_str().unwrap();

    let mut client = ClientManager::with_notifier(&sock, pipe_notifier);
    assert!(matches!(
        client.unmap("/no/such/mapping"),
        Err(Error::NotMapped(_))
    ));

    client
        .map(name, ProtFlags::PROT_READ, MapFlags::MAP_SHARED)
        .unwrap();
    client.unmap(name).unwrap();
    assert!(matches!(client.unmap(name), Err(Error::NotMapped(_))));
    assert_eq!(client.mapped_count(), 0);

    fs::remove_file(&file).unwrap();
}

#[test]
fn map_of_missing_file_fails_without_aborting() {
    let sock = spawn_daemon("missing", 0x6400_0000_0000);
    let mut client = ClientManager::with_notifier(&sock, pipe_notifier);

    let result = client.map(
        "/definitely/not/here",
        ProtFlags::PROT_READ,
        MapFlags::MAP_SHARED,
    );
    assert!(result.is_err());
    assert_eq!(client.mapped_count(), 0);

    // The connection recovers for subsequent mappings.
    let file = scratch_file("missing_ok", &[4u8; 4096]);
    let name = file.to_str().unwrap();
    client
        .map(name, ProtFlags::PROT_READ, MapFlags::MAP_SHARED)
        .unwrap();
    client.unmap(name).unwrap();
    fs::remove_file(&file).unwrap();
}
