//! Fixed-layout wire messages for the handoff protocol.
//!
//! Every message is a `#[repr(C)]` `Copy` struct of fixed-width integers and
//! byte arrays, moved over the stream as raw bytes. Rust enums never cross
//! the wire directly; action and response codes travel as integers and are
//! validated on decode.

use std::io::{Read, Write};
use std::mem::{size_of, MaybeUninit};
use std::{io, slice};

use crate::error::{Error, Result};

/// Marker trait for types transmittable as raw bytes.
///
/// # Safety
/// Implementors must be `Copy`, `#[repr(C)]`, and valid for every bit
/// pattern (no niches, no padding-sensitive invariants).
pub unsafe trait Wire: Copy {}

unsafe impl Wire for u8 {}
unsafe impl Wire for u32 {}
unsafe impl Wire for u64 {}

/// Maximum filename length carried in an [`ActionRequest`], including the
/// terminating NUL.
pub const NAME_LEN: usize = 128;

/// One-byte acknowledgment sent by the server after a completed action.
pub const ACK_OK: u8 = 0;

/// Action selector of an [`ActionRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Map,
    Unmap,
}

const ACTION_MAP: u32 = 0;
const ACTION_UNMAP: u32 = 1;

/// Client-to-server request initiating a map or unmap exchange.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ActionRequest {
    action: u32,
    name: [u8; NAME_LEN],
}

unsafe impl Wire for ActionRequest {}

impl ActionRequest {
    pub fn new(kind: ActionKind, filename: &str) -> Result<Self> {
        let bytes = filename.as_bytes();
        if bytes.len() >= NAME_LEN {
            return Err(Error::NameTooLong(bytes.len()));
        }
        let mut name = [0u8; NAME_LEN];
        name[..bytes.len()].copy_from_slice(bytes);
        let action = match kind {
            ActionKind::Map => ACTION_MAP,
            ActionKind::Unmap => ACTION_UNMAP,
        };
        Ok(Self { action, name })
    }

    pub fn kind(&self) -> Result<ActionKind> {
        match self.action {
            ACTION_MAP => Ok(ActionKind::Map),
            ACTION_UNMAP => Ok(ActionKind::Unmap),
            _ => Err(Error::Protocol("unknown action code")),
        }
    }

    /// Filename up to the first NUL.
    pub fn filename(&self) -> Result<&str> {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        std::str::from_utf8(&self.name[..end])
            .map_err(|_| Error::Protocol("filename is not valid UTF-8"))
    }
}

/// A contiguous virtual address window: one region, one shared object.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLoc {
    pub base: u64,
    pub size: u64,
}

unsafe impl Wire for RegionLoc {}

impl RegionLoc {
    pub fn overlaps(&self, other: &RegionLoc) -> bool {
        self.base < other.base + other.size && other.base < self.base + self.size
    }
}

pub fn as_bytes<T: Wire>(value: &T) -> &[u8] {
    unsafe { slice::from_raw_parts(value as *const T as *const u8, size_of::<T>()) }
}

pub fn write_msg<T: Wire, W: Write>(stream: &mut W, value: &T) -> io::Result<()> {
    stream.write_all(as_bytes(value))
}

pub fn read_msg<T: Wire, R: Read>(stream: &mut R) -> io::Result<T> {
    let mut value = MaybeUninit::<T>::uninit();
    let buf =
        unsafe { slice::from_raw_parts_mut(value.as_mut_ptr() as *mut u8, size_of::<T>()) };
    stream.read_exact(buf)?;
    Ok(unsafe { value.assume_init() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_request_round_trip() {
        let req = ActionRequest::new(ActionKind::Map, "/data/file.bin").unwrap();
        let mut buf = Vec::new();
        write_msg(&mut buf, &req).unwrap();
        assert_eq!(buf.len(), size_of::<ActionRequest>());

        let decoded: ActionRequest = read_msg(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded.kind().unwrap(), ActionKind::Map);
        assert_eq!(decoded.filename().unwrap(), "/data/file.bin");
    }

    #[test]
    fn name_too_long_rejected() {
        let long = "x".repeat(NAME_LEN);
        assert!(matches!(
            ActionRequest::new(ActionKind::Unmap, &long),
            Err(Error::NameTooLong(_))
        ));
    }

    #[test]
    fn unknown_action_code_rejected() {
        let mut req = ActionRequest::new(ActionKind::Map, "f").unwrap();
        req.action = 7;
        assert!(req.kind().is_err());
    }

    #[test]
    fn region_overlap() {
        let a = RegionLoc { base: 0x1000, size: 0x1000 };
        let b = RegionLoc { base: 0x2000, size: 0x1000 };
        let c = RegionLoc { base: 0x1800, size: 0x100 };
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&a));
    }
}
