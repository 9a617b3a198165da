//! Wire messages of the object directory protocol.

use crate::error::{Error, Result};
use crate::wire::Wire;

/// Maximum object identifier length, including the terminating NUL.
pub const ID_LEN: usize = 64;

/// Operation selector of an [`RpcHeader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcOp {
    Request,
    Release,
    Read,
    Write,
}

const OP_REQUEST: u32 = 0;
const OP_RELEASE: u32 = 1;
const OP_READ: u32 = 2;
const OP_WRITE: u32 = 3;

/// Fixed request header. Read and Write are followed on the stream by
/// `size` bulk bytes (after the reply for Read, before it for Write).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RpcHeader {
    op: u32,
    _pad: u32,
    pub size: u64,
    pub offset: u64,
    id: [u8; ID_LEN],
}

unsafe impl Wire for RpcHeader {}

impl RpcHeader {
    pub fn new(op: RpcOp, id: &str, size: u64, offset: u64) -> Result<Self> {
        let bytes = id.as_bytes();
        if bytes.len() >= ID_LEN {
            return Err(Error::NameTooLong(bytes.len()));
        }
        let mut id_buf = [0u8; ID_LEN];
        id_buf[..bytes.len()].copy_from_slice(bytes);
        let op = match op {
            RpcOp::Request => OP_REQUEST,
            RpcOp::Release => OP_RELEASE,
            RpcOp::Read => OP_READ,
            RpcOp::Write => OP_WRITE,
        };
        Ok(Self {
            op,
            _pad: 0,
            size,
            offset,
            id: id_buf,
        })
    }

    pub fn op(&self) -> Result<RpcOp> {
        match self.op {
            OP_REQUEST => Ok(RpcOp::Request),
            OP_RELEASE => Ok(RpcOp::Release),
            OP_READ => Ok(RpcOp::Read),
            OP_WRITE => Ok(RpcOp::Write),
            _ => Err(Error::Protocol("unknown rpc operation code")),
        }
    }

    pub fn id(&self) -> Result<&str> {
        let end = self.id.iter().position(|&b| b == 0).unwrap_or(ID_LEN);
        std::str::from_utf8(&self.id[..end])
            .map_err(|_| Error::Protocol("object id is not valid UTF-8"))
    }
}

/// Fixed response carrying one [`ResponseCode`].
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RpcReply {
    pub code: u32,
}

unsafe impl Wire for RpcReply {}

/// Response codes of the directory protocol.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Unrecognized = 0,
    Available = 1,
    Unavailable = 2,
    WrongSize = 3,
    ReadDone = 4,
    WriteDone = 5,
    ReleaseOk = 6,
}

impl ResponseCode {
    /// Unknown raw codes decode as `Unrecognized`, which every caller
    /// treats as a failure.
    pub fn from_u32(raw: u32) -> ResponseCode {
        match raw {
            1 => ResponseCode::Available,
            2 => ResponseCode::Unavailable,
            3 => ResponseCode::WrongSize,
            4 => ResponseCode::ReadDone,
            5 => ResponseCode::WriteDone,
            6 => ResponseCode::ReleaseOk,
            _ => ResponseCode::Unrecognized,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResponseCode::Unrecognized => "Unrecognized",
            ResponseCode::Available => "Available",
            ResponseCode::Unavailable => "Unavailable",
            ResponseCode::WrongSize => "WrongSize",
            ResponseCode::ReadDone => "ReadDone",
            ResponseCode::WriteDone => "WriteDone",
            ResponseCode::ReleaseOk => "ReleaseOk",
        };
        f.write_str(name)
    }
}
