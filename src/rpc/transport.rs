//! Blocking request/response transport with adjacent bulk transfer.
//!
//! Every operation sends one fixed [`RpcHeader`] and waits for one
//! [`RpcReply`] on a persistent per-server connection; the calling thread
//! blocks until the response arrives or the transport fails. Bulk data for
//! Read and Write rides adjacent to the exchange, moving directly between
//! the stream and the caller's buffer with no staging copy through the
//! request message.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};

use crate::error::{Error, Result};
use crate::rpc::message::{ResponseCode, RpcHeader, RpcOp, RpcReply};
use crate::wire;

/// Small integer key into the server-address pool.
pub type ServerId = u32;

/// The single well-known server. The pool is keyed so more can be added.
pub const PRIMARY_SERVER: ServerId = 0;

pub struct RpcTransport {
    servers: HashMap<ServerId, SocketAddr>,
    conns: HashMap<ServerId, TcpStream>,
    finalized: bool,
}

impl RpcTransport {
    /// Creates a transport whose pool holds `addr` as the primary server.
    pub fn new<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let mut transport = Self {
            servers: HashMap::new(),
            conns: HashMap::new(),
            finalized: false,
        };
        transport.add_server(PRIMARY_SERVER, addr)?;
        Ok(transport)
    }

    /// Registers another server address under `id`.
    pub fn add_server<A: ToSocketAddrs>(&mut self, id: ServerId, addr: A) -> Result<()> {
        let resolved = addr.to_socket_addrs()?.next().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "server address did not resolve",
            ))
        })?;
        self.servers.insert(id, resolved);
        Ok(())
    }

    /// Claims object `id` of `size` bytes on the server.
    pub fn request(&mut self, server: ServerId, id: &str, size: u64) -> Result<ResponseCode> {
        let header = RpcHeader::new(RpcOp::Request, id, size, 0)?;
        let stream = self.conn(server)?;
        wire::write_msg(stream, &header)?;
        recv_code(stream)
    }

    /// Releases the claim on `id`.
    pub fn release(&mut self, server: ServerId, id: &str) -> Result<ResponseCode> {
        let header = RpcHeader::new(RpcOp::Release, id, 0, 0)?;
        let stream = self.conn(server)?;
        wire::write_msg(stream, &header)?;
        recv_code(stream)
    }

    /// Reads `buf.len()` bytes of `id` at `offset`. On `ReadDone` the bulk
    /// payload has been received directly into `buf`.
    pub fn read(
        &mut self,
        server: ServerId,
        id: &str,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<ResponseCode> {
        let header = RpcHeader::new(RpcOp::Read, id, buf.len() as u64, offset)?;
        let stream = self.conn(server)?;
        wire::write_msg(stream, &header)?;
        let code = recv_code(stream)?;
        if code == ResponseCode::ReadDone {
            stream.read_exact(buf)?;
        }
        Ok(code)
    }

    /// Writes `buf` into `id` at `offset`; the bulk bytes follow the header
    /// straight from the caller's buffer.
    pub fn write(
        &mut self,
        server: ServerId,
        id: &str,
        buf: &[u8],
        offset: u64,
    ) -> Result<ResponseCode> {
        let header = RpcHeader::new(RpcOp::Write, id, buf.len() as u64, offset)?;
        let stream = self.conn(server)?;
        wire::write_msg(stream, &header)?;
        stream.write_all(buf)?;
        recv_code(stream)
    }

    /// Shuts down and drops every connection. Idempotent; the directory
    /// calls this when its last object is released.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        for stream in self.conns.values() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.conns.clear();
        self.finalized = true;
        log::info!("rpc transport finalized");
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn conn(&mut self, server: ServerId) -> Result<&mut TcpStream> {
        if self.finalized {
            return Err(Error::TransportClosed);
        }
        match self.conns.entry(server) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(v) => {
                let addr = self
                    .servers
                    .get(&server)
                    .ok_or(Error::NoSuchServer(server))?;
                let stream = TcpStream::connect(addr)?;
                Ok(v.insert(stream))
            }
        }
    }
}

fn recv_code(stream: &mut TcpStream) -> Result<ResponseCode> {
    let reply: RpcReply = wire::read_msg(stream)?;
    Ok(ResponseCode::from_u32(reply.code))
}
