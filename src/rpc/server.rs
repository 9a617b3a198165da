//! Server-side object store answering the directory protocol.
//!
//! Published objects are named, fixed-size byte buffers. Each accepted
//! connection gets its own service thread running the blocking
//! header/reply loop; requests on one connection are strictly sequential.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::error::Result;
use crate::rpc::message::{ResponseCode, RpcHeader, RpcOp, RpcReply};
use crate::wire;

/// Upper bound on a single bulk payload; larger headers are treated as a
/// framing error and close the connection.
const MAX_BULK: u64 = 1 << 30;

struct ServedObject {
    data: Vec<u8>,
}

/// Named memory objects served to remote clients.
pub struct RpcServer {
    objects: Mutex<HashMap<String, ServedObject>>,
}

impl RpcServer {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Publishes a zero-filled object of `size` bytes under `id`.
    pub fn publish(&self, id: &str, size: u64) {
        let mut objects = self.objects.lock().unwrap();
        objects.insert(
            id.to_string(),
            ServedObject {
                data: vec![0u8; size as usize],
            },
        );
        log::info!("published {} ({} bytes)", id, size);
    }

    /// Accepts connections forever, one service thread each.
    pub fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        for stream in listener.incoming() {
            let stream = stream?;
            let server = Arc::clone(&self);
            thread::spawn(move || {
                if let Err(e) = server.serve_connection(stream) {
                    log::error!("rpc connection failed: {}", e);
                }
            });
        }
        Ok(())
    }

    fn serve_connection(&self, mut stream: TcpStream) -> io::Result<()> {
        loop {
            let header: RpcHeader = match wire::read_msg(&mut stream) {
                Ok(h) => h,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            };
            let (op, id) = match (header.op(), header.id()) {
                (Ok(op), Ok(id)) => (op, id.to_string()),
                _ => {
                    // Framing is unknowable for a malformed header on
                    // anything but the code-only ops; answer and move on.
                    reply(&mut stream, ResponseCode::Unrecognized)?;
                    continue;
                }
            };
            match op {
                RpcOp::Request => {
                    let code = {
                        let objects = self.objects.lock().unwrap();
                        match objects.get(&id) {
                            None => ResponseCode::Unavailable,
                            Some(o) if o.data.len() as u64 != header.size => {
                                ResponseCode::WrongSize
                            }
                            Some(_) => ResponseCode::Available,
                        }
                    };
                    reply(&mut stream, code)?;
                }
                RpcOp::Release => {
                    let code = if self.objects.lock().unwrap().remove(&id).is_some() {
                        ResponseCode::ReleaseOk
                    } else {
                        ResponseCode::Unrecognized
                    };
                    reply(&mut stream, code)?;
                }
                RpcOp::Read => {
                    let mut payload = Vec::new();
                    let code = {
                        let objects = self.objects.lock().unwrap();
                        match objects.get(&id) {
                            Some(o) => match slice_range(&o.data, &header) {
                                Some(range) => {
                                    payload.extend_from_slice(range);
                                    ResponseCode::ReadDone
                                }
                                None => ResponseCode::WrongSize,
                            },
                            None => ResponseCode::Unavailable,
                        }
                    };
                    reply(&mut stream, code)?;
                    if code == ResponseCode::ReadDone {
                        stream.write_all(&payload)?;
                    }
                }
                RpcOp::Write => {
                    if header.size > MAX_BULK {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "oversized bulk write",
                        ));
                    }
                    // The bulk payload is consumed whether or not the
                    // request is honored, so framing survives bad writes.
                    let mut buf = vec![0u8; header.size as usize];
                    stream.read_exact(&mut buf)?;
                    let code = {
                        let mut objects = self.objects.lock().unwrap();
                        match objects.get_mut(&id) {
                            Some(o) => match slice_range_mut(&mut o.data, &header) {
                                Some(range) => {
                                    range.copy_from_slice(&buf);
                                    ResponseCode::WriteDone
                                }
                                None => ResponseCode::WrongSize,
                            },
                            None => ResponseCode::Unavailable,
                        }
                    };
                    reply(&mut stream, code)?;
                }
            }
        }
    }
}

impl Default for RpcServer {
    fn default() -> Self {
        Self::new()
    }
}

fn reply(stream: &mut TcpStream, code: ResponseCode) -> io::Result<()> {
    wire::write_msg(
        stream,
        &RpcReply {
            code: code.as_u32(),
        },
    )
}

fn slice_range<'a>(data: &'a [u8], header: &RpcHeader) -> Option<&'a [u8]> {
    let start = usize::try_from(header.offset).ok()?;
    let len = usize::try_from(header.size).ok()?;
    data.get(start..start.checked_add(len)?)
}

fn slice_range_mut<'a>(data: &'a mut [u8], header: &RpcHeader) -> Option<&'a mut [u8]> {
    let start = usize::try_from(header.offset).ok()?;
    let len = usize::try_from(header.size).ok()?;
    data.get_mut(start..start.checked_add(len)?)
}
