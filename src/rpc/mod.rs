//! Remote memory object directory and transport.
//!
//! Independent of the handoff path: a client registers interest in a named
//! remote memory object and reads or writes its bytes through blocking
//! request/response calls, with bulk data moving directly between the wire
//! and the caller's buffer.

pub mod message;
pub mod pool;
pub mod server;
pub mod transport;

pub use message::ResponseCode;
pub use pool::{RemoteObject, RemoteObjectPool};
pub use server::RpcServer;
pub use transport::{RpcTransport, ServerId, PRIMARY_SERVER};
