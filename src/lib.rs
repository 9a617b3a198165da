//! remmap - file-backed memory resident in a daemon, mapped on demand by
//! client processes.
//!
//! # Architecture
//!
//! ```text
//! client process                          remmapd
//! ┌─────────────────────┐   unix socket  ┌──────────────────────────┐
//! │ ClientManager       │◀──────────────▶│ serve_connection (thread │
//! │   map()/unmap()     │  ActionRequest │   per connection)        │
//! │   SessionHandle     │  + SCM_RIGHTS  │     │                    │
//! │     per filename    │                │     ▼                    │
//! └─────────────────────┘                │ ServerContext            │
//!          fixed-address MAP_SHARED      │   RegionDirectory        │
//!          view of the shared object     │   AddressAllocator       │
//!                                        │   FaultEngine seam       │
//! ┌─────────────────────┐      tcp       └──────────────────────────┘
//! │ RemoteObjectPool    │◀──────────────▶ RpcServer
//! │   RpcTransport      │  header/reply   (published named objects)
//! └─────────────────────┘  + bulk bytes
//! ```
//!
//! Two independent paths share the crate:
//!
//! - the **handoff protocol**: a client asks the daemon to map a filename,
//!   receives the shared-memory-object descriptor and the address window,
//!   maps it at that fixed address, and transfers a fault-notification
//!   descriptor so the daemon's fault engine services the range;
//! - the **remote object directory**: blocking request/release/read/write
//!   RPCs against named remote memory objects, with bulk data moving
//!   directly between the wire and the caller's buffer.

pub mod client;
pub mod engine;
pub mod error;
pub mod fdpass;
pub mod rpc;
pub mod server;
pub mod uffd;
pub mod wire;

pub use client::{ClientManager, SessionHandle};
pub use engine::{FaultEngine, PrefillEngine, Registration};
pub use error::{Error, Result};
pub use rpc::{RemoteObjectPool, ResponseCode, RpcServer, RpcTransport};
pub use server::{run_daemon, serve, serve_connection, MappedRegion, ServerContext};
pub use wire::{ActionKind, ActionRequest, RegionLoc};
