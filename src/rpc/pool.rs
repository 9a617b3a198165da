//! Client-side directory of claimed remote memory objects.
//!
//! Identifiers are unique within the pool. The pool owns the transport and
//! enforces the lifecycle rule: releasing the last registered object
//! finalizes the transport.

use std::collections::HashMap;
use std::ptr;

use crate::rpc::message::ResponseCode;
use crate::rpc::transport::{RpcTransport, PRIMARY_SERVER};

/// A claim on a named remote object and its local placement, once known.
pub struct RemoteObject {
    pub ptr: *mut u8,
    pub size: u64,
}

pub struct RemoteObjectPool {
    transport: RpcTransport,
    objects: HashMap<String, RemoteObject>,
}

impl RemoteObjectPool {
    pub fn new(transport: RpcTransport) -> Self {
        Self {
            transport,
            objects: HashMap::new(),
        }
    }

    /// True iff `id` is not yet registered locally.
    pub fn check_available(&self, id: &str) -> bool {
        !self.objects.contains_key(id)
    }

    /// Blocking claim of `id` on the server. A duplicate registration is
    /// rejected locally; no request goes out. On `Available` the id is
    /// registered with a placeholder placement.
    pub fn request_resource(&mut self, id: &str, size: u64) -> bool {
        if !self.check_available(id) {
            log::error!("{} is already registered in the pool", id);
            return false;
        }
        match self.transport.request(PRIMARY_SERVER, id, size) {
            Ok(ResponseCode::Available) => {
                self.objects.insert(
                    id.to_string(),
                    RemoteObject {
                        ptr: ptr::null_mut(),
                        size,
                    },
                );
                true
            }
            Ok(ResponseCode::Unavailable) => {
                log::error!("requested {} is unavailable", id);
                false
            }
            Ok(ResponseCode::WrongSize) => {
                log::error!("requested {} has mismatched size", id);
                false
            }
            Ok(code) => {
                log::error!("unrecognized response {} to request for {}", code, id);
                false
            }
            Err(e) => {
                log::error!("request rpc for {} failed: {}", id, e);
                false
            }
        }
    }

    /// Records the local placement of `id`, replacing any placeholder.
    pub fn add_resource(&mut self, id: &str, ptr: *mut u8, size: u64) {
        self.objects
            .insert(id.to_string(), RemoteObject { ptr, size });
    }

    /// Releases `id` on the server and drops the local claim. An unknown
    /// id fails without contacting the server and leaves the directory
    /// unchanged. Releasing the last object finalizes the transport.
    pub fn release_resource(&mut self, id: &str) -> bool {
        if self.check_available(id) {
            log::error!("{} is not registered in the pool", id);
            return false;
        }
        match self.transport.release(PRIMARY_SERVER, id) {
            Ok(ResponseCode::ReleaseOk) => {
                self.objects.remove(id);
                if self.objects.is_empty() {
                    self.transport.finalize();
                }
                true
            }
            Ok(code) => {
                log::error!("server failed to release {}: {}", id, code);
                false
            }
            Err(e) => {
                log::error!("release rpc for {} failed: {}", id, e);
                false
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&RemoteObject> {
        self.objects.get(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn transport(&self) -> &RpcTransport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut RpcTransport {
        &mut self.transport
    }
}
