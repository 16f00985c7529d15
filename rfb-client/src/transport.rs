//! Transport layer (TCP and TLS) for VNC connections.

use crate::errors::RfbClientError;

// Stub - to be implemented
pub struct Transport;

impl Transport {
    pub async fn connect(_host: &str, _port: u16) -> Result<Self, RfbClientError> {
        unimplemented!("Transport::connect - Phase 4 implementation pending")
    }
}
