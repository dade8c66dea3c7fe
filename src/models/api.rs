use serde::{Deserialize, Serialize};

use super::agreement::AgreementRecord;
use super::transaction::StateRef;

/// Request to agree a new IOU with a named counterparty
#[derive(Debug, Deserialize)]
pub struct CreateIouRequest {
    pub amount: i64,
    pub counterparty: String,
}

#[derive(Debug, Serialize)]
pub struct CreateIouResponse {
    pub transaction_id: String,
    pub message: String,
}

/// Request to connect to a peer
#[derive(Debug, Deserialize)]
pub struct ConnectPeerRequest {
    pub multiaddr: String,
}

/// Peer info
#[derive(Debug, Serialize, Deserialize)]
pub struct PeerInfo {
    pub name: String,
    pub public_key: String,
    pub peer_id: String,
    pub address: Option<String>,
    pub connected: bool,
}

/// Identity info
#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityInfo {
    pub me: String,
    pub public_key: String,
    pub peer_id: String,
    pub network: String,
    pub notary: bool,
}

/// An unconsumed IOU in the local vault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateAndRef {
    pub state: AgreementRecord,
    pub r#ref: StateRef,
}

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
