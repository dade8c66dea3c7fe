use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FlowError;
use crate::models::party::NodeInfo;
use crate::models::transaction::{SignedTransaction, TransactionSignature};

/// Protocol name for agreement flow exchange
pub const PROTOCOL_NAME: libp2p::StreamProtocol = libp2p::StreamProtocol::new("/iou/flow/1.0.0");

/// Request sent from one node to another
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FlowRequest {
    /// Introduce ourselves so the peer can add us to its directory
    Hello(NodeInfo),
    /// Initiator asks the counterparty to check and counter-sign
    Propose {
        flow_id: Uuid,
        transaction: SignedTransaction,
    },
    /// Ask the notary for its signature
    Notarise { transaction: SignedTransaction },
    /// Fully signed and notarised transaction for the counterparty to record
    Finalise {
        flow_id: Uuid,
        transaction: SignedTransaction,
    },
    /// The initiator gave up; the counterparty can forget the proposal
    Abort { flow_id: Uuid },
}

/// Response to a [`FlowRequest`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FlowResponse {
    Hello(NodeInfo),
    Signed(TransactionSignature),
    Notarised(TransactionSignature),
    Recorded,
    Aborted,
    Rejected(FlowError),
}

impl FlowRequest {
    pub fn label(&self) -> &'static str {
        match self {
            FlowRequest::Hello(_) => "hello",
            FlowRequest::Propose { .. } => "propose",
            FlowRequest::Notarise { .. } => "notarise",
            FlowRequest::Finalise { .. } => "finalise",
            FlowRequest::Abort { .. } => "abort",
        }
    }
}

impl FlowResponse {
    pub fn label(&self) -> &'static str {
        match self {
            FlowResponse::Hello(_) => "hello",
            FlowResponse::Signed(_) => "signed",
            FlowResponse::Notarised(_) => "notarised",
            FlowResponse::Recorded => "recorded",
            FlowResponse::Aborted => "aborted",
            FlowResponse::Rejected(_) => "rejected",
        }
    }
}
