use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which business rule a transaction broke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    NoInputsAllowed,
    ExactlyOneOutput,
    PartiesMustDiffer,
    AllParticipantsMustSign,
    AmountMustBeNonNegative,
    ExactlyOneInput,
    LinearIdChanged,
    AmountChanged,
    ProposerChanged,
    CounterpartyMismatch,
    UnresolvedInput,
    UnexpectedCommand,
    NotCounterparty,
    AmountAboveLimit,
    ConflictingProposal,
    UnknownProposal,
}

/// A contract or acceptance rule violation
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub message: String,
}

impl ValidationError {
    pub fn new(kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Typed failure of an agreement flow.
///
/// Serialisable so a rejection can travel back to the initiating node as
/// part of a [`crate::p2p::protocol::FlowResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FlowError {
    #[error("Contract verification failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Signature verification failed: {0}")]
    Signature(String),
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("Notarisation failed: {0}")]
    Notarization(String),
    #[error("Storage failure: {0}")]
    Storage(String),
}

impl FlowError {
    pub fn validation(kind: ValidationKind, message: impl Into<String>) -> Self {
        FlowError::Validation(ValidationError::new(kind, message))
    }

    pub fn storage(e: impl std::fmt::Display) -> Self {
        FlowError::Storage(e.to_string())
    }
}
