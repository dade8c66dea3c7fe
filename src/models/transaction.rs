use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::agreement::AgreementRecord;
use super::party::{PartyIdentity, PartyKey};
use crate::error::FlowError;

/// SHA-256 of a transaction's canonical encoding
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId([u8; 32]);

impl TransactionId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for TransactionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| format!("Invalid transaction id: {}", e))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "Invalid transaction id: expected 32 bytes".to_string())?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.to_hex())
    }
}

impl Serialize for TransactionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TransactionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Pointer to one output of a recorded transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateRef {
    pub txhash: TransactionId,
    pub index: u32,
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.txhash, self.index)
    }
}

/// What a transaction does to agreement records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Issue a new IOU
    Create,
    /// Hand an existing IOU to a new counterparty
    Move { new_counterparty: PartyIdentity },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandWithSigners {
    pub value: Command,
    pub signers: Vec<PartyKey>,
}

/// An unsigned transaction as it travels between parties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTransaction {
    pub inputs: Vec<StateRef>,
    pub outputs: Vec<AgreementRecord>,
    pub command: CommandWithSigners,
    pub notary: PartyIdentity,
}

impl WireTransaction {
    pub fn id(&self) -> TransactionId {
        // Plain structs and vectors only, so JSON encoding is deterministic and infallible
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        TransactionId(Sha256::digest(&canonical).into())
    }

    /// Keys whose signatures make the transaction complete: command signers plus the notary
    pub fn required_signers(&self) -> BTreeSet<PartyKey> {
        let mut keys: BTreeSet<PartyKey> = self.command.signers.iter().copied().collect();
        keys.insert(self.notary.owning_key);
        keys
    }

    pub fn out_ref(&self, index: u32) -> StateRef {
        StateRef {
            txhash: self.id(),
            index,
        }
    }
}

/// Ed25519 signature over a transaction id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    pub by: PartyKey,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl TransactionSignature {
    pub fn verify(&self, id: &TransactionId) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(self.by.as_bytes()) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&self.bytes) else {
            return false;
        };
        key.verify(id.as_bytes(), &signature).is_ok()
    }
}

/// A transaction plus the signatures collected so far
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub tx: WireTransaction,
    pub sigs: Vec<TransactionSignature>,
}

impl SignedTransaction {
    pub fn new(tx: WireTransaction) -> Self {
        Self { tx, sigs: Vec::new() }
    }

    pub fn id(&self) -> TransactionId {
        self.tx.id()
    }

    pub fn signers(&self) -> BTreeSet<PartyKey> {
        self.sigs.iter().map(|s| s.by).collect()
    }

    pub fn is_signed_by(&self, key: &PartyKey) -> bool {
        self.sigs.iter().any(|s| &s.by == key)
    }

    /// Append a signature; a second signature by the same key is ignored
    pub fn add_signature(&mut self, signature: TransactionSignature) -> bool {
        if self.is_signed_by(&signature.by) {
            return false;
        }
        self.sigs.push(signature);
        true
    }

    /// Every present signature must verify, and every required signer other
    /// than `allowed_missing` must have signed.
    pub fn verify_signatures_except(&self, allowed_missing: &[PartyKey]) -> Result<(), FlowError> {
        let id = self.id();
        if let Some(bad) = self.sigs.iter().find(|s| !s.verify(&id)) {
            return Err(FlowError::Signature(format!(
                "Invalid signature by {} over transaction {}",
                bad.by, id
            )));
        }

        let present = self.signers();
        let missing: Vec<String> = self
            .tx
            .required_signers()
            .into_iter()
            .filter(|k| !present.contains(k) && !allowed_missing.contains(k))
            .map(|k| k.to_base58())
            .collect();

        if !missing.is_empty() {
            return Err(FlowError::Signature(format!(
                "Missing signatures on transaction {} from: {}",
                id,
                missing.join(", ")
            )));
        }
        Ok(())
    }

    pub fn verify_required_signatures(&self) -> Result<(), FlowError> {
        self.verify_signatures_except(&[])
    }
}

mod base64_bytes {
    use super::BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(s).map_err(serde::de::Error::custom)
    }
}
