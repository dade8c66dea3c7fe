use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Ed25519 public key that owns a party's signatures
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartyKey([u8; 32]);

impl PartyKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, String> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| format!("Invalid public key length: {}", bytes.len()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    pub fn from_base58(s: &str) -> Result<Self, String> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| format!("Invalid base58 key: {}", e))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for PartyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for PartyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartyKey({})", self.to_base58())
    }
}

impl Serialize for PartyKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for PartyKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base58(&s).map_err(serde::de::Error::custom)
    }
}

/// A named participant on the network
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartyIdentity {
    pub name: String,
    pub owning_key: PartyKey,
}

impl PartyIdentity {
    pub fn new(name: impl Into<String>, owning_key: PartyKey) -> Self {
        Self {
            name: name.into(),
            owning_key,
        }
    }
}

impl fmt::Display for PartyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// What a node advertises about itself when peers meet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub party: PartyIdentity,
    pub network: String,
    pub notary: bool,
}

/// The notary this node trusts, pinned by operator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotaryRef {
    Key(PartyKey),
    Name(String),
}

impl FromStr for NotaryRef {
    type Err = std::convert::Infallible;

    /// A base58 public key if it parses as one, otherwise a party name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match PartyKey::from_base58(s) {
            Ok(key) => NotaryRef::Key(key),
            Err(_) => NotaryRef::Name(s.to_string()),
        })
    }
}

impl fmt::Display for NotaryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotaryRef::Key(key) => write!(f, "{}", key),
            NotaryRef::Name(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_party_key_base58_roundtrip() {
        let key = PartyKey::from_bytes([7u8; 32]);
        let parsed = PartyKey::from_base58(&key.to_base58()).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_party_key_rejects_wrong_length() {
        let short = bs58::encode([1u8; 16]).into_string();
        assert!(PartyKey::from_base58(&short).is_err());
    }

    #[test]
    fn test_party_key_serializes_as_string() {
        let party = PartyIdentity::new("BankA", PartyKey::from_bytes([1u8; 32]));
        let json = serde_json::to_value(&party).unwrap();
        assert_eq!(json["name"], "BankA");
        assert!(json["owning_key"].is_string());
    }

    #[test]
    fn test_notary_ref_parses_key_or_name() {
        let key = PartyKey::from_bytes([9u8; 32]);
        assert_eq!(key.to_base58().parse::<NotaryRef>().unwrap(), NotaryRef::Key(key));
        assert_eq!(
            "Notary".parse::<NotaryRef>().unwrap(),
            NotaryRef::Name("Notary".into())
        );
    }
}
