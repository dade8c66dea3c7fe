use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::fs;
use std::path::Path;

use crate::flow::services::SigningService;
use crate::models::party::{PartyIdentity, PartyKey};
use crate::models::transaction::{TransactionId, TransactionSignature};

type KeyResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// The node's legal identity: a name bound to an Ed25519 signing key
#[derive(Clone)]
pub struct NodeIdentity {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
    pub party: PartyIdentity,
}

impl NodeIdentity {
    /// Load the key for `name` from disk, generating it on first start
    pub fn load_or_create(data_dir: &Path, name: &str) -> KeyResult<Self> {
        let key_path = data_dir.join("identity.key");

        if key_path.exists() {
            tracing::info!("Loading existing identity from {:?}", key_path);
            Self::load_from_file(&key_path, name)
        } else {
            tracing::info!("Generating new identity for {}...", name);
            let identity = Self::generate(name)?;
            fs::create_dir_all(data_dir)?;
            identity.save_to_file(&key_path)?;
            tracing::info!("Identity saved to {:?}", key_path);
            Ok(identity)
        }
    }

    /// Generate a brand new identity
    pub fn generate(name: &str) -> KeyResult<Self> {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        Ok(Self::from_signing_key(name, signing_key))
    }

    fn from_signing_key(name: &str, signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let party = PartyIdentity::new(name, PartyKey::from_bytes(verifying_key.to_bytes()));
        Self {
            signing_key,
            verifying_key,
            party,
        }
    }

    /// Save identity to file (Ed25519 seed only)
    fn save_to_file(&self, path: &Path) -> KeyResult<()> {
        let seed = self.signing_key.to_bytes();
        fs::write(path, seed)?;
        // Restrict permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn load_from_file(path: &Path, name: &str) -> KeyResult<Self> {
        let seed_bytes = fs::read(path)?;
        let seed: [u8; 32] = seed_bytes
            .as_slice()
            .try_into()
            .map_err(|_| "Invalid identity file: expected 32 bytes")?;
        Ok(Self::from_signing_key(name, SigningKey::from_bytes(&seed)))
    }

    /// Sign raw bytes
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.signing_key.sign(data).to_bytes().to_vec()
    }

    /// Sign a transaction id
    pub fn sign_transaction(&self, id: &TransactionId) -> TransactionSignature {
        TransactionSignature {
            by: self.party_key(),
            bytes: self.sign(id.as_bytes()),
        }
    }

    pub fn party_key(&self) -> PartyKey {
        self.party.owning_key
    }

    /// The libp2p keypair shares the Ed25519 seed, so the peer id is bound to the party key
    pub fn libp2p_keypair(&self) -> KeyResult<libp2p::identity::Keypair> {
        let mut seed = self.signing_key.to_bytes();
        Ok(libp2p::identity::Keypair::ed25519_from_bytes(&mut seed)?)
    }
}

impl SigningService for NodeIdentity {
    fn local_party(&self) -> PartyIdentity {
        self.party.clone()
    }

    fn sign(&self, id: &TransactionId) -> TransactionSignature {
        self.sign_transaction(id)
    }
}

/// Peer id a party key must present on the wire
pub fn peer_id_for(key: &PartyKey) -> KeyResult<libp2p::PeerId> {
    let ed = libp2p::identity::ed25519::PublicKey::try_from_bytes(key.as_bytes())?;
    Ok(libp2p::identity::PublicKey::from(ed).to_peer_id())
}
