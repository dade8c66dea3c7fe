use async_trait::async_trait;
use std::sync::Arc;

use super::db::Database;
use crate::error::FlowError;
use crate::flow::services::NetworkDirectory;
use crate::models::party::{NodeInfo, NotaryRef, PartyIdentity};

/// The peers table as seen by flows.
///
/// Peers describe themselves when they connect, so the notary is never taken
/// from what they claim: only the operator-pinned identity is used.
pub struct PeerDirectory {
    db: Arc<Database>,
    notary: Option<NotaryRef>,
}

impl PeerDirectory {
    pub fn new(db: Arc<Database>, notary: Option<NotaryRef>) -> Self {
        Self { db, notary }
    }
}

#[async_trait]
impl NetworkDirectory for PeerDirectory {
    async fn notary_for(&self, network: &str) -> Result<Option<PartyIdentity>, FlowError> {
        let Some(ref notary) = self.notary else {
            return Ok(None);
        };
        let record = match notary {
            NotaryRef::Key(key) => self.db.find_peer_by_key(key),
            NotaryRef::Name(name) => self.db.find_peer_by_name(name),
        }
        .map_err(FlowError::storage)?;

        Ok(record
            .filter(|p| p.info.network == network)
            .map(|p| p.info.party))
    }

    async fn party_from_name(&self, name: &str) -> Result<Option<PartyIdentity>, FlowError> {
        Ok(self
            .db
            .find_peer_by_name(name)
            .map_err(FlowError::storage)?
            .map(|p| p.info.party))
    }

    async fn peers(&self) -> Result<Vec<NodeInfo>, FlowError> {
        Ok(self
            .db
            .get_peers()
            .map_err(FlowError::storage)?
            .into_iter()
            .map(|p| p.info)
            .collect())
    }
}
