use super::acceptor::Acceptor;
use crate::error::FlowError;
use crate::models::party::{NodeInfo, PartyIdentity};
use crate::notary::NotaryService;
use crate::p2p::protocol::{FlowRequest, FlowResponse};

/// Answers flow requests arriving from peers
pub struct Responder {
    local_info: NodeInfo,
    acceptor: Acceptor,
    notary: Option<NotaryService>,
}

impl Responder {
    pub fn new(local_info: NodeInfo, acceptor: Acceptor, notary: Option<NotaryService>) -> Self {
        Self {
            local_info,
            acceptor,
            notary,
        }
    }

    /// Handle one request. `from` is the authenticated sender, if known.
    pub async fn handle(&self, from: Option<&PartyIdentity>, request: FlowRequest) -> FlowResponse {
        let sender = from.map(|p| p.name.as_str()).unwrap_or("unknown peer");
        tracing::debug!("Handling '{}' from {}", request.label(), sender);

        self.dispatch(from, request).await.unwrap_or_else(|e| {
            tracing::info!("Rejected request from {}: {}", sender, e);
            FlowResponse::Rejected(e)
        })
    }

    async fn dispatch(&self, from: Option<&PartyIdentity>, request: FlowRequest) -> Result<FlowResponse, FlowError> {
        // Only a Hello may come from a peer we have not been introduced to
        let introduced = || {
            from.ok_or_else(|| FlowError::Transport("Requests must come from an introduced peer".into()))
        };

        match request {
            FlowRequest::Hello(_) => Ok(FlowResponse::Hello(self.local_info.clone())),
            FlowRequest::Propose { flow_id, transaction } => self
                .acceptor
                .on_proposal(introduced()?, flow_id, transaction)
                .await
                .map(FlowResponse::Signed),
            FlowRequest::Finalise { flow_id, transaction } => self
                .acceptor
                .on_finalise(introduced()?, flow_id, transaction)
                .await
                .map(|_| FlowResponse::Recorded),
            FlowRequest::Abort { flow_id } => self
                .acceptor
                .on_abort(introduced()?, flow_id)
                .await
                .map(|_| FlowResponse::Aborted),
            FlowRequest::Notarise { transaction } => {
                let from = introduced()?;
                match self.notary {
                    Some(ref notary) => notary.notarise(from, &transaction).await.map(FlowResponse::Notarised),
                    None => Err(FlowError::Notarization("This node is not a notary".into())),
                }
            }
        }
    }
}
