use async_trait::async_trait;
use std::sync::Arc;

use crate::error::FlowError;
use crate::flow::services::SigningService;
use crate::models::party::PartyIdentity;
use crate::models::transaction::{SignedTransaction, StateRef, TransactionId, TransactionSignature};

/// Records which transaction consumed each input state
#[async_trait]
pub trait UniquenessProvider: Send + Sync {
    /// Commit `inputs` as consumed by `consuming_tx`.
    ///
    /// Returns the inputs already consumed by some other transaction; when
    /// that list is non-empty nothing was committed.
    async fn commit(&self, inputs: &[StateRef], consuming_tx: &TransactionId) -> Result<Vec<StateRef>, FlowError>;
}

/// Signs transactions whose inputs have not been spent before
pub struct NotaryService {
    signer: Arc<dyn SigningService>,
    uniqueness: Arc<dyn UniquenessProvider>,
}

impl NotaryService {
    pub fn new(signer: Arc<dyn SigningService>, uniqueness: Arc<dyn UniquenessProvider>) -> Self {
        Self { signer, uniqueness }
    }

    pub async fn notarise(
        &self,
        requester: &PartyIdentity,
        transaction: &SignedTransaction,
    ) -> Result<TransactionSignature, FlowError> {
        let me = self.signer.local_party();
        let id = transaction.id();

        if transaction.tx.notary != me {
            return Err(FlowError::Notarization(format!(
                "Transaction {} names {} as notary, not {}",
                id, transaction.tx.notary, me
            )));
        }
        if !transaction.tx.command.signers.contains(&requester.owning_key) {
            return Err(FlowError::Notarization(format!(
                "{} is not a party to transaction {}",
                requester, id
            )));
        }
        transaction.verify_signatures_except(&[me.owning_key])?;

        let conflicts = self.uniqueness.commit(&transaction.tx.inputs, &id).await?;
        if !conflicts.is_empty() {
            let refs: Vec<String> = conflicts.iter().map(|r| r.to_string()).collect();
            tracing::warn!("Refusing to notarise {}: double spend of {}", id, refs.join(", "));
            return Err(FlowError::Notarization(format!(
                "Input states already consumed: {}",
                refs.join(", ")
            )));
        }

        tracing::info!("Notarised transaction {} for {}", id, requester);
        Ok(self.signer.sign(&id))
    }
}
