//! The two-party agreement protocol.
//!
//! An [`initiator::Initiator`] proposes an IOU, an [`acceptor::Acceptor`] on
//! the counterparty's node independently checks and counter-signs it, and the
//! notary's signature completes it before both sides record it. Both roles
//! are explicit state machines whose state is checkpointed at every point
//! where they wait on a peer.

pub mod acceptor;
pub mod checkpoint;
pub mod initiator;
pub mod progress;
pub mod responder;
pub mod services;

#[cfg(test)]
pub mod testing;

use std::time::Duration;

use crate::contract::iou::LedgerTransaction;
use crate::error::{FlowError, ValidationKind};
use crate::models::transaction::WireTransaction;
use checkpoint::Checkpoint;
use initiator::Initiator;
use progress::ProgressTracker;
use services::{FlowServices, TransactionStore};

/// How long a counter-signed proposal waits for its initiator to finalise
pub const ACCEPTOR_CHECKPOINT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Resolve a transaction's inputs against the local store
pub async fn resolve_transaction(
    store: &dyn TransactionStore,
    tx: &WireTransaction,
) -> Result<LedgerTransaction, FlowError> {
    let mut inputs = Vec::with_capacity(tx.inputs.len());
    for state_ref in &tx.inputs {
        match store.resolve_state(state_ref).await? {
            Some(record) => inputs.push(record),
            None => {
                return Err(FlowError::validation(
                    ValidationKind::UnresolvedInput,
                    format!("Input state {} could not be resolved.", state_ref),
                ))
            }
        }
    }

    Ok(LedgerTransaction {
        inputs,
        outputs: tx.outputs.clone(),
        command: tx.command.value.clone(),
        signers: tx.command.signers.iter().copied().collect(),
    })
}

/// Restart every initiator that was suspended when the node last stopped.
///
/// Acceptor checkpoints need no task: they wait for the initiator's
/// `Finalise` request, and are dropped once older than
/// [`ACCEPTOR_CHECKPOINT_TTL`].
pub async fn resume_pending(services: &FlowServices) -> Result<usize, FlowError> {
    let expired = services.checkpoints.expire_acceptors(ACCEPTOR_CHECKPOINT_TTL).await?;
    if expired > 0 {
        tracing::info!("Dropped {} stale counter-signed proposal(s)", expired);
    }

    let mut resumed = 0;
    for checkpoint in services.checkpoints.load_all().await? {
        let Checkpoint::Initiator(checkpoint) = checkpoint else {
            continue;
        };
        if checkpoint.state.is_terminal() {
            services.checkpoints.remove(&checkpoint.flow_id).await?;
            continue;
        }

        tracing::info!(
            "Resuming flow {} from {:?}",
            checkpoint.flow_id,
            checkpoint.state
        );
        let flow = Initiator::resume(checkpoint, services.clone(), ProgressTracker::silent());
        tokio::spawn(async move {
            let flow_id = flow.flow_id();
            match flow.run().await {
                Ok(stx) => tracing::info!("Resumed flow {} committed {}", flow_id, stx.id()),
                Err(e) => tracing::warn!("Resumed flow {} failed: {}", flow_id, e),
            }
        });
        resumed += 1;
    }
    Ok(resumed)
}
