use actix_web::{get, post, web, HttpResponse};

use crate::flow::initiator::Initiator;
use crate::flow::progress::ProgressTracker;
use crate::models::api::{ApiResponse, CreateIouRequest, CreateIouResponse};
use crate::models::transaction::TransactionId;

use super::super::AppState;

/// Run an initiator to completion and report its outcome
#[post("/api/ious")]
pub async fn create_iou(
    state: web::Data<AppState>,
    body: web::Json<CreateIouRequest>,
) -> HttpResponse {
    let counterparty = match state.services.directory.party_from_name(&body.counterparty).await {
        Ok(Some(party)) => party,
        Ok(None) => {
            return HttpResponse::BadRequest().json(ApiResponse::<()>::err(format!(
                "Unknown counterparty '{}'",
                body.counterparty
            )));
        }
        Err(e) => {
            return HttpResponse::InternalServerError().json(ApiResponse::<()>::err(e.to_string()));
        }
    };

    let (progress, mut events) = ProgressTracker::channel();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(">> {}", event);
        }
    });

    match Initiator::new(body.amount, counterparty, state.services.clone(), progress)
        .run()
        .await
    {
        Ok(stx) => {
            let id = stx.id();
            HttpResponse::Created().json(ApiResponse::ok(CreateIouResponse {
                transaction_id: id.to_hex(),
                message: format!("Transaction id {} committed to ledger.", id),
            }))
        }
        Err(e) => HttpResponse::BadRequest().json(ApiResponse::<()>::err(e.to_string())),
    }
}

/// Unconsumed IOUs this node is party to
#[get("/api/ious")]
pub async fn list_ious(state: web::Data<AppState>) -> HttpResponse {
    let me = [state.identity.party_key()];
    match state.db.get_unconsumed_records() {
        Ok(records) => {
            let mine: Vec<_> = records
                .into_iter()
                .filter(|r| r.state.is_relevant(&me))
                .collect();
            HttpResponse::Ok().json(ApiResponse::ok(mine))
        }
        Err(e) => HttpResponse::InternalServerError().json(ApiResponse::<()>::err(e.to_string())),
    }
}

#[get("/api/transactions/{id}")]
pub async fn get_transaction(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let id: TransactionId = match path.into_inner().parse() {
        Ok(id) => id,
        Err(e) => return HttpResponse::BadRequest().json(ApiResponse::<()>::err(e)),
    };
    match state.db.get_transaction(&id) {
        Ok(Some(stx)) => HttpResponse::Ok().json(ApiResponse::ok(stx)),
        Ok(None) => HttpResponse::NotFound().json(ApiResponse::<()>::err("Transaction not found")),
        Err(e) => HttpResponse::InternalServerError().json(ApiResponse::<()>::err(e.to_string())),
    }
}
