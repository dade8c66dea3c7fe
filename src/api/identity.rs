use actix_web::{get, web, HttpResponse};

use crate::models::api::{ApiResponse, IdentityInfo};

use super::super::AppState;

#[get("/api/me")]
pub async fn get_identity(state: web::Data<AppState>) -> HttpResponse {
    let info = IdentityInfo {
        me: state.local_info.party.name.clone(),
        public_key: state.identity.party_key().to_base58(),
        peer_id: state.peer_id.to_string(),
        network: state.local_info.network.clone(),
        notary: state.local_info.notary,
    };
    HttpResponse::Ok().json(ApiResponse::ok(info))
}
