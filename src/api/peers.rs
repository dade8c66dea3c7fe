use actix_web::{get, post, web, HttpResponse};
use std::collections::HashSet;
use tokio::sync::oneshot;

use crate::crypto::keys::peer_id_for;
use crate::models::api::{ApiResponse, ConnectPeerRequest, PeerInfo};
use crate::p2p::node::P2PCommand;

use super::super::AppState;

/// Parties this node can agree IOUs with: everyone known except itself and notaries
#[get("/api/peers")]
pub async fn list_peers(state: web::Data<AppState>) -> HttpResponse {
    let me = state.identity.party_key();
    let connected = connected_peers(&state).await;
    match state.db.get_peers() {
        Ok(peers) => {
            let peers: Vec<PeerInfo> = peers
                .into_iter()
                .filter(|p| p.info.party.owning_key != me && !p.info.notary)
                .map(|p| {
                    let peer_id = peer_id_for(&p.info.party.owning_key)
                        .map(|id| id.to_string())
                        .unwrap_or_default();
                    PeerInfo {
                        connected: connected.contains(&peer_id),
                        peer_id,
                        name: p.info.party.name,
                        public_key: p.info.party.owning_key.to_base58(),
                        address: p.address,
                    }
                })
                .collect();
            HttpResponse::Ok().json(ApiResponse::ok(peers))
        }
        Err(e) => HttpResponse::InternalServerError().json(ApiResponse::<()>::err(e.to_string())),
    }
}

/// Peer ids the swarm holds a connection to; empty when the swarm is down
async fn connected_peers(state: &AppState) -> HashSet<String> {
    let (tx, rx) = oneshot::channel();
    if state
        .p2p_tx
        .send(P2PCommand::GetConnectedPeers { response_tx: tx })
        .await
        .is_err()
    {
        return HashSet::new();
    }
    rx.await
        .map(|peers| peers.iter().map(|id| id.to_string()).collect())
        .unwrap_or_default()
}

#[post("/api/peers")]
pub async fn connect_peer(
    state: web::Data<AppState>,
    body: web::Json<ConnectPeerRequest>,
) -> HttpResponse {
    let addr = match body.multiaddr.parse() {
        Ok(a) => a,
        Err(e) => {
            return HttpResponse::BadRequest().json(ApiResponse::<()>::err(format!("Invalid multiaddr: {}", e)));
        }
    };

    let (tx, rx) = oneshot::channel();
    if state
        .p2p_tx
        .send(P2PCommand::ConnectPeer { addr, response_tx: tx })
        .await
        .is_err()
    {
        return HttpResponse::ServiceUnavailable().json(ApiResponse::<()>::err("P2P node is not running"));
    }

    match rx.await {
        Ok(Ok(())) => HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
            "multiaddr": body.multiaddr,
            "status": "connecting"
        }))),
        Ok(Err(e)) => HttpResponse::InternalServerError().json(ApiResponse::<()>::err(e)),
        Err(_) => HttpResponse::InternalServerError().json(ApiResponse::<()>::err("No response")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{state_for, state_with_p2p};
    use crate::flow::testing::MockNetwork;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::{json, Value};

    #[actix_rt::test]
    async fn test_peers_exclude_self_and_notaries() {
        let net = MockNetwork::new();
        net.create_notary("Notary");
        let a = net.create_node("BankA");
        let b = net.create_node("BankB");
        net.create_node("BankC");

        let app = test::init_service(App::new().app_data(state_for(&a)).service(list_peers)).await;
        let req = test::TestRequest::get().uri("/api/peers").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        let names: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["BankB", "BankC"]);
        assert_eq!(body["data"][0]["connected"], false);
        assert_eq!(
            body["data"][0]["peer_id"],
            peer_id_for(&b.party().owning_key).unwrap().to_string()
        );
    }

    #[actix_rt::test]
    async fn test_peers_report_swarm_connections() {
        let net = MockNetwork::new();
        let a = net.create_node("BankA");
        let b = net.create_node("BankB");
        net.create_node("BankC");

        let b_peer = peer_id_for(&b.party().owning_key).unwrap();
        let (p2p_tx, mut p2p_rx) = tokio::sync::mpsc::channel(4);
        tokio::spawn(async move {
            while let Some(cmd) = p2p_rx.recv().await {
                if let P2PCommand::GetConnectedPeers { response_tx } = cmd {
                    let _ = response_tx.send(vec![b_peer]);
                }
            }
        });

        let app = test::init_service(App::new().app_data(state_with_p2p(&a, p2p_tx)).service(list_peers)).await;
        let req = test::TestRequest::get().uri("/api/peers").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["data"][0]["name"], "BankB");
        assert_eq!(body["data"][0]["connected"], true);
        assert_eq!(body["data"][1]["connected"], false);
    }

    #[actix_rt::test]
    async fn test_connect_rejects_bad_multiaddr() {
        let net = MockNetwork::new();
        let a = net.create_node("BankA");
        let app = test::init_service(App::new().app_data(state_for(&a)).service(connect_peer)).await;

        let req = test::TestRequest::post()
            .uri("/api/peers")
            .set_json(json!({ "multiaddr": "not a multiaddr" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        // No swarm behind the test state
        let req = test::TestRequest::post()
            .uri("/api/peers")
            .set_json(json!({ "multiaddr": "/ip4/127.0.0.1/tcp/9420" }))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
