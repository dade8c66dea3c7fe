pub mod identity;
pub mod ious;
pub mod peers;

#[cfg(test)]
pub mod testing {
    use actix_web::web;
    use tokio::sync::mpsc;

    use crate::crypto::keys::peer_id_for;
    use crate::flow::testing::MockNode;
    use crate::p2p::node::P2PCommand;
    use crate::AppState;

    /// App state backed by a node of the in-process test network.
    /// The P2P command channel has no swarm behind it.
    pub fn state_for(node: &MockNode) -> web::Data<AppState> {
        let (p2p_tx, _) = mpsc::channel(1);
        state_with_p2p(node, p2p_tx)
    }

    pub fn state_with_p2p(node: &MockNode, p2p_tx: mpsc::Sender<P2PCommand>) -> web::Data<AppState> {
        web::Data::new(AppState {
            identity: node.identity.clone(),
            db: node.db.clone(),
            services: node.services.clone(),
            p2p_tx,
            peer_id: peer_id_for(&node.identity.party_key()).unwrap(),
            local_info: node.info.clone(),
        })
    }
}
