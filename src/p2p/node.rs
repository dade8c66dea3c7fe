use libp2p::{
    core::ConnectedPoint,
    futures::StreamExt,
    identity::Keypair,
    noise,
    request_response::{self, OutboundRequestId, ResponseChannel},
    swarm::SwarmEvent,
    tcp, yamux, Multiaddr, PeerId, Swarm,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::behaviour::{IouBehaviour, IouBehaviourEvent};
use super::protocol::{FlowRequest, FlowResponse};
use crate::crypto::keys::peer_id_for;
use crate::error::FlowError;
use crate::flow::responder::Responder;
use crate::models::party::NodeInfo;
use crate::store::db::Database;

/// Commands that can be sent to the P2P node from flows and the REST API
#[derive(Debug)]
pub enum P2PCommand {
    /// Send a flow request and hand back the peer's answer
    SendRequest {
        peer_id: PeerId,
        request: FlowRequest,
        response_tx: oneshot::Sender<Result<FlowResponse, FlowError>>,
    },
    /// Connect to a peer by multiaddr
    ConnectPeer {
        addr: Multiaddr,
        response_tx: oneshot::Sender<Result<(), String>>,
    },
    /// Get connected peers
    GetConnectedPeers {
        response_tx: oneshot::Sender<Vec<PeerId>>,
    },
}

enum PendingRequest {
    Flow(oneshot::Sender<Result<FlowResponse, FlowError>>),
    Hello,
}

struct EventLoop {
    swarm: Swarm<IouBehaviour>,
    db: Arc<Database>,
    local_info: NodeInfo,
    responder: Arc<Responder>,
    pending: HashMap<OutboundRequestId, PendingRequest>,
    dialed: HashMap<PeerId, Multiaddr>,
    reply_tx: mpsc::UnboundedSender<(ResponseChannel<FlowResponse>, FlowResponse)>,
}

/// Start the libp2p swarm, serving flow requests with `responder` and
/// taking commands from `cmd_rx`
pub async fn start_node(
    p2p_port: u16,
    keypair: Keypair,
    db: Arc<Database>,
    local_info: NodeInfo,
    responder: Arc<Responder>,
    bootstrap: Vec<Multiaddr>,
    mut cmd_rx: mpsc::Receiver<P2PCommand>,
) -> Result<PeerId, Box<dyn std::error::Error + Send + Sync>> {
    let local_peer_id = PeerId::from(keypair.public());
    tracing::info!("Local libp2p peer ID: {}", local_peer_id);

    let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )?
        .with_behaviour(|key| IouBehaviour::new(local_peer_id, key))?
        .with_swarm_config(|c| c.with_idle_connection_timeout(std::time::Duration::from_secs(60)))
        .build();

    let listen_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}", p2p_port).parse()?;
    swarm.listen_on(listen_addr)?;

    // Seed the address book with peers from earlier runs
    for peer in db.get_peers()? {
        let (Some(peer_id), Some(address)) = (peer.peer_id, peer.address) else {
            continue;
        };
        match (peer_id.parse::<PeerId>(), address.parse::<Multiaddr>()) {
            (Ok(peer_id), Ok(addr)) if peer_id != local_peer_id => {
                swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
            }
            _ => {}
        }
    }

    for addr in bootstrap {
        match swarm.dial(addr.clone()) {
            Ok(_) => tracing::info!("Dialing bootstrap peer {}", addr),
            Err(e) => tracing::warn!("Could not dial bootstrap peer {}: {}", addr, e),
        }
    }

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let mut event_loop = EventLoop {
        swarm,
        db,
        local_info,
        responder,
        pending: HashMap::new(),
        dialed: HashMap::new(),
        reply_tx,
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = event_loop.swarm.select_next_some() => {
                    event_loop.handle_swarm_event(event);
                }
                Some(cmd) = cmd_rx.recv() => {
                    event_loop.handle_command(cmd);
                }
                Some((channel, response)) = reply_rx.recv() => {
                    if event_loop.swarm.behaviour_mut().request_response.send_response(channel, response).is_err() {
                        tracing::warn!("Response channel closed before the reply was sent");
                    }
                }
            }
        }
    });

    Ok(local_peer_id)
}

/// A node may only introduce itself with the key its peer id was derived from
pub fn verify_introduction(peer: &PeerId, info: &NodeInfo) -> bool {
    matches!(peer_id_for(&info.party.owning_key), Ok(expected) if expected == *peer)
}

impl EventLoop {
    fn handle_swarm_event(&mut self, event: SwarmEvent<IouBehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(IouBehaviourEvent::RequestResponse(rr_event)) => {
                self.handle_request_response(rr_event);
            }
            SwarmEvent::Behaviour(IouBehaviourEvent::Mdns(mdns_event)) => match mdns_event {
                libp2p::mdns::Event::Discovered(peers) => {
                    for (peer_id, addr) in peers {
                        tracing::info!("mDNS discovered peer: {} at {}", peer_id, addr);
                        self.swarm.behaviour_mut().kademlia.add_address(&peer_id, addr.clone());
                        if !self.swarm.is_connected(&peer_id) {
                            let _ = self.swarm.dial(addr);
                        }
                    }
                }
                libp2p::mdns::Event::Expired(peers) => {
                    for (peer_id, _addr) in peers {
                        tracing::debug!("mDNS peer expired: {}", peer_id);
                    }
                }
            },
            SwarmEvent::Behaviour(IouBehaviourEvent::Kademlia(kad_event)) => {
                if let libp2p::kad::Event::RoutingUpdated { peer, .. } = kad_event {
                    tracing::debug!("Kademlia routing updated for peer: {}", peer);
                }
            }
            SwarmEvent::Behaviour(IouBehaviourEvent::Identify(identify_event)) => {
                if let libp2p::identify::Event::Received { peer_id, info, .. } = identify_event {
                    tracing::debug!("Identified peer {}: {:?}", peer_id, info.protocols);
                    for addr in info.listen_addrs {
                        self.swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
                    }
                }
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                tracing::info!("Listening on {}", address);
            }
            SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                tracing::info!("Connected to peer: {}", peer_id);
                if let ConnectedPoint::Dialer { address, .. } = endpoint {
                    self.dialed.insert(peer_id, address);
                }
                let request_id = self
                    .swarm
                    .behaviour_mut()
                    .request_response
                    .send_request(&peer_id, FlowRequest::Hello(self.local_info.clone()));
                self.pending.insert(request_id, PendingRequest::Hello);
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                tracing::info!("Disconnected from peer: {}", peer_id);
            }
            _ => {}
        }
    }

    fn handle_request_response(&mut self, event: request_response::Event<FlowRequest, FlowResponse>) {
        match event {
            request_response::Event::Message { peer, message, .. } => match message {
                request_response::Message::Request { request, channel, .. } => {
                    if let FlowRequest::Hello(ref info) = request {
                        self.introduce(&peer, info);
                    }
                    let from = match self.db.find_peer_by_peer_id(&peer.to_string()) {
                        Ok(record) => record.map(|r| r.info.party),
                        Err(e) => {
                            tracing::error!("Failed to look up peer {}: {}", peer, e);
                            None
                        }
                    };

                    let responder = self.responder.clone();
                    let reply_tx = self.reply_tx.clone();
                    tokio::spawn(async move {
                        let response = responder.handle(from.as_ref(), request).await;
                        let _ = reply_tx.send((channel, response));
                    });
                }
                request_response::Message::Response { request_id, response } => {
                    match self.pending.remove(&request_id) {
                        Some(PendingRequest::Flow(tx)) => {
                            let _ = tx.send(Ok(response));
                        }
                        Some(PendingRequest::Hello) => {
                            if let FlowResponse::Hello(info) = response {
                                self.introduce(&peer, &info);
                            }
                        }
                        None => tracing::debug!("Unsolicited response from {}", peer),
                    }
                }
            },
            request_response::Event::OutboundFailure { peer, request_id, error, .. } => {
                tracing::warn!("Request to {} failed: {}", peer, error);
                if let Some(PendingRequest::Flow(tx)) = self.pending.remove(&request_id) {
                    let _ = tx.send(Err(FlowError::Transport(format!(
                        "Request to {} failed: {}",
                        peer, error
                    ))));
                }
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                tracing::warn!("Inbound request from {} failed: {}", peer, error);
            }
            request_response::Event::ResponseSent { .. } => {}
        }
    }

    fn handle_command(&mut self, cmd: P2PCommand) {
        match cmd {
            P2PCommand::SendRequest { peer_id, request, response_tx } => {
                tracing::debug!("Sending '{}' to {}", request.label(), peer_id);
                let request_id = self
                    .swarm
                    .behaviour_mut()
                    .request_response
                    .send_request(&peer_id, request);
                self.pending.insert(request_id, PendingRequest::Flow(response_tx));
            }
            P2PCommand::ConnectPeer { addr, response_tx } => match self.swarm.dial(addr.clone()) {
                Ok(_) => {
                    tracing::info!("Dialing {}", addr);
                    let _ = response_tx.send(Ok(()));
                }
                Err(e) => {
                    let _ = response_tx.send(Err(format!("Dial error: {}", e)));
                }
            },
            P2PCommand::GetConnectedPeers { response_tx } => {
                let _ = response_tx.send(self.swarm.connected_peers().copied().collect());
            }
        }
    }

    /// Add a peer that proved its key to the directory
    fn introduce(&mut self, peer: &PeerId, info: &NodeInfo) {
        if !verify_introduction(peer, info) {
            tracing::warn!(
                "Peer {} introduced itself as {} with a key it does not own",
                peer,
                info.party
            );
            return;
        }

        let address = self.dialed.get(peer).cloned();
        if let Some(ref addr) = address {
            self.swarm.behaviour_mut().kademlia.add_address(peer, addr.clone());
        }
        let address = address.map(|a| a.to_string());
        match self.db.upsert_peer(info, Some(&peer.to_string()), address.as_deref()) {
            Ok(()) => tracing::info!(
                "Met {} ({}{})",
                info.party,
                if info.notary { "notary, " } else { "" },
                info.network
            ),
            Err(e) => tracing::warn!("Not storing peer {}: {}", info.party, e),
        }
    }
}
