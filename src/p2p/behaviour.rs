use libp2p::{
    identify, kad, mdns,
    request_response::{self, ProtocolSupport},
    swarm::NetworkBehaviour,
};
use std::time::Duration;

use super::protocol::{FlowRequest, FlowResponse, PROTOCOL_NAME};

/// How long a peer has to answer a flow request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// IOU node's composite network behaviour
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "IouBehaviourEvent")]
pub struct IouBehaviour {
    /// Flow requests between parties and to the notary
    pub request_response: request_response::cbor::Behaviour<FlowRequest, FlowResponse>,
    /// Address book for known peers
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    /// Local peer discovery
    pub mdns: mdns::tokio::Behaviour,
    /// Peer identification
    pub identify: identify::Behaviour,
}

/// Combined events from all sub-behaviours
#[derive(Debug)]
pub enum IouBehaviourEvent {
    RequestResponse(request_response::Event<FlowRequest, FlowResponse>),
    Kademlia(kad::Event),
    Mdns(mdns::Event),
    Identify(identify::Event),
}

impl From<request_response::Event<FlowRequest, FlowResponse>> for IouBehaviourEvent {
    fn from(e: request_response::Event<FlowRequest, FlowResponse>) -> Self {
        IouBehaviourEvent::RequestResponse(e)
    }
}

impl From<kad::Event> for IouBehaviourEvent {
    fn from(e: kad::Event) -> Self {
        IouBehaviourEvent::Kademlia(e)
    }
}

impl From<mdns::Event> for IouBehaviourEvent {
    fn from(e: mdns::Event) -> Self {
        IouBehaviourEvent::Mdns(e)
    }
}

impl From<identify::Event> for IouBehaviourEvent {
    fn from(e: identify::Event) -> Self {
        IouBehaviourEvent::Identify(e)
    }
}

impl IouBehaviour {
    pub fn new(
        local_peer_id: libp2p::PeerId,
        keypair: &libp2p::identity::Keypair,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let request_response = request_response::cbor::Behaviour::new(
            [(PROTOCOL_NAME, ProtocolSupport::Full)],
            request_response::Config::default().with_request_timeout(REQUEST_TIMEOUT),
        );

        let store = kad::store::MemoryStore::new(local_peer_id);
        let mut kademlia = kad::Behaviour::new(local_peer_id, store);
        kademlia.set_mode(Some(kad::Mode::Server));

        let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)?;

        let identify = identify::Behaviour::new(identify::Config::new(
            "/iou/id/1.0.0".to_string(),
            keypair.public(),
        ));

        Ok(Self {
            request_response,
            kademlia,
            mdns,
            identify,
        })
    }
}
