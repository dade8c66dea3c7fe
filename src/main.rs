mod api;
mod contract;
mod crypto;
mod error;
mod flow;
mod models;
mod notary;
mod p2p;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use clap::Parser;
use libp2p::Multiaddr;
use tokio::sync::mpsc;

use crypto::keys::NodeIdentity;
use flow::acceptor::{AcceptancePolicy, Acceptor};
use flow::responder::Responder;
use flow::services::FlowServices;
use models::party::{NodeInfo, NotaryRef};
use notary::NotaryService;
use p2p::node::P2PCommand;
use p2p::transport::SwarmTransport;
use store::db::Database;
use store::directory::PeerDirectory;

/// Shared application state
pub struct AppState {
    pub identity: Arc<NodeIdentity>,
    pub db: Arc<Database>,
    pub services: FlowServices,
    pub p2p_tx: mpsc::Sender<P2PCommand>,
    pub peer_id: libp2p::PeerId,
    pub local_info: NodeInfo,
}

/// IOU Core — two-party agreement and notarisation node
#[derive(Parser, Debug)]
#[command(name = "iou-core", version, about)]
struct Args {
    /// Legal name of this node's party
    #[arg(long, env = "IOU_NAME")]
    name: String,

    /// REST API port
    #[arg(long, env = "IOU_PORT", default_value_t = 8420)]
    port: u16,

    /// libp2p swarm port
    #[arg(long, env = "IOU_P2P_PORT", default_value_t = 9420)]
    p2p_port: u16,

    /// Data directory
    #[arg(long, env = "IOU_DATA_DIR")]
    data_dir: Option<String>,

    /// Network whose notary this node uses
    #[arg(long, env = "IOU_NETWORK", default_value = "local")]
    network: String,

    /// Notary to use, by party name or base58 public key
    #[arg(long, env = "IOU_NOTARY")]
    notary: Option<NotaryRef>,

    /// Run the notary service on this node
    #[arg(long, env = "IOU_RUN_NOTARY")]
    run_notary: bool,

    /// Refuse to counter-sign IOUs above this amount
    #[arg(long, env = "IOU_MAX_AMOUNT")]
    max_amount: Option<i64>,

    /// Peers to dial on startup
    #[arg(long, env = "IOU_BOOTSTRAP", value_delimiter = ',')]
    bootstrap: Vec<Multiaddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let data_dir = if let Some(ref dir) = args.data_dir {
        PathBuf::from(dir)
    } else {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("iou")
            .join(&args.name)
    };

    tracing::info!("Data directory: {:?}", data_dir);

    let identity = Arc::new(NodeIdentity::load_or_create(&data_dir, &args.name)?);
    tracing::info!("Party: {} ({})", identity.party, identity.party_key());

    let db = Arc::new(Database::open(&data_dir)?);
    tracing::info!("Database initialized");

    let local_info = NodeInfo {
        party: identity.party.clone(),
        network: args.network.clone(),
        notary: args.run_notary,
    };
    let keypair = identity.libp2p_keypair()?;
    let local_peer_id = libp2p::PeerId::from(keypair.public());
    db.upsert_peer(&local_info, Some(&local_peer_id.to_string()), None)?;

    // A notary node uses itself unless told otherwise
    let trusted_notary = args
        .notary
        .clone()
        .or_else(|| args.run_notary.then(|| NotaryRef::Key(identity.party_key())));
    match trusted_notary {
        Some(ref notary) => tracing::info!("Using notary {}", notary),
        None => tracing::warn!("No notary configured; IOUs cannot be issued from this node"),
    }

    // The transport needs the command channel before the swarm exists
    let (p2p_tx, p2p_rx) = mpsc::channel::<P2PCommand>(256);
    let services = FlowServices {
        network: args.network.clone(),
        signer: identity.clone(),
        directory: Arc::new(PeerDirectory::new(db.clone(), trusted_notary)),
        transport: Arc::new(SwarmTransport::new(p2p_tx.clone())),
        store: db.clone(),
        checkpoints: db.clone(),
    };

    let policy = AcceptancePolicy {
        max_amount: args.max_amount,
    };
    let notary_service = if args.run_notary {
        tracing::info!("Notary service enabled for network '{}'", args.network);
        Some(NotaryService::new(identity.clone(), db.clone()))
    } else {
        None
    };
    let responder = Arc::new(Responder::new(
        local_info.clone(),
        Acceptor::new(services.clone(), policy),
        notary_service,
    ));

    let peer_id = p2p::node::start_node(
        args.p2p_port,
        keypair,
        db.clone(),
        local_info.clone(),
        responder,
        args.bootstrap.clone(),
        p2p_rx,
    )
    .await?;

    tracing::info!("P2P node started, peer ID: {}", peer_id);

    let resumed = flow::resume_pending(&services).await?;
    if resumed > 0 {
        tracing::info!("Resumed {} suspended flow(s)", resumed);
    }

    let api_port = args.port;
    let state = web::Data::new(AppState {
        identity: identity.clone(),
        db: db.clone(),
        services,
        p2p_tx,
        peer_id,
        local_info,
    });

    tracing::info!("Starting REST API on 127.0.0.1:{}", api_port);

    println!("\n╔══════════════════════════════════════════╗");
    println!("║         IOU CORE v0.1.0                  ║");
    println!("╠══════════════════════════════════════════╣");
    println!("║  Party:     {:<28} ║", identity.party.name);
    println!("║  Network:   {:<28} ║", args.network);
    println!("║  Notary:    {:<28} ║", args.run_notary);
    println!("║  API:       http://127.0.0.1:{:<5}       ║", api_port);
    println!("║  P2P:       /ip4/0.0.0.0/tcp/{:<5}      ║", args.p2p_port);
    println!("╚══════════════════════════════════════════╝\n");

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            // Identity
            .service(api::identity::get_identity)
            // IOUs
            .service(api::ious::create_iou)
            .service(api::ious::list_ious)
            .service(api::ious::get_transaction)
            // Peers
            .service(api::peers::list_peers)
            .service(api::peers::connect_peer)
    })
    .bind(format!("127.0.0.1:{}", api_port))?
    .run()
    .await?;

    Ok(())
}
