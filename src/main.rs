//! chanbridge service
//!
//! Wires the route map, the bus, the policy client, the lifecycle event
//! consumer and the LoRa bridge together. Devices connect to the WebSocket
//! adapter; the network server and the entity service push uplinks and
//! lifecycle events to the integration feed. Runs until ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use chanbridge::authz::HttpAuthzClient;
use chanbridge::broker::{Broker, Protocol};
use chanbridge::config::{DEFAULT_CONFIG_FILE, Settings, load_config_from};
use chanbridge::events::{EventHandler, consumer};
use chanbridge::lora::{Forwarder, LoraService};
use chanbridge::persistence::SledRouteMap;
use chanbridge::session::{Ingress, PersistentHandler};
use chanbridge::transport::feed::{Feed, start_feed_server};
use chanbridge::transport::websocket::start_websocket_server;
use chanbridge::utils::{Result, logging};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const FORWARDER_ID: &str = "lora-forwarder";

#[derive(Parser)]
#[command(name = "chanbridge", about = "IoT protocol adapter core")]
struct Cli {
    /// Configuration file, with or without extension
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Overrides the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = match load_config_from(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(cli.log_level.as_deref().unwrap_or(settings.log.level.as_str()));

    if let Err(e) = run(settings).await {
        error!("Service failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(settings: Settings) -> Result<()> {
    let routes = Arc::new(SledRouteMap::open(&settings.route_map.path)?);
    let broker = Arc::new(Broker::new(&settings.bus.subject_prefix));
    let authz = Arc::new(HttpAuthzClient::new(
        &settings.authz.url,
        Duration::from_millis(settings.authz.timeout_ms),
    )?);
    let shutdown = CancellationToken::new();

    let lora = Arc::new(LoraService::new(routes.clone(), broker.clone()));
    let events = EventHandler::new(lora.clone()).with_metadata_key(&settings.lora.metadata_key);
    let event_stream = consumer::from_bus(&broker, &settings.bus.events_subject);
    let consumer_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer::run(event_stream, &events, shutdown).await })
    };

    // no network-server client is wired in yet; downlinks are logged
    let (downlink_tx, mut downlink_rx) = mpsc::unbounded_channel::<(String, Vec<u8>)>();
    tokio::spawn(async move {
        while let Some((topic, payload)) = downlink_rx.recv().await {
            info!(%topic, bytes = payload.len(), "downlink");
        }
    });
    let forwarder = Forwarder::new(routes.clone(), Arc::new(downlink_tx));
    let deliveries = broker.attach(FORWARDER_ID, &format!("{}.>", broker.prefix()));
    let forwarder_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { forwarder.run(deliveries, shutdown).await })
    };

    let feed = Arc::new(Feed::new(lora, broker.clone(), &settings.bus.events_subject));
    let feed_server = {
        let addr = settings.feed_addr();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { start_feed_server(&addr, feed, shutdown).await })
    };

    let ingress = Ingress::new(Protocol::Websocket, authz, broker.clone())
        .with_publish_timeout(Duration::from_millis(settings.authz.timeout_ms));
    let handler = Arc::new(PersistentHandler::from_ingress(ingress));
    let server = {
        let addr = settings.server_addr();
        let broker = broker.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { start_websocket_server(&addr, broker, handler, shutdown).await })
    };

    tokio::select! {
        res = server => {
            match res {
                Ok(Ok(())) => info!("WebSocket server exited."),
                Ok(Err(e)) => error!("WebSocket server failed: {}", e),
                Err(e) => error!("WebSocket server task panicked: {}", e),
            }
        }
        res = feed_server => {
            match res {
                Ok(Ok(())) => info!("Integration feed exited."),
                Ok(Err(e)) => error!("Integration feed failed: {}", e),
                Err(e) => error!("Integration feed task panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    shutdown.cancel();
    broker.close();
    let applied = consumer_task.await.unwrap_or_default();
    let _ = forwarder_task.await;
    routes.flush()?;
    info!(applied, "stopped");
    Ok(())
}
