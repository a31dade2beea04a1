use solaros_bridge::{
    api,
    bridge::{BridgeSettings, MqttSink, PublishBridge},
    config::{Config, ServerConfig},
    display, mqtt,
    portal::PortalClient,
    scheduler::{RefreshScheduler, SchedulerConfig},
    scrape::Scraper,
    SnapshotCache,
};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cfg_path = std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.yaml".into());
    let cfg = match Config::load(&cfg_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("failed to load {cfg_path}: {e}");
            std::process::exit(1);
        }
    };
    info!(
        refresh_secs = cfg.refresh_secs,
        server = cfg.server.is_some(),
        mqtt = cfg.mqtt.is_some(),
        "loaded config from {}",
        cfg_path
    );

    let cache = SnapshotCache::new();

    if let Some(mqtt_cfg) = &cfg.mqtt {
        let opts = mqtt::build_options(mqtt_cfg);
        let (client, eventloop) = mqtt::connect(
            opts,
            Duration::from_secs(mqtt_cfg.connect_timeout_secs),
        )
        .await?;
        info!(host = %mqtt_cfg.host, port = mqtt_cfg.port, "connected to MQTT broker");

        let (link_tx, link_rx) = watch::channel(mqtt::LinkStatus::connected(1));
        let backoff = mqtt::Backoff::new(
            Duration::from_secs(mqtt_cfg.reconnect_initial_secs),
            Duration::from_secs(mqtt_cfg.reconnect_max_secs),
        );
        tokio::spawn(mqtt::supervise(eventloop, link_tx, backoff));

        let sink = MqttSink::new(client, mqtt::qos(mqtt_cfg.qos));
        let bridge = PublishBridge::new(sink, BridgeSettings::from_config(mqtt_cfg));
        tokio::spawn(bridge.run(cache.subscribe(), link_rx));
    } else {
        info!("MQTT not configured, publish bridge disabled");
    }

    let scraper = Scraper::new(PortalClient::new(cfg.portal.clone())?)?;
    let scheduler = RefreshScheduler::new(
        scraper,
        cache.clone(),
        SchedulerConfig {
            refresh_secs: cfg.refresh_secs,
        },
    );

    tokio::select! {
        _ = scheduler.run() => {}
        res = serve(cfg.server.clone(), cache) => res?,
        _ = shutdown_signal() => {}
    }

    info!("shutdown complete");
    Ok(())
}

async fn serve(server: Option<ServerConfig>, cache: SnapshotCache) -> anyhow::Result<()> {
    let Some(server) = server else {
        info!("server not configured, query endpoint disabled");
        return std::future::pending().await;
    };

    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Starting HTTP server on {}", addr);

    let url = display::browse_url(display::outbound_ip(), server.port, &server.path);
    if server.open_browser {
        info!("Opening {}", url);
        display::open_browser(&url);
    } else {
        info!("Access {} to see json data", url);
    }

    let app = api::create_router(cache, &server.path);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
