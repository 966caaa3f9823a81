//! Application orchestrator: wires the gateway components together.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hvacvibe_commands::{CommandRouter, PairingRegistry, ViewerSettings, run_status_loop};
use hvacvibe_ingest::{Ingestion, Radio, SimulatedRadio};
use hvacvibe_live_hub::{HubServer, LiveHub, run_fanout};
use hvacvibe_store::SensorStore;
use hvacvibe_sync::{RemoteSync, from_settings};

use crate::config::{Config, RadioBackend};

/// Runs the gateway until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    // -- Store --
    let store = SensorStore::new(config.store.to_store_config());
    let publisher = from_settings(&config.publisher, &cancel)?;

    // -- Radio + ingestion --
    let radio: Arc<dyn Radio> = match config.radio.backend {
        RadioBackend::Simulated => {
            tracing::info!(
                devices = config.radio.devices.len(),
                "using simulated radio"
            );
            Arc::new(SimulatedRadio::new(
                config.radio.simulated_devices(),
                config.radio.sample_period(),
            ))
        }
    };
    let ingestion = Arc::new(Ingestion::new(
        radio,
        store.clone(),
        config.radio.to_producer_config(),
        config.radio.device_prefix.clone(),
        cancel.child_token(),
    ));

    // -- Commands --
    let registry = Arc::new(PairingRegistry::open(config.pairing.path.clone())?);
    let settings = Arc::new(ViewerSettings::open(config.settings.path.clone())?);
    let hub = Arc::new(LiveHub::new(config.server.viewer_queue.max(1)));
    let router = CommandRouter::new(
        store.clone(),
        Arc::clone(&ingestion),
        Arc::new(config.network.to_nmcli()),
        registry,
        Arc::clone(&hub),
        config.radio.to_router_config(),
    )
    .with_settings(settings);
    router.start_paired().await;

    // -- Viewer server --
    let server = HubServer::new(
        config.server.to_server_config(),
        Arc::clone(&hub),
        Arc::new(router.clone()),
        cancel.child_token(),
    );
    let server_run = Arc::clone(&server);
    let server_task = tokio::spawn(async move {
        if let Err(e) = server_run.run().await {
            tracing::error!("viewer server error: {e}");
        }
    });

    // Wait for the server to bind.
    let port = loop {
        let p = server.port().await;
        if p > 0 {
            break p;
        }
        if server_task.is_finished() {
            cancel.cancel();
            ingestion.stop_all().await;
            anyhow::bail!("viewer server failed to start");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    tracing::info!(port, "viewers can connect");

    let mut tasks: Vec<(&str, JoinHandle<()>)> = vec![("viewer server", server_task)];

    // -- Live fan-out + periodic status --
    tasks.push((
        "fan-out",
        tokio::spawn(run_fanout(store.clone(), Arc::clone(&hub), cancel.child_token())),
    ));
    tasks.push((
        "status loop",
        tokio::spawn(run_status_loop(
            router,
            config.status.interval(),
            cancel.child_token(),
        )),
    ));

    // -- Remote sync --
    let sync = RemoteSync::new(store.clone(), publisher, config.sync.to_sync_config());
    let mut sync_status = sync.status();
    tokio::spawn(async move {
        while sync_status.changed().await.is_ok() {
            let status = sync_status.borrow_and_update().clone();
            match &status.last_error {
                Some(err) => tracing::debug!(
                    pending = status.pending,
                    failures = status.consecutive_failures,
                    "sync status: {err}"
                ),
                None => tracing::debug!(
                    pending = status.pending,
                    sent_today = status.records_sent_today,
                    "sync status: ok"
                ),
            }
        }
    });
    tasks.push(("remote sync", tokio::spawn(sync.run(cancel.child_token()))));

    tracing::info!("gateway ready");

    // -- Main loop: wait for shutdown --
    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::info!("shutdown signal received");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("failed to listen for Ctrl-C: {e}");
            }
            tracing::info!("SIGINT received, shutting down");
        }
    }

    // -- Graceful shutdown --
    tracing::info!("stopping services...");
    cancel.cancel();
    server.shutdown();
    for (name, task) in tasks {
        if let Err(e) = task.await {
            tracing::warn!("{name} task ended abnormally: {e}");
        }
    }
    ingestion.stop_all().await;
    tracing::info!("gateway stopped");

    Ok(())
}
