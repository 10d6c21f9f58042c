//! `convoy run`

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use convoy_core::GroupRuntimeState;
use convoy_runtime::{
    ControllerConfig, DockerDriver, DockerNetworkBackend, GroupController, GroupHandle, RestartPolicy,
};

use crate::cli::RunArgs;
use crate::manifest;

pub async fn execute(args: RunArgs) -> Result<()> {
    info!("🚚 Starting Convoy");

    let group = manifest::load(args.manifest.as_deref())?;
    info!("📦 Group: {} ({} containers)", group.name, group.containers.len());

    let config = ControllerConfig::default()
        .with_volume_root(&args.volume_root)
        .with_grace_period(Duration::from_secs(args.grace_secs))
        .with_restart(RestartPolicy::default().with_max_restarts(args.max_restarts));
    debug!(?config, "Controller configured");

    let controller = GroupController::new(
        Arc::new(DockerDriver::new(&args.docker)),
        Arc::new(DockerNetworkBackend::new(&args.docker)),
        config,
    );

    let handle = controller
        .apply(group)
        .await
        .context("Failed to start group")?;

    watch_until_interrupted(&handle).await?;

    info!("🛑 Stopping group {}...", handle.name());
    let teardown = handle.teardown().await;

    print!("{}", handle.status().await);

    teardown.context("Teardown left resources behind")?;
    info!("✅ Group stopped");
    Ok(())
}

/// Log group state changes until Ctrl+C
async fn watch_until_interrupted(handle: &GroupHandle) -> Result<()> {
    info!("⏸️  Group running. Press Ctrl+C to stop...");

    let mut events = handle.subscribe();
    let mut last = GroupRuntimeState::Initializing;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("Failed to listen for Ctrl+C")?;
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(_) => {
                    let state = handle.status().await.state;
                    if state != last {
                        match state {
                            GroupRuntimeState::Degraded => warn!("⚠️  Group {} is degraded", handle.name()),
                            _ => info!("Group {} is {}", handle.name(), state),
                        }
                        last = state;
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Event stream lagged"),
                Err(RecvError::Closed) => {
                    // aggregator is gone; nothing left to report
                    tokio::signal::ctrl_c()
                        .await
                        .context("Failed to listen for Ctrl+C")?;
                    return Ok(());
                }
            },
        }
    }
}
