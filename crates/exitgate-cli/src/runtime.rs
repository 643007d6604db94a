//! Lane assembly from a [`LaneConfig`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use exitgate_core::LaneConfig;
use exitgate_engine::{ExitEngine, GateState, LaneEvent, LaneHandle, LaneSettings};
use exitgate_hardware::GateDriver;
use exitgate_storage::{MemberCache, SqliteTransactionStore};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A started lane with its store, cache and gate driver.
pub struct LaneRuntime {
    engine: ExitEngine,
    cache: Option<Arc<MemberCache>>,
    cache_ttl: Duration,
}

impl LaneRuntime {
    pub async fn start(config: &LaneConfig) -> Result<Self> {
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(MemberCache::from_config(&config.cache)));

        let mut store = SqliteTransactionStore::from_config(config)
            .await
            .with_context(|| format!("failed to open store at {}", config.store.database_path))?;
        if let Some(cache) = &cache {
            store = store.with_member_cache(Arc::clone(cache));
        }

        let mut builder = ExitEngine::builder(Arc::new(store), GateDriver::from_config(config))
            .settings(LaneSettings::from_config(config));
        if let Some(cache) = &cache {
            builder = builder.cache(Arc::clone(cache));
        }
        let engine = builder.start().await.context("failed to start exit lane")?;

        Ok(Self {
            engine,
            cache,
            cache_ttl: config.cache_ttl(),
        })
    }

    pub fn handle(&self) -> LaneHandle {
        self.engine.handle()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.engine.shutdown_token()
    }

    /// Periodically drop expired member cards; `None` without a cache.
    pub fn spawn_cache_sweeper(&self) -> Option<JoinHandle<()>> {
        let cache = Arc::clone(self.cache.as_ref()?);
        let cancel = self.shutdown_token();
        let period = self.cache_ttl.max(Duration::from_secs(1));

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = cache.cleanup_expired();
                        if removed > 0 {
                            debug!(removed, "expired member cards dropped");
                        }
                    }
                }
            }
        }))
    }

    pub async fn shutdown(self) {
        self.engine.shutdown().await;
    }
}

/// Print processed exits as JSON lines until the lane stops.
pub fn spawn_event_printer(lane: &LaneHandle, cancel: CancellationToken) -> JoinHandle<()> {
    let mut events = lane.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(LaneEvent::ExitProcessed { identifier, result }) => {
                    match serde_json::to_string(&serde_json::json!({
                        "identifier": identifier,
                        "result": result,
                    })) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!(error = %e, "exit result not printable"),
                    }
                }
                Ok(LaneEvent::Feedback { tone }) => debug!(?tone, "feedback"),
                Ok(LaneEvent::GateChanged { .. }) => {}
                Err(RecvError::Lagged(missed)) => warn!(missed, "event printer lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Wait until the gate is down again, or until interrupted.
///
/// Used by one-shot commands so the auto-close period is honoured before
/// the process shuts the lane down.
pub async fn wait_for_gate_down(lane: &LaneHandle) -> Result<()> {
    let mut events = lane.subscribe();
    let state = lane.gate_status().await?.state;
    if matches!(state, GateState::Closed | GateState::Error | GateState::Degraded) {
        return Ok(());
    }

    info!(%state, "waiting for the gate to close, Ctrl-C to close now");
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => return Ok(()),
            event = events.recv() => match event {
                Ok(LaneEvent::GateChanged { to: GateState::Closed | GateState::Error, .. }) => {
                    return Ok(());
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}
