//! Lane worker, its handle and the engine that starts them.
//!
//! One worker task per exit lane owns the gate driver and the gate state
//! machine. Exits and gate commands reach it through a single FIFO channel,
//! so resolve, close and actuate for one exit never interleave with another
//! exit on the same lane. Everything else talks to the lane through a
//! cloneable [`LaneHandle`].
//!
//! ```text
//! scanner ──> bridge ─┐
//!                     ├──> LaneHandle ──mpsc──> LaneWorker ──> GateDriver
//! operator (CLI) ─────┘                             │
//!                                                   ├──> TransactionStore
//!                                                   └──broadcast──> LaneEvent
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, NaiveTime, Utc};
use exitgate_core::constants::{
    CACHED_EXIT_BUDGET_MS, CLOSE_RETRY_BACKOFF_MAX_MS, CLOSE_RETRY_BACKOFF_MIN_MS,
    CLOSE_RETRY_LIMIT, DEFAULT_ATTACHMENT_RETRY_ATTEMPTS, DEFAULT_AUTO_CLOSE_SECS,
    DEFAULT_DEGRADED_AFTER_SECS, DEFAULT_GATE_ID, DEFAULT_OPERATOR, EXIT_SNAPSHOT_NAME,
    FALLBACK_EXIT_BUDGET_MS, SHUTDOWN_FLUSH_SECS, SNAPSHOT_CONTENT_TYPE, VIEW_EXIT_BUDGET_MS,
};
use exitgate_core::{Identifier, LaneConfig, RecordKind, TariffSchedule};
use exitgate_hardware::{GateDriver, HardwareError};
use exitgate_storage::{
    CacheStats, DesignDoc, ExitSummary, MemberCache, StoreError, StoreResult, StoredRecord,
    TransactionStore, ViewQuery,
};
use rand::Rng;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::attachments::AttachmentQueue;
use crate::clock::{Clock, SystemClock};
use crate::diagnostics::{Diagnostics, GateStatus, STATUS_HISTORY_LEN};
use crate::error::{EngineError, EngineResult};
use crate::events::{LaneEvent, Tone};
use crate::metrics::{LaneMetrics, MetricsSnapshot};
use crate::resolver::{ResolveError, Resolver};
use crate::result::{ExitResult, ResultCode, SearchMethod};
use crate::state_machine::{GateState, GateStateMachine};

/// Default capacity of the lane command channel.
const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// Default capacity of the lane event channel.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Interval between two retry rounds of queued snapshots.
const DEFAULT_ATTACHMENT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Lane behaviour knobs.
#[derive(Debug, Clone)]
pub struct LaneSettings {
    /// Gate recorded on exits that do not name one.
    pub gate_id: String,
    /// Operator recorded on exits that do not name one.
    pub operator: String,
    /// How long the barrier stays up before closing on its own.
    pub auto_close: Duration,
    /// Continuous store unavailability after which the lane degrades.
    pub degraded_after: Duration,
    /// Hard limit on resolving an identifier.
    pub exit_budget: Duration,
    pub attachment_retry_attempts: u32,
    pub attachment_retry_interval: Duration,
    pub tariffs: TariffSchedule,
    /// Fill the member cache from the store when the lane starts.
    pub preload_members: bool,
    pub command_capacity: usize,
    pub event_capacity: usize,
}

impl Default for LaneSettings {
    fn default() -> Self {
        Self {
            gate_id: DEFAULT_GATE_ID.to_string(),
            operator: DEFAULT_OPERATOR.to_string(),
            auto_close: Duration::from_secs(DEFAULT_AUTO_CLOSE_SECS),
            degraded_after: Duration::from_secs(DEFAULT_DEGRADED_AFTER_SECS),
            exit_budget: Duration::from_millis(FALLBACK_EXIT_BUDGET_MS),
            attachment_retry_attempts: DEFAULT_ATTACHMENT_RETRY_ATTEMPTS,
            attachment_retry_interval: DEFAULT_ATTACHMENT_RETRY_INTERVAL,
            tariffs: TariffSchedule::default(),
            preload_members: true,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl LaneSettings {
    pub fn from_config(config: &LaneConfig) -> Self {
        Self {
            gate_id: config.system.gate_id.clone(),
            operator: config.system.operator.clone(),
            auto_close: config.auto_close_timeout(),
            degraded_after: config.degraded_after(),
            attachment_retry_attempts: config.system.attachment_retry_attempts,
            tariffs: config.tariff.clone(),
            preload_members: config.cache.enabled && config.cache.preload,
            ..Self::default()
        }
    }
}

/// An exit to process.
///
/// ```
/// use bytes::Bytes;
/// use exitgate_engine::ExitRequest;
///
/// let request = ExitRequest::new("IMGTEST001")
///     .operator("TEST")
///     .gate_id("EXIT_GATE_01")
///     .snapshot(Bytes::from_static(b"\xff\xd8"));
/// assert_eq!(request.identifier, "IMGTEST001");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExitRequest {
    pub identifier: String,
    /// Falls back to the lane's operator.
    pub operator: Option<String>,
    /// Falls back to the lane's gate id.
    pub gate_id: Option<String>,
    /// JPEG taken by the exit camera.
    pub snapshot: Option<Bytes>,
}

impl ExitRequest {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }

    pub fn operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn gate_id(mut self, gate_id: impl Into<String>) -> Self {
        self.gate_id = Some(gate_id.into());
        self
    }

    pub fn snapshot(mut self, snapshot: Bytes) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

/// Commands served by the lane worker.
#[derive(Debug)]
enum LaneCommand {
    Exit {
        request: ExitRequest,
        reply: oneshot::Sender<ExitResult>,
    },
    OpenGate {
        reply: oneshot::Sender<EngineResult<GateState>>,
    },
    CloseGate {
        reply: oneshot::Sender<EngineResult<GateState>>,
    },
    ResetGate {
        reply: oneshot::Sender<GateState>,
    },
    GateStatus {
        reply: oneshot::Sender<GateStatus>,
    },
    Diagnostics {
        reply: oneshot::Sender<Diagnostics>,
    },
    Metrics {
        reply: oneshot::Sender<MetricsSnapshot>,
    },
    /// Sent by the auto-close timer armed with `generation`.
    AutoClose { generation: u64 },
}

#[derive(Debug)]
struct AutoCloseTimer {
    generation: u64,
    deadline: Instant,
    task: JoinHandle<()>,
}

struct LaneWorker<S> {
    store: Arc<S>,
    cache: Option<Arc<MemberCache>>,
    resolver: Resolver<S>,
    driver: GateDriver,
    machine: GateStateMachine,
    settings: LaneSettings,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<LaneEvent>,
    metrics: LaneMetrics,
    attachments: AttachmentQueue,
    /// Used by auto-close timers to reach the worker.
    commands: mpsc::WeakSender<LaneCommand>,
    auto_close: Option<AutoCloseTimer>,
    generation: u64,
    outage_since: Option<Instant>,
    /// Set once an outage outlasts `degraded_after`; the gate shows DEGRADED
    /// whenever it comes back down while this holds.
    degraded: bool,
}

impl<S: TransactionStore> LaneWorker<S> {
    async fn run(mut self, mut commands: mpsc::Receiver<LaneCommand>, cancel: CancellationToken) {
        let mut retry_tick = tokio::time::interval(self.settings.attachment_retry_interval);
        retry_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        retry_tick.reset();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("lane cancelled");
                    break;
                }

                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        debug!("all lane handles dropped");
                        break;
                    }
                },

                _ = retry_tick.tick(), if !self.attachments.is_empty() => {
                    let stored = self.attachments.retry(&*self.store).await;
                    if stored > 0 {
                        debug!(stored, pending = self.attachments.len(), "snapshot retry round");
                    }
                }
            }
        }

        self.shutdown().await;
    }

    async fn handle(&mut self, command: LaneCommand) {
        match command {
            LaneCommand::Exit { request, reply } => {
                let result = self.process_exit(request).await;
                if reply.send(result).is_err() {
                    debug!("exit caller went away before the result");
                }
            }
            LaneCommand::OpenGate { reply } => {
                let _ = reply.send(self.open_gate().await);
            }
            LaneCommand::CloseGate { reply } => {
                let _ = reply.send(self.close_gate().await);
            }
            LaneCommand::ResetGate { reply } => {
                let _ = reply.send(self.reset_gate());
            }
            LaneCommand::GateStatus { reply } => {
                let _ = reply.send(self.gate_status());
            }
            LaneCommand::Diagnostics { reply } => {
                let _ = reply.send(self.diagnostics().await);
            }
            LaneCommand::Metrics { reply } => {
                let _ = reply.send(self.metrics().await);
            }
            LaneCommand::AutoClose { generation } => self.on_auto_close(generation).await,
        }
    }

    // ------------------------------------------------------------------
    // Exit
    // ------------------------------------------------------------------

    async fn process_exit(&mut self, request: ExitRequest) -> ExitResult {
        let started = Instant::now();
        let identifier = request.identifier.clone();
        let result = self.run_exit(request).await;
        let elapsed = started.elapsed();
        self.finish_exit(identifier, result.with_elapsed(elapsed.as_millis() as u64), elapsed)
    }

    async fn run_exit(&mut self, request: ExitRequest) -> ExitResult {
        let identifier = match Identifier::new(&request.identifier) {
            Ok(identifier) => identifier,
            Err(e) => return ExitResult::failure(ResultCode::InvalidIdentifier, e.to_string()),
        };

        if self.degraded
            && let Err(result) = self.recover_store().await
        {
            return result;
        }

        let budget = self.settings.exit_budget;
        let outcome = match tokio::time::timeout(budget, self.resolver.resolve(&identifier)).await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                return ExitResult::failure(
                    ResultCode::Timeout,
                    format!("no answer within {} ms", budget.as_millis()),
                );
            }
        };
        if !matches!(outcome, Err(ResolveError::Store(_))) {
            self.store_reachable();
        }
        let resolved = match outcome {
            Ok(resolved) => resolved,
            Err(ResolveError::NotFound(_)) => {
                return ExitResult::failure(
                    ResultCode::NotFound,
                    format!("no open record for {identifier}"),
                );
            }
            Err(ResolveError::AlreadyClosed { record_id }) => {
                return ExitResult::failure(
                    ResultCode::AlreadyClosed,
                    format!("record {record_id} is already closed"),
                )
                .with_record_id(record_id);
            }
            Err(ResolveError::Store(e)) => return self.store_failure(e),
        };

        let method = resolved.method;
        let operator = request
            .operator
            .unwrap_or_else(|| self.settings.operator.clone());
        let gate_id = request
            .gate_id
            .unwrap_or_else(|| self.settings.gate_id.clone());
        let closed = match self.close_record(resolved.stored, &operator, &gate_id).await {
            Ok(closed) => closed,
            Err(result) => return result.with_method(method),
        };

        let record = &closed.record;
        let duration_hours = record.exit_time.map_or(0.0, |exit| {
            (exit - record.entry_time).num_milliseconds() as f64 / 3_600_000.0
        });
        let result = ExitResult::closed(record.id.clone(), record.exit_fee, duration_hours, method);

        if let Some(snapshot) = request.snapshot {
            self.attach_snapshot(&record.id, snapshot).await;
        }
        if let Some(cache) = &self.cache {
            cache.invalidate(identifier.as_str());
            if let Some(card) = record.card_number() {
                cache.invalidate(card);
            }
        }

        self.actuate_exit(result).await
    }

    /// Close the record, re-reading and retrying on revision conflicts.
    async fn close_record(
        &mut self,
        mut current: StoredRecord,
        operator: &str,
        gate_id: &str,
    ) -> Result<StoredRecord, ExitResult> {
        let mut retries = 0;
        loop {
            let record = &current.record;
            let id = record.id.clone();
            let exit_time = self.clock.now();
            let fee = self.settings.tariffs.fee(
                record.category,
                record.vehicle_class,
                record.entry_time,
                exit_time,
            );
            let (op, gate) = (operator.to_string(), gate_id.to_string());

            let outcome = self
                .store
                .update(&id, &current.revision, move |r| {
                    r.close(exit_time, fee, &gate, &op)
                })
                .await;
            match outcome {
                Ok(closed) => return Ok(closed),
                Err(StoreError::Conflict { .. }) if retries < CLOSE_RETRY_LIMIT => {
                    retries += 1;
                    let backoff = rand::thread_rng()
                        .gen_range(CLOSE_RETRY_BACKOFF_MIN_MS..=CLOSE_RETRY_BACKOFF_MAX_MS);
                    warn!(record_id = %id, retries, backoff_ms = backoff, "closure conflicted, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;

                    current = match self.store.get(&id).await {
                        Ok(stored) if stored.record.is_open() => stored,
                        Ok(_) => {
                            return Err(ExitResult::failure(
                                ResultCode::AlreadyClosed,
                                format!("record {id} was closed concurrently"),
                            )
                            .with_record_id(id));
                        }
                        Err(e) => return Err(self.store_failure(e)),
                    };
                }
                Err(StoreError::Conflict { .. }) => {
                    return Err(ExitResult::failure(
                        ResultCode::Concurrent,
                        format!("gave up on {id} after {retries} conflicting writes"),
                    )
                    .with_record_id(id));
                }
                Err(StoreError::Rejected(e)) => {
                    return Err(
                        ExitResult::failure(ResultCode::AlreadyClosed, e.to_string())
                            .with_record_id(id),
                    );
                }
                Err(e) => return Err(self.store_failure(e)),
            }
        }
    }

    async fn attach_snapshot(&mut self, record_id: &str, snapshot: Bytes) {
        match self
            .store
            .put_attachment(record_id, EXIT_SNAPSHOT_NAME, snapshot.clone(), SNAPSHOT_CONTENT_TYPE)
            .await
        {
            Ok(revision) => debug!(record_id, revision = %revision, "exit snapshot attached"),
            Err(e) => {
                warn!(error = %e, record_id, "exit snapshot not attached, queued for retry");
                self.attachments.push(record_id, EXIT_SNAPSHOT_NAME, snapshot);
            }
        }
    }

    /// Raise the barrier for a closed record.
    async fn actuate_exit(&mut self, result: ExitResult) -> ExitResult {
        if self.machine.current_state() == GateState::Error {
            return result.with_code(
                ResultCode::HardwareError,
                "record closed but the gate is faulted",
            );
        }
        match self.raise().await {
            Ok(()) => result,
            Err(e) => result.with_code(
                ResultCode::HardwareError,
                format!("record closed but the gate did not open: {e}"),
            ),
        }
    }

    fn finish_exit(&mut self, identifier: String, result: ExitResult, elapsed: Duration) -> ExitResult {
        let method = result.search_method.map_or("none", SearchMethod::as_str);
        let record_id = result.record_id.as_deref().unwrap_or("-");
        if result.success {
            info!(
                identifier = %identifier,
                code = %result.code,
                method,
                elapsed_ms = result.elapsed_ms,
                fee = result.fee.unwrap_or_default(),
                record_id,
                "exit processed"
            );
        } else {
            warn!(
                identifier = %identifier,
                code = %result.code,
                method,
                elapsed_ms = result.elapsed_ms,
                fee = ?result.fee,
                record_id,
                message = %result.message,
                "exit refused"
            );
        }

        if let Some(method) = result.search_method {
            let budget = soft_budget(method);
            if elapsed > budget {
                warn!(
                    method = method.as_str(),
                    elapsed_ms = result.elapsed_ms,
                    budget_ms = budget.as_millis() as u64,
                    "exit over its latency budget"
                );
            }
        }

        self.metrics.record(&result);
        let tone = if result.success {
            Tone::Success
        } else {
            Tone::Error
        };
        self.publish(LaneEvent::Feedback { tone });
        self.publish(LaneEvent::ExitProcessed {
            identifier,
            result: result.clone(),
        });
        result
    }

    // ------------------------------------------------------------------
    // Store health
    // ------------------------------------------------------------------

    fn store_failure(&mut self, error: StoreError) -> ExitResult {
        if error.is_unavailable() {
            self.note_outage();
            ExitResult::failure(
                ResultCode::Unavailable,
                format!("transaction store unavailable: {error}"),
            )
        } else {
            error!(error = %error, "transaction store failed");
            ExitResult::failure(
                ResultCode::Unavailable,
                format!("transaction store error: {error}"),
            )
        }
    }

    fn note_outage(&mut self) {
        let since = *self.outage_since.get_or_insert_with(Instant::now);
        if !self.degraded && since.elapsed() >= self.settings.degraded_after {
            warn!(
                outage_ms = since.elapsed().as_millis() as u64,
                "transaction store unreachable, lane degraded"
            );
            self.degraded = true;
            self.settle_degraded();
        }
    }

    fn store_reachable(&mut self) {
        if let Some(since) = self.outage_since.take() {
            info!(
                outage_ms = since.elapsed().as_millis() as u64,
                "transaction store reachable again"
            );
        }
        if self.degraded {
            self.degraded = false;
            if self.machine.current_state() == GateState::Degraded {
                self.transition(GateState::Closed);
            }
            info!("lane left degraded mode");
        }
    }

    /// A lowered barrier on a degraded lane reports DEGRADED.
    fn settle_degraded(&mut self) {
        if self.degraded && self.machine.current_state() == GateState::Closed {
            self.transition(GateState::Degraded);
        }
    }

    async fn recover_store(&mut self) -> Result<(), ExitResult> {
        match self.store.ping().await {
            Ok(()) => {
                self.store_reachable();
                Ok(())
            }
            Err(e) => Err(ExitResult::failure(
                ResultCode::Unavailable,
                format!("lane degraded: {e}"),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Gate
    // ------------------------------------------------------------------

    fn transition(&mut self, to: GateState) {
        match self.machine.transition_to(to) {
            Ok(transition) => {
                info!(from = %transition.from, to = %transition.to, "gate state changed");
                self.publish(LaneEvent::GateChanged {
                    from: transition.from,
                    to: transition.to,
                });
            }
            Err(e) => error!(error = %e, "gate transition refused"),
        }
    }

    async fn raise(&mut self) -> Result<(), HardwareError> {
        let fallback = match self.machine.current_state() {
            GateState::Open => GateState::Open,
            _ => GateState::Closed,
        };
        self.transition(GateState::Opening);
        match self.driver.open().await {
            Ok(()) => {
                self.transition(GateState::Open);
                self.arm_auto_close();
                Ok(())
            }
            Err(e) => {
                self.actuator_failed(fallback);
                Err(e)
            }
        }
    }

    async fn lower(&mut self) -> Result<(), HardwareError> {
        let fallback = match self.machine.current_state() {
            GateState::Closed | GateState::Degraded => GateState::Closed,
            GateState::Error => GateState::Error,
            _ => GateState::Open,
        };
        self.cancel_auto_close();
        self.transition(GateState::Closing);
        match self.driver.close().await {
            Ok(()) => {
                self.transition(GateState::Closed);
                self.settle_degraded();
                Ok(())
            }
            Err(e) => {
                self.actuator_failed(fallback);
                Err(e)
            }
        }
    }

    fn actuator_failed(&mut self, fallback: GateState) {
        if self.driver.is_faulted() || fallback == GateState::Error {
            self.cancel_auto_close();
            self.transition(GateState::Error);
            return;
        }
        self.transition(fallback);
        match fallback {
            GateState::Open => self.arm_auto_close(),
            _ => self.settle_degraded(),
        }
    }

    async fn open_gate(&mut self) -> EngineResult<GateState> {
        if self.machine.current_state() == GateState::Error {
            return Err(HardwareError::faulted(self.driver.consecutive_errors()).into());
        }
        self.raise().await?;
        Ok(self.machine.current_state())
    }

    async fn close_gate(&mut self) -> EngineResult<GateState> {
        self.lower().await?;
        Ok(self.machine.current_state())
    }

    fn reset_gate(&mut self) -> GateState {
        self.driver.reset();
        if self.machine.current_state() == GateState::Error {
            let transition = self.machine.reset();
            info!(from = %transition.from, "gate fault cleared by operator");
            self.publish(LaneEvent::GateChanged {
                from: transition.from,
                to: transition.to,
            });
            self.settle_degraded();
        }
        self.machine.current_state()
    }

    fn arm_auto_close(&mut self) {
        self.cancel_auto_close();
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let generation = self.generation;
        let deadline = Instant::now() + self.settings.auto_close;
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = commands.send(LaneCommand::AutoClose { generation }).await;
        });
        debug!(
            generation,
            timeout_ms = self.settings.auto_close.as_millis() as u64,
            "auto-close armed"
        );
        self.auto_close = Some(AutoCloseTimer {
            generation,
            deadline,
            task,
        });
    }

    /// Disarm the timer; a firing already queued becomes stale.
    fn cancel_auto_close(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(timer) = self.auto_close.take() {
            timer.task.abort();
        }
    }

    async fn on_auto_close(&mut self, generation: u64) {
        let armed = self
            .auto_close
            .as_ref()
            .is_some_and(|timer| timer.generation == generation);
        if !armed || self.machine.current_state() != GateState::Open {
            debug!(generation, "stale auto-close ignored");
            return;
        }

        self.auto_close = None;
        debug!(generation, "auto-closing gate");
        if let Err(e) = self.lower().await {
            warn!(error = %e, "auto-close failed");
        }
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    fn gate_status(&self) -> GateStatus {
        let now = Instant::now();
        GateStatus {
            state: self.machine.current_state(),
            in_state_ms: self.machine.time_in_current_state().as_millis() as u64,
            auto_close_in_ms: self
                .auto_close
                .as_ref()
                .map(|timer| timer.deadline.saturating_duration_since(now).as_millis() as u64),
            driver: self.driver.status(),
            history: self.machine.last_transitions(STATUS_HISTORY_LEN),
        }
    }

    async fn today(&self) -> Option<ExitSummary> {
        match self.store.exit_summary(start_of_day(self.clock.now())).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                debug!(error = %e, "exit summary unavailable");
                None
            }
        }
    }

    async fn diagnostics(&self) -> Diagnostics {
        let driver = self.driver.status();
        let ts_connected = self.store.ping().await.is_ok();
        let today = if ts_connected { self.today().await } else { None };
        Diagnostics {
            gate_id: self.settings.gate_id.clone(),
            control_mode: driver.control_mode,
            gpio_available: driver.gpio_available,
            state: self.machine.current_state(),
            consecutive_errors: driver.consecutive_errors,
            ts_connected,
            mc: self.cache.as_ref().map(|cache| cache.stats()),
            pending_attachments: self.attachments.len(),
            dropped_attachments: self.attachments.dropped(),
            today,
        }
    }

    async fn metrics(&self) -> MetricsSnapshot {
        let today = self.today().await;
        self.metrics.snapshot(
            self.machine.current_state(),
            self.cache.as_ref().map(|cache| cache.stats()),
            today,
        )
    }

    fn publish(&self, event: LaneEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    async fn shutdown(mut self) {
        self.cancel_auto_close();

        let pending = self
            .attachments
            .flush(&*self.store, Duration::from_secs(SHUTDOWN_FLUSH_SECS))
            .await;

        let state = self.machine.current_state();
        match self.driver.close().await {
            Ok(()) if state != GateState::Closed => {
                let transition = self.machine.reset();
                self.publish(LaneEvent::GateChanged {
                    from: transition.from,
                    to: transition.to,
                });
            }
            Ok(()) => {}
            Err(e) => error!(error = %e, "could not close the gate at shutdown"),
        }

        info!(
            gate_id = %self.settings.gate_id,
            pending_attachments = pending,
            "lane stopped"
        );
    }
}

fn soft_budget(method: SearchMethod) -> Duration {
    Duration::from_millis(match method {
        SearchMethod::Cache => CACHED_EXIT_BUDGET_MS,
        SearchMethod::DirectId | SearchMethod::ViewBarcode | SearchMethod::ViewCard => {
            VIEW_EXIT_BUDGET_MS
        }
        SearchMethod::Universal => FALLBACK_EXIT_BUDGET_MS,
    })
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Counts exits waiting for the worker; dropped when the caller is done.
struct InflightGuard(Arc<AtomicUsize>);

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Cloneable handle to a running lane.
#[derive(Debug, Clone)]
pub struct LaneHandle {
    commands: mpsc::Sender<LaneCommand>,
    events: broadcast::Sender<LaneEvent>,
    cache: Option<Arc<MemberCache>>,
    inflight: Arc<AtomicUsize>,
}

impl LaneHandle {
    /// Process an exit, waiting behind exits already queued on the lane.
    ///
    /// Never fails: every outcome is reported through the result code.
    pub async fn process_exit(&self, request: ExitRequest) -> ExitResult {
        self.inflight.fetch_add(1, Ordering::AcqRel);
        let _guard = InflightGuard(Arc::clone(&self.inflight));
        self.send_exit(request).await
    }

    /// Like [`process_exit`](Self::process_exit) but answers `BUSY` at once
    /// when another exit is queued or running.
    pub async fn try_process_exit(&self, request: ExitRequest) -> ExitResult {
        if self
            .inflight
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return ExitResult::busy();
        }
        let _guard = InflightGuard(Arc::clone(&self.inflight));
        self.send_exit(request).await
    }

    async fn send_exit(&self, request: ExitRequest) -> ExitResult {
        self.request(|reply| LaneCommand::Exit { request, reply })
            .await
            .unwrap_or_else(|_| ExitResult::failure(ResultCode::Unavailable, "lane stopped"))
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> LaneCommand,
    ) -> EngineResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| EngineError::LaneStopped)?;
        response.await.map_err(|_| EngineError::LaneStopped)
    }

    /// Raise the barrier; refused while the gate is faulted.
    pub async fn open_gate(&self) -> EngineResult<GateState> {
        self.request(|reply| LaneCommand::OpenGate { reply }).await?
    }

    /// Lower the barrier; a success clears a fault.
    pub async fn close_gate(&self) -> EngineResult<GateState> {
        self.request(|reply| LaneCommand::CloseGate { reply }).await?
    }

    /// Clear the driver's fault latch without moving the barrier.
    pub async fn reset_gate(&self) -> EngineResult<GateState> {
        self.request(|reply| LaneCommand::ResetGate { reply }).await
    }

    pub async fn gate_status(&self) -> EngineResult<GateStatus> {
        self.request(|reply| LaneCommand::GateStatus { reply }).await
    }

    pub async fn diagnostics(&self) -> EngineResult<Diagnostics> {
        self.request(|reply| LaneCommand::Diagnostics { reply }).await
    }

    pub async fn metrics(&self) -> EngineResult<MetricsSnapshot> {
        self.request(|reply| LaneCommand::Metrics { reply }).await
    }

    /// `None` when the lane runs without a member cache.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    /// Empty the member cache; returns the number of entries removed.
    pub fn cache_clear(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| cache.invalidate_all())
    }

    pub fn cache_invalidate(&self, card_number: &str) -> bool {
        self.cache
            .as_ref()
            .is_some_and(|cache| cache.invalidate(card_number))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LaneEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: LaneEvent) {
        let _ = self.events.send(event);
    }
}

/// Builder returned by [`ExitEngine::builder`].
pub struct ExitEngineBuilder<S> {
    store: Arc<S>,
    driver: GateDriver,
    cache: Option<Arc<MemberCache>>,
    settings: LaneSettings,
    clock: Arc<dyn Clock>,
}

impl<S: TransactionStore> ExitEngineBuilder<S> {
    pub fn cache(mut self, cache: Arc<MemberCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn settings(mut self, settings: LaneSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Register the views, preload the member cache and spawn the worker.
    ///
    /// # Errors
    /// Returns `EngineError::Store` if the views cannot be registered. A
    /// failed preload is logged and the lane starts with a cold cache.
    pub async fn start(self) -> EngineResult<ExitEngine> {
        self.store.ensure_design_doc(&DesignDoc::exit_lane()).await?;

        if self.settings.preload_members
            && let Some(cache) = &self.cache
        {
            match preload_members(&*self.store, cache).await {
                Ok(count) => info!(count, "member cache preloaded"),
                Err(e) => warn!(error = %e, "member cache preload failed"),
            }
        }

        let (commands, receiver) = mpsc::channel(self.settings.command_capacity.max(1));
        let (events, _) = broadcast::channel(self.settings.event_capacity.max(1));
        let cancel = CancellationToken::new();

        info!(
            gate_id = %self.settings.gate_id,
            control_mode = %self.driver.control_mode(),
            auto_close_ms = self.settings.auto_close.as_millis() as u64,
            cache = self.cache.is_some(),
            "lane starting"
        );

        let worker = LaneWorker {
            resolver: Resolver::new(Arc::clone(&self.store), self.cache.clone()),
            store: self.store,
            cache: self.cache.clone(),
            driver: self.driver,
            machine: GateStateMachine::new(),
            attachments: AttachmentQueue::new(self.settings.attachment_retry_attempts),
            settings: self.settings,
            clock: self.clock,
            events: events.clone(),
            metrics: LaneMetrics::new(),
            commands: commands.downgrade(),
            auto_close: None,
            generation: 0,
            outage_since: None,
            degraded: false,
        };
        let task = tokio::spawn(worker.run(receiver, cancel.clone()));

        Ok(ExitEngine {
            handle: LaneHandle {
                commands,
                events,
                cache: self.cache,
                inflight: Arc::new(AtomicUsize::new(0)),
            },
            cancel,
            task,
        })
    }
}

async fn preload_members<S: TransactionStore>(store: &S, cache: &MemberCache) -> StoreResult<usize> {
    let active = store
        .query(&ViewQuery::ActiveByType {
            kind: RecordKind::MemberEntry,
            key: None,
        })
        .await?;
    Ok(cache.preload(
        active
            .iter()
            .filter_map(|stored| stored.record.to_member_record()),
    ))
}

/// A running exit lane.
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use exitgate_engine::{ExitEngine, ExitRequest};
/// use exitgate_hardware::GateDriver;
/// use exitgate_storage::{Database, SqliteTransactionStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(SqliteTransactionStore::new(
///     Database::in_memory().await?,
///     Duration::from_secs(2),
/// ));
/// let (driver, _gate) = GateDriver::simulated(3);
///
/// let engine = ExitEngine::builder(store, driver).start().await?;
/// let result = engine.handle().process_exit(ExitRequest::new("IMGTEST001")).await;
/// println!("{}: {}", result.code, result.message);
///
/// engine.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ExitEngine {
    handle: LaneHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ExitEngine {
    pub fn builder<S: TransactionStore>(store: Arc<S>, driver: GateDriver) -> ExitEngineBuilder<S> {
        ExitEngineBuilder {
            store,
            driver,
            cache: None,
            settings: LaneSettings::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn handle(&self) -> LaneHandle {
        self.handle.clone()
    }

    /// Token cancelled when the lane shuts down, for tasks feeding it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Stop the lane: cancel timers, flush queued snapshots, close the gate.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "lane worker ended abnormally");
        }
    }
}
