//! Per pool synchronization controller
//!
//! The controller owns the published snapshot of one replica. Logs are applied on the
//! caller's task through the reducer; anything that makes the incremental state
//! untrustworthy (a rejected log, an ordering anomaly, an external invalidation) hands
//! the replica to a single background task that rebuilds it from the chain, retrying
//! with capped exponential backoff until it succeeds.
//!
//! Readers load the snapshot without locking. The writer bookkeeping sits behind a
//! mutex that is never held across an await, so builds run unlocked. Logs arriving
//! meanwhile above the height of the build in flight are buffered and replayed on top
//! of the rebuilt snapshot; the rest are covered by the build that is running or the
//! next one, which always targets at least the highest block seen.

use crate::config::SyncConfig;
use crate::errors::{RebuildError, SyncFault};
use crate::pools::PoolFamily;
use crate::raw_log::{LogPosition, RawLog};
use crate::reader::StateReader;
use crate::reducer::{reduce, Reduction};
use crate::subscription::SubscriptionDescriptor;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

/// Where a replica stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPhase {
    /// No snapshot yet
    Uninitialized,
    /// Serving a snapshot current up to the given block
    Synced(u64),
    /// The last snapshot is stale, a rebuild is in flight
    Rebuilding,
    /// Rebuilds keep failing, the last good snapshot is still served
    Degraded { attempts: u32, last_error: SyncFault },
}

/// A published, immutable view of a replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<S> {
    /// Bumped by every commit
    pub version: u64,
    /// Height the state is current at
    pub block_number: u64,
    /// Height of the authoritative build the state descends from
    pub rebuilt_at: u64,
    /// Last log applied on top of that build
    pub last_log: Option<LogPosition>,
    pub state: Arc<S>,
}

impl<S> Snapshot<S> {
    fn advance(&self, position: LogPosition, state: Arc<S>) -> Self {
        Self {
            version: self.version + 1,
            block_number: position.block_number,
            rebuilt_at: self.rebuilt_at,
            last_log: Some(position),
            state,
        }
    }
}

/// What happened to a delivered log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    /// The state moved and a new snapshot was published
    Applied,
    /// Nothing tracked changed, the position advanced
    Unchanged,
    /// At or below the height of the last authoritative build, or of the next one
    Covered,
    /// The last applied log delivered again
    Duplicate,
    /// Held until the in-flight rebuild commits
    Buffered,
    /// No snapshot to apply to
    Ignored,
    /// The log broke the replica, a rebuild was started
    Rebuild(SyncFault),
}

enum Step<S> {
    Skip(LogOutcome),
    Commit(Snapshot<S>, LogOutcome),
    Fault(SyncFault),
}

enum Rebuilt {
    Synced,
    /// The build committed but a buffered log broke it again
    Replay(SyncFault),
}

#[derive(Default)]
struct Writer {
    backlog: Vec<RawLog>,
    highest_seen: u64,
    /// The replica is being rebuilt, logs no longer apply directly
    rebuilding: bool,
    /// Height of the build in flight, only logs above it are buffered
    building_at: Option<u64>,
    task: Option<AbortHandle>,
    closed: bool,
}

impl Writer {
    /// The next build targets at least `highest_seen`, which covers every buffered log
    fn abandon_build(&mut self) {
        self.building_at = None;
        self.backlog.clear();
    }
}

struct Shared<F: PoolFamily> {
    family: F,
    name: String,
    reader: Arc<dyn StateReader>,
    config: SyncConfig,
    snapshot: ArcSwapOption<Snapshot<F::State>>,
    phase: watch::Sender<SyncPhase>,
    writer: Mutex<Writer>,
}

/// Keeps one pool replica in sync with the chain
pub struct SyncController<F: PoolFamily> {
    shared: Arc<Shared<F>>,
}

impl<F: PoolFamily> Clone for SyncController<F> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<F: PoolFamily> SyncController<F> {
    pub fn new(family: F, reader: Arc<dyn StateReader>, config: SyncConfig) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Uninitialized);
        Self {
            shared: Arc::new(Shared {
                name: family.name(),
                family,
                reader,
                config,
                snapshot: ArcSwapOption::empty(),
                phase,
                writer: Mutex::new(Writer::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn family(&self) -> &F {
        &self.shared.family
    }

    pub fn subscription(&self) -> &SubscriptionDescriptor {
        self.shared.family.subscription()
    }

    /// Latest published snapshot, `None` until the first build succeeds
    pub fn snapshot(&self) -> Option<Arc<Snapshot<F::State>>> {
        self.shared.snapshot.load_full()
    }

    pub fn state(&self) -> Option<Arc<F::State>> {
        self.snapshot().map(|snapshot| snapshot.state.clone())
    }

    pub fn phase(&self) -> SyncPhase {
        self.shared.phase.borrow().clone()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.shared.phase.subscribe()
    }

    /// Cold start: build the state at the node's head and publish it
    ///
    /// On failure the replica goes degraded and keeps retrying in the background; the
    /// error is returned so the caller can decide whether to wait. Calling it again
    /// once a snapshot exists returns that snapshot.
    pub async fn initialize(&self) -> Result<Arc<Snapshot<F::State>>, SyncFault> {
        let shared = &self.shared;
        {
            let mut writer = shared.writer.lock();
            if let Some(snapshot) = shared.snapshot.load_full() {
                return Ok(snapshot);
            }
            if writer.rebuilding {
                return Err(match self.phase() {
                    SyncPhase::Degraded { last_error, .. } => last_error,
                    _ => SyncFault::Invalidated("initialization already in flight".to_string()),
                });
            }
            writer.rebuilding = true;
        }
        shared.phase.send_replace(SyncPhase::Rebuilding);
        info!(pool = %shared.name, "Building initial state");

        let built = match shared.target_height().await {
            Ok(height) => shared.build(height).await.map(|state| (height, state)),
            Err(fault) => Err(fault),
        };

        let mut writer = shared.writer.lock();
        match built {
            Ok((height, state)) => match shared.commit_rebuild(&mut writer, height, state) {
                Rebuilt::Synced => {}
                Rebuilt::Replay(fault) => {
                    warn!(
                        pool = %shared.name,
                        block = height,
                        %fault,
                        "Buffered log broke the initial state"
                    );
                    shared.spawn_recovery(&mut writer, 0);
                }
            },
            Err(fault) => {
                writer.abandon_build();
                shared.degrade(1, fault.clone());
                shared.spawn_recovery(&mut writer, 1);
                return Err(fault);
            }
        }
        shared
            .snapshot
            .load_full()
            .ok_or_else(|| SyncFault::Invalidated("snapshot vanished after commit".to_string()))
    }

    /// Apply one delivered log
    ///
    /// Must be called from within a Tokio runtime: a log that breaks the replica
    /// spawns the recovery task.
    pub fn on_log(&self, log: &RawLog) -> LogOutcome {
        let shared = &self.shared;
        let mut writer = shared.writer.lock();
        if writer.closed {
            return LogOutcome::Ignored;
        }
        writer.highest_seen = writer.highest_seen.max(log.block_number);
        if writer.rebuilding {
            return match writer.building_at {
                Some(height) if log.block_number > height => {
                    writer.backlog.push(log.clone());
                    LogOutcome::Buffered
                }
                _ => LogOutcome::Covered,
            };
        }
        let Some(current) = shared.snapshot.load_full() else {
            return LogOutcome::Ignored;
        };

        match shared.step(&current, log) {
            Step::Skip(outcome) => outcome,
            Step::Commit(next, outcome) => {
                shared.publish(next);
                outcome
            }
            Step::Fault(fault) => {
                shared.begin_recovery(&mut writer, fault.clone());
                LogOutcome::Rebuild(fault)
            }
        }
    }

    /// Force a rebuild, for a liveness watchdog or a reorged log
    pub fn invalidate(&self, reason: impl Into<String>) {
        let shared = &self.shared;
        let reason = reason.into();
        let mut writer = shared.writer.lock();
        if writer.closed || shared.snapshot.load().is_none() {
            debug!(pool = %shared.name, %reason, "Nothing to invalidate");
            return;
        }
        if writer.rebuilding {
            debug!(pool = %shared.name, %reason, "Rebuild already in flight");
            return;
        }
        shared.begin_recovery(&mut writer, SyncFault::Invalidated(reason));
    }

    /// Stop the recovery task and ignore further logs
    pub fn shutdown(&self) {
        let mut writer = self.shared.writer.lock();
        writer.closed = true;
        writer.backlog.clear();
        if let Some(task) = writer.task.take() {
            task.abort();
        }
    }
}

impl<F: PoolFamily> Shared<F> {
    /// Decide what a log does to `current`, without publishing anything
    fn step(&self, current: &Snapshot<F::State>, log: &RawLog) -> Step<F::State> {
        if log.block_number <= current.rebuilt_at {
            return Step::Skip(LogOutcome::Covered);
        }
        let position = log.position();
        if let Some(last) = &current.last_log {
            match position.order(last) {
                Ordering::Greater => {}
                Ordering::Equal if position.transaction_hash == last.transaction_hash => {
                    return Step::Skip(LogOutcome::Duplicate);
                }
                // Nothing records which earlier logs were applied, so an earlier
                // position may be one that was never seen
                _ => {
                    return Step::Fault(SyncFault::OrderingAnomaly {
                        last_block: last.block_number,
                        last_index: last.log_index,
                        got_block: position.block_number,
                        got_index: position.log_index,
                    })
                }
            }
        }

        match reduce(&self.family, log, &current.state) {
            Reduction::Next(decoded, state) => {
                debug!(
                    pool = %self.name,
                    block = decoded.provenance.block_number,
                    index = decoded.provenance.log_index,
                    event = ?decoded.event,
                    "Applied log"
                );
                Step::Commit(
                    current.advance(decoded.provenance, Arc::new(state)),
                    LogOutcome::Applied,
                )
            }
            Reduction::Unchanged => Step::Commit(
                current.advance(position, current.state.clone()),
                LogOutcome::Unchanged,
            ),
            Reduction::Reject(reason) => {
                Step::Fault(SyncFault::from_reject(log.block_number, reason))
            }
        }
    }

    fn publish(&self, snapshot: Snapshot<F::State>) {
        let block = snapshot.block_number;
        self.snapshot.store(Some(Arc::new(snapshot)));
        self.phase.send_if_modified(|phase| {
            let synced = SyncPhase::Synced(block);
            if *phase == synced {
                return false;
            }
            *phase = synced;
            true
        });
    }

    /// The rebuild must cover every log already seen, even if the node lags behind it
    ///
    /// Fixes the height of the build about to run and drops the buffered logs it covers.
    async fn target_height(&self) -> Result<u64, SyncFault> {
        let latest = self
            .reader
            .latest_block()
            .await
            .map_err(RebuildError::from)?;
        let mut writer = self.writer.lock();
        let height = latest.max(writer.highest_seen);
        writer.building_at = Some(height);
        writer.backlog.retain(|log| log.block_number > height);
        Ok(height)
    }

    async fn build(&self, block: u64) -> Result<F::State, SyncFault> {
        let build = self.family.build_state(self.reader.as_ref(), block);
        let state = match self.config.build_timeout() {
            Some(limit) => tokio::time::timeout(limit, build)
                .await
                .map_err(|_| RebuildError::Timeout(limit))??,
            None => build.await?,
        };
        Ok(state)
    }

    /// Publish a freshly built state and replay the backlog on top of it
    fn commit_rebuild(&self, writer: &mut Writer, height: u64, state: F::State) -> Rebuilt {
        let version = self
            .snapshot
            .load_full()
            .map(|snapshot| snapshot.version + 1)
            .unwrap_or(1);
        let mut current = Snapshot {
            version,
            block_number: height,
            rebuilt_at: height,
            last_log: None,
            state: Arc::new(state),
        };

        writer.building_at = None;
        let backlog = std::mem::take(&mut writer.backlog);
        for log in &backlog {
            match self.step(&current, log) {
                Step::Skip(_) => {}
                Step::Commit(next, _) => current = next,
                Step::Fault(fault) => {
                    self.snapshot.store(Some(Arc::new(current)));
                    self.phase.send_replace(SyncPhase::Rebuilding);
                    return Rebuilt::Replay(fault);
                }
            }
        }

        info!(
            pool = %self.name,
            block = height,
            version = current.version,
            replayed = backlog.len(),
            "Replica synced"
        );
        writer.rebuilding = false;
        writer.task = None;
        self.publish(current);
        Rebuilt::Synced
    }

    fn degrade(&self, attempts: u32, fault: SyncFault) {
        if attempts >= self.config.retry.escalate_after {
            error!(pool = %self.name, attempts, %fault, "Rebuild keeps failing");
        } else {
            warn!(pool = %self.name, attempts, %fault, "Rebuild failed, retrying");
        }
        self.phase.send_replace(SyncPhase::Degraded {
            attempts,
            last_error: fault,
        });
    }
}

impl<F: PoolFamily> Shared<F> {
    fn begin_recovery(self: &Arc<Self>, writer: &mut Writer, fault: SyncFault) {
        warn!(pool = %self.name, %fault, "Replica out of sync, rebuilding");
        self.phase.send_replace(SyncPhase::Rebuilding);
        if writer.rebuilding {
            return;
        }
        writer.rebuilding = true;
        self.spawn_recovery(writer, 0);
    }

    fn spawn_recovery(self: &Arc<Self>, writer: &mut Writer, attempts: u32) {
        let task = tokio::spawn(self.clone().recover(attempts));
        writer.task = Some(task.abort_handle());
    }

    /// Rebuild until one sticks; `attempts` failed tries already happened
    async fn recover(self: Arc<Self>, mut attempts: u32) {
        loop {
            if attempts > 0 {
                tokio::time::sleep(self.config.retry.backoff(attempts)).await;
            }
            match self.rebuild().await {
                Ok(Rebuilt::Synced) => return,
                Ok(Rebuilt::Replay(fault)) => {
                    warn!(pool = %self.name, %fault, "Buffered log broke the rebuilt state");
                    attempts = 0;
                }
                Err(fault) => {
                    self.writer.lock().abandon_build();
                    attempts += 1;
                    self.degrade(attempts, fault);
                }
            }
        }
    }

    async fn rebuild(&self) -> Result<Rebuilt, SyncFault> {
        let height = self.target_height().await?;
        debug!(pool = %self.name, block = height, "Rebuilding");
        let state = self.build(height).await?;
        let mut writer = self.writer.lock();
        Ok(self.commit_rebuild(&mut writer, height, state))
    }
}

/// A type erased controller, lets one delivery loop drive pools of every family
#[async_trait]
pub trait Replica: Send + Sync {
    fn name(&self) -> &str;
    fn subscription(&self) -> &SubscriptionDescriptor;
    async fn initialize(&self) -> Result<(), SyncFault>;
    fn on_log(&self, log: &RawLog) -> LogOutcome;
    fn invalidate(&self, reason: &str);
    fn phase(&self) -> SyncPhase;
    fn shutdown(&self);
}

#[async_trait]
impl<F: PoolFamily> Replica for SyncController<F> {
    fn name(&self) -> &str {
        SyncController::name(self)
    }

    fn subscription(&self) -> &SubscriptionDescriptor {
        SyncController::subscription(self)
    }

    async fn initialize(&self) -> Result<(), SyncFault> {
        SyncController::initialize(self).await.map(|_| ())
    }

    fn on_log(&self, log: &RawLog) -> LogOutcome {
        SyncController::on_log(self, log)
    }

    fn invalidate(&self, reason: &str) {
        SyncController::invalidate(self, reason)
    }

    fn phase(&self) -> SyncPhase {
        SyncController::phase(self)
    }

    fn shutdown(&self) {
        SyncController::shutdown(self)
    }
}
