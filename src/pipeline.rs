//! Send pipeline: the run state machine.
//!
//! `Idle -> Running -> {Completed, LimitReached, Aborted}`
//!
//! Rows are processed strictly in order starting at the checkpoint's resume
//! index. Each row is its own failure boundary: a compose or send error is
//! logged, counted and skipped. The daily limit counts attempts, so failed
//! rows consume budget too. After every confirmed send the checkpoint is
//! persisted before pacing continues, and the session is closed on every
//! exit path once acquired.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{error, info, warn};

use crate::checkpoint::{Checkpoint, ProgressStore};
use crate::composer::MessageComposer;
use crate::config::{PacingConfig, SenderIdentity};
use crate::error::{CheckpointError, Result};
use crate::recipients::RecipientTable;
use crate::transport::{MailSession, MailTransport};

/// Checkpoint writes attempted per confirmed send before the run aborts.
const CHECKPOINT_SAVE_ATTEMPTS: u32 = 3;

/// Pipeline lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    /// Reached the end of the table.
    Completed,
    /// Stopped at the daily attempt limit with rows remaining.
    LimitReached,
    /// Stopped by an unrecoverable error.
    Aborted,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::LimitReached | Self::Aborted)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::LimitReached => "limit_reached",
            Self::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

/// Per-run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Outcome of a run that got past session acquisition.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: PipelineState,
    pub stats: RunStats,
    /// Row index the run started from.
    pub resumed_from: usize,
    /// Checkpoint as last persisted (or attempted).
    pub checkpoint: Checkpoint,
    pub abort_reason: Option<String>,
}

/// Why the pipeline is pausing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseKind {
    /// Randomized gap after a successful send.
    SendDelay,
    /// Longer pause after every full batch.
    BatchCooldown,
}

/// Pacing sleeps. Nothing else runs while the worker is paused.
#[async_trait]
pub trait Pauser: Send + Sync {
    async fn pause(&self, kind: PauseKind, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPauser;

#[async_trait]
impl Pauser for TokioPauser {
    async fn pause(&self, _kind: PauseKind, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Everything a run needs besides the table and transport.
pub struct SendPipeline<'a> {
    pacing: &'a PacingConfig,
    sender: &'a SenderIdentity,
    composer: &'a MessageComposer,
    store: Arc<dyn ProgressStore>,
    pauser: &'a dyn Pauser,
    state: PipelineState,
}

impl<'a> SendPipeline<'a> {
    pub fn new(
        pacing: &'a PacingConfig,
        sender: &'a SenderIdentity,
        composer: &'a MessageComposer,
        store: Arc<dyn ProgressStore>,
        pauser: &'a dyn Pauser,
    ) -> Self {
        Self {
            pacing,
            sender,
            composer,
            store,
            pauser,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Execute one run over `table`.
    ///
    /// Errors before the loop (invalid pacing, checkpoint unreadable,
    /// session not acquired) are returned as `Err` with nothing sent. Once
    /// the loop starts the result is always a [`RunReport`].
    pub async fn run(
        &mut self,
        table: &RecipientTable,
        transport: &dyn MailTransport,
    ) -> Result<RunReport> {
        if let Err(e) = self.pacing.validate() {
            self.state = PipelineState::Aborted;
            return Err(e.into());
        }

        let loaded = self.with_store(|store| store.load()).await;
        let mut checkpoint = match loaded {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                self.state = PipelineState::Aborted;
                return Err(e.into());
            }
        };
        let resumed_from = checkpoint.resume_index();

        info!(total = table.len(), "Total recipients");
        info!(row = resumed_from, "Resuming from row");

        let mut session = match transport.connect().await {
            Ok(session) => session,
            Err(e) => {
                self.state = PipelineState::Aborted;
                error!(error = %e, "Could not open outbound session, aborting before any sends");
                return Err(e.into());
            }
        };

        self.state = PipelineState::Running;
        let mut stats = RunStats::default();
        let outcome = self
            .drive(table, session.as_mut(), &mut checkpoint, &mut stats)
            .await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close outbound session cleanly");
        }

        let (state, abort_reason) = match outcome {
            Ok(state) => (state, None),
            Err(e) => (PipelineState::Aborted, Some(e.to_string())),
        };
        self.state = state;

        info!(
            attempted = stats.attempted,
            sent = stats.sent,
            failed = stats.failed,
            state = %state,
            "Run finished"
        );

        Ok(RunReport {
            state,
            stats,
            resumed_from,
            checkpoint,
            abort_reason,
        })
    }

    /// The send loop. Returns the terminal state, or the checkpoint error
    /// that forced an abort.
    async fn drive(
        &self,
        table: &RecipientTable,
        session: &mut dyn MailSession,
        checkpoint: &mut Checkpoint,
        stats: &mut RunStats,
    ) -> std::result::Result<PipelineState, CheckpointError> {
        let start = checkpoint.resume_index();
        if start >= table.len() && !table.is_empty() {
            warn!(
                resume = start,
                total = table.len(),
                "Checkpoint is past the end of the table, nothing to send"
            );
        }

        for (index, recipient) in table.iter_from(start) {
            if stats.attempted >= self.pacing.daily_limit {
                info!(
                    limit = self.pacing.daily_limit,
                    next_row = index,
                    "Daily email limit reached"
                );
                return Ok(PipelineState::LimitReached);
            }
            stats.attempted += 1;

            let message = self.composer.compose(self.sender, recipient);
            if let Err(e) = session.send(&message).await {
                stats.failed += 1;
                error!(
                    row = index,
                    name = %recipient.name,
                    email = %recipient.email,
                    company = %recipient.company,
                    error = %e,
                    "Email failed"
                );
                continue;
            }

            stats.sent += 1;
            info!(
                row = index,
                name = %recipient.name,
                email = %recipient.email,
                company = %recipient.company,
                "Email sent"
            );

            checkpoint.record_sent(index);
            self.persist(checkpoint).await?;

            self.pauser
                .pause(PauseKind::SendDelay, self.random_delay())
                .await;

            if stats.sent % self.pacing.batch_size == 0 {
                info!(
                    secs = self.pacing.batch_cooldown.as_secs(),
                    sent = stats.sent,
                    "Cooling down before next batch"
                );
                self.pauser
                    .pause(PauseKind::BatchCooldown, self.pacing.batch_cooldown)
                    .await;
            }
        }

        Ok(PipelineState::Completed)
    }

    /// Save with retries before the next row; the last error aborts the run.
    async fn persist(&self, checkpoint: &Checkpoint) -> std::result::Result<(), CheckpointError> {
        let mut attempt = 1;
        loop {
            let snapshot = checkpoint.clone();
            match self.with_store(move |store| store.save(&snapshot)).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < CHECKPOINT_SAVE_ATTEMPTS => {
                    warn!(attempt, error = %e, "Checkpoint write failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        attempts = attempt,
                        last_row = checkpoint.last_row,
                        error = %e,
                        "Checkpoint write failed, aborting run"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Run a store operation on the blocking pool.
    async fn with_store<T, F>(&self, op: F) -> std::result::Result<T, CheckpointError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ProgressStore) -> std::result::Result<T, CheckpointError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| CheckpointError::Task(e.to_string()))?
    }

    fn random_delay(&self) -> Duration {
        let min = self.pacing.min_delay.as_secs();
        let max = self.pacing.max_delay.as_secs().max(min);
        Duration::from_secs(rand::thread_rng().gen_range(min..=max))
    }
}
