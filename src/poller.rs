//! Polls an export until it leaves the `queued` state or the deadline passes.
//!
//! The loop is a small state machine:
//!
//! ```text
//! Unknown --status--> Queued(n) --status--> Queued(n+1) ... --status--> Finished(file_url)
//!    |                    |
//!    |                    +-- next query would land at/after the deadline --> TimedOut
//!    +--------------------+-- transport error --> Failed
//! ```
//!
//! Any status other than `queued` finishes the poll. Transport errors end the loop
//! immediately; there is no retry.

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tracing::{debug, error, info};

use crate::error::PollError;
use crate::export::{redact_id, ExportJob, ExportStatus, ExportStatusSource};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(40);

/// Time source for the poll loop.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()>;
}

/// Wall-clock implementation backed by tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Unknown,
    Queued { queries: u32 },
    Finished { file_url: Option<String>, queries: u32 },
    TimedOut { elapsed: Duration, queries: u32 },
    Failed { queries: u32 },
}

impl PollState {
    pub fn queries(&self) -> u32 {
        match self {
            PollState::Unknown => 0,
            PollState::Queued { queries }
            | PollState::Finished { queries, .. }
            | PollState::TimedOut { queries, .. }
            | PollState::Failed { queries } => *queries,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Finished { .. } | PollState::TimedOut { .. } | PollState::Failed { .. }
        )
    }

    /// Applies one status query result.
    pub fn on_status(self, job: &ExportJob) -> PollState {
        let queries = self.queries() + 1;
        match job.status {
            ExportStatus::Queued => PollState::Queued { queries },
            ExportStatus::Ready | ExportStatus::Other => PollState::Finished {
                file_url: job.file_url.clone(),
                queries,
            },
        }
    }

    /// A query that never produced a status.
    pub fn on_transport_error(self) -> PollState {
        PollState::Failed {
            queries: self.queries() + 1,
        }
    }

    /// Checks a queued export against the deadline before the next query is scheduled.
    pub fn on_tick(self, elapsed: Duration, settings: &PollSettings) -> PollState {
        match self {
            PollState::Queued { queries } if elapsed + settings.interval >= settings.timeout => {
                PollState::TimedOut { elapsed, queries }
            }
            other => other,
        }
    }
}

/// Result of a poll that reached a terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub file_url: Option<String>,
    pub queries: u32,
}

/// Cyclic 0..100 counter shown while the export is queued.
#[derive(Debug, Default)]
struct PollProgress {
    value: u8,
}

impl PollProgress {
    fn tick(&mut self) -> u8 {
        self.value = (self.value + 1) % 100;
        self.value
    }
}

pub struct ExportPoller<C: Clock> {
    settings: PollSettings,
    clock: C,
}

impl<C: Clock> ExportPoller<C> {
    pub fn new(settings: PollSettings, clock: C) -> Self {
        Self { settings, clock }
    }

    pub async fn poll<S>(&self, source: &S, export_id: &str) -> Result<PollOutcome, PollError>
    where
        S: ExportStatusSource + ?Sized,
    {
        let started = self.clock.now();
        let mut state = PollState::Unknown;
        let mut progress = PollProgress::default();

        let result = loop {
            let job = match source.fetch_status(export_id).await {
                Ok(job) => job,
                Err(e) => {
                    state = state.on_transport_error();
                    break Err(PollError::Export(e));
                }
            };
            debug!("Export {} reported {:?}", redact_id(&job.id), job.status);
            state = state.on_status(&job);

            if let PollState::Finished { file_url, queries } = &state {
                break Ok(PollOutcome {
                    file_url: file_url.clone(),
                    queries: *queries,
                });
            }

            info!(
                progress = progress.tick(),
                "The report status is 'queued'. Waiting {}s before trying again.",
                self.settings.interval.as_secs()
            );

            let elapsed = self.clock.now().saturating_duration_since(started);
            state = state.on_tick(elapsed, &self.settings);
            if let PollState::TimedOut { elapsed, queries } = state {
                break Err(PollError::TimedOut { elapsed, queries });
            }

            self.clock.sleep(self.settings.interval).await;
        };

        debug_assert!(state.is_terminal());
        debug!(
            "Export {} polling ended as {:?} after {} queries",
            redact_id(export_id),
            state,
            state.queries()
        );
        result
    }

    /// Export Poller stage: timeouts and transport errors are logged and collapse to `None`.
    pub async fn wait_for_file_url<S>(&self, source: &S, export_id: &str) -> Option<String>
    where
        S: ExportStatusSource + ?Sized,
    {
        match self.poll(source, export_id).await {
            Ok(outcome) => {
                info!("Report status resolved after {} queries", outcome.queries);
                outcome.file_url
            }
            Err(PollError::TimedOut { elapsed, queries }) => {
                error!(
                    "Timed out while getting report file URL ({} queries, {:?})",
                    queries, elapsed
                );
                None
            }
            Err(PollError::Export(e)) => {
                match e.payload() {
                    Some(payload) => error!("Error getting report file URL: {}", payload),
                    None => error!("Error getting report file URL: {}", e),
                }
                None
            }
        }
    }
}
