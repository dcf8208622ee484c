//! Session sweeper
//!
//! Periodically evicts draft sessions nobody touched for `draft_ttl` and
//! settled submissions older than `submission_ttl`, so abandoned screens do
//! not pin memory for the life of the process.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use reboot_common::config::SessionConfig;

use crate::draft::DraftStore;
use crate::submission::SubmissionOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    pub draft_ttl: Duration,
    pub submission_ttl: Duration,
    pub interval: Duration,
}

impl From<&SessionConfig> for SweeperConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            draft_ttl: Duration::from_secs(config.draft_ttl_secs),
            submission_ttl: Duration::from_secs(config.submission_ttl_secs),
            interval: Duration::from_secs(config.sweep_interval_secs),
        }
    }
}

/// What one sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub drafts: usize,
    pub submissions: usize,
}

pub struct SessionSweeper {
    config: SweeperConfig,
    drafts: DraftStore,
    orchestrator: Arc<SubmissionOrchestrator>,
}

impl SessionSweeper {
    pub fn new(
        config: SweeperConfig,
        drafts: DraftStore,
        orchestrator: Arc<SubmissionOrchestrator>,
    ) -> Self {
        Self {
            config,
            drafts,
            orchestrator,
        }
    }

    /// Spawn the periodic sweep; runs until the handle is aborted or the runtime stops
    pub fn run(self: Arc<Self>) -> JoinHandle<()> {
        info!(
            "Starting SessionSweeper (interval: {}s, draft ttl: {}s, submission ttl: {}s)",
            self.config.interval.as_secs(),
            self.config.draft_ttl.as_secs(),
            self.config.submission_ttl.as_secs()
        );

        tokio::spawn(async move {
            let mut timer = interval(self.config.interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                timer.tick().await;
                self.sweep_once().await;
            }
        })
    }

    pub async fn sweep_once(&self) -> SweepReport {
        let report = SweepReport {
            submissions: self.orchestrator.prune_settled(self.config.submission_ttl).await,
            drafts: self.drafts.prune_idle(self.config.draft_ttl).await,
        };

        if report == SweepReport::default() {
            debug!("SessionSweeper: nothing to evict");
        } else {
            info!(
                drafts = report.drafts,
                submissions = report.submissions,
                "SessionSweeper: evicted idle sessions"
            );
        }
        report
    }
}
