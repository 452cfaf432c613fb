// src/state/retry.rs

//! Per-title retry coordination
//!
//! Drives the state machine around each install attempt and decides retry
//! versus escalation. A failed attempt re-queues the title as `Pending`
//! with its retry count bumped; once the count reaches the bound the title
//! parks in `Error` and nothing retries it again without an explicit user
//! decision.

use super::{StateStore, TitleRecord, TitleState};
use crate::install::InstallOutcome;
use crate::Result;
use chrono::Utc;
use tracing::{info, warn};

/// What happens to a title after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Re-queued as pending; this is retry number `attempt`
    Scheduled { attempt: u32 },
    /// Retry budget exhausted; parked in `Error` awaiting a user decision
    Escalated,
}

/// Applies state transitions and persists them through the store
pub struct RetryCoordinator {
    max_retries: u32,
}

impl RetryCoordinator {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Pending -> Installing, on dequeue for processing
    pub fn begin(&self, store: &StateStore, record: &mut TitleRecord) -> Result<()> {
        record.state = TitleState::Installing;
        record.updated_at = Utc::now();
        store.save(record)
    }

    /// Installing -> Done (fresh install) or Mounted (restore)
    pub fn complete(
        &self,
        store: &StateStore,
        record: &mut TitleRecord,
        outcome: InstallOutcome,
    ) -> Result<()> {
        record.state = match outcome {
            InstallOutcome::Installed => TitleState::Done,
            InstallOutcome::Restored => TitleState::Mounted,
        };
        record.retry_count = 0;
        record.updated_at = Utc::now();
        store.save(record)
    }

    /// Installing -> Pending (bumped retry count) or Error (budget spent)
    pub fn fail(&self, store: &StateStore, record: &mut TitleRecord) -> Result<RetryDisposition> {
        record.retry_count += 1;
        record.updated_at = Utc::now();

        let disposition = if record.retry_count >= self.max_retries {
            record.state = TitleState::Error;
            warn!(
                title_id = %record.title_id,
                retries = record.retry_count,
                "retry budget exhausted, escalating to repair"
            );
            RetryDisposition::Escalated
        } else {
            record.state = TitleState::Pending;
            info!(
                title_id = %record.title_id,
                attempt = record.retry_count,
                "install failed, will retry"
            );
            RetryDisposition::Scheduled {
                attempt: record.retry_count,
            }
        };

        store.save(record)?;
        Ok(disposition)
    }

    /// Error -> Pending with the retry count reset; user chose retry
    pub fn user_retry(&self, store: &StateStore, record: &mut TitleRecord) -> Result<()> {
        record.state = TitleState::Pending;
        record.retry_count = 0;
        record.updated_at = Utc::now();
        store.save(record)
    }

    /// Error -> removed from the active set; user chose skip
    pub fn user_skip(&self, store: &StateStore, title_id: &str) -> Result<()> {
        store.remove(title_id)
    }
}
