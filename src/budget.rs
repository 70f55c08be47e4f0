//! Cooperative cancellation for CPU-bound jobs.
//!
//! A [`Budget`] travels with a parse/transform job. The job calls
//! [`Budget::check`] at loop boundaries; once the owner cancels or the
//! deadline passes, the next check fails and the job unwinds through `?`.
//!
//! The CPU-time limit is approximated by a wall-clock deadline that starts
//! when the job is scheduled. A job runs on one blocking thread without
//! awaiting, so wall time is an upper bound on its CPU time; time the thread
//! spends descheduled counts against it too.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancel flag plus a wall-clock deadline standing in for CPU time.
#[derive(Debug, Clone)]
pub struct Budget {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
    limit_ms: u64,
}

impl Budget {
    /// A budget that never expires.
    pub fn unlimited() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
            limit_ms: 0,
        }
    }

    /// A budget that expires `limit` of wall-clock time after creation.
    pub fn with_limit(limit: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(limit),
            limit_ms: limit.as_millis() as u64,
        }
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail with a timeout once cancelled or past the deadline.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Timeout(self.limit_ms));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::Timeout(self.limit_ms));
            }
        }
        Ok(())
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::unlimited()
    }
}
