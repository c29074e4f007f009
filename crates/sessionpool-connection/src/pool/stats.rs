//! Pool statistics types

use serde::{Deserialize, Serialize};

/// A point-in-time snapshot of a session pool's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Sessions currently open (idle + busy)
    opened: usize,
    /// Sessions checked out by callers
    busy: usize,
    /// Sessions sitting in the idle set
    idle: usize,
    /// Callers blocked in `acquire`
    waiting: usize,
    /// Configured upper bound
    max: usize,
}

impl PoolStats {
    pub fn new(opened: usize, busy: usize, idle: usize, waiting: usize, max: usize) -> Self {
        Self {
            opened,
            busy,
            idle,
            waiting,
            max,
        }
    }

    pub fn opened(&self) -> usize {
        self.opened
    }

    pub fn busy(&self) -> usize {
        self.busy
    }

    pub fn idle(&self) -> usize {
        self.idle
    }

    pub fn waiting(&self) -> usize {
        self.waiting
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Fraction of open sessions that are busy (0.0 to 1.0)
    ///
    /// Returns 0.0 if no session is open.
    pub fn utilization(&self) -> f64 {
        if self.opened == 0 {
            0.0
        } else {
            self.busy as f64 / self.opened as f64
        }
    }

    /// Whether the next acquire would have to wait
    pub fn is_full(&self) -> bool {
        self.idle == 0 && self.opened >= self.max
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new(0, 0, 0, 0, 0)
    }
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "opened={} busy={} idle={} waiting={} max={}",
            self.opened, self.busy, self.idle, self.waiting, self.max
        )
    }
}
