//! Synchronization state shared across the fabric.
//!
//! Two interchangeable disciplines run over the same mailbox placement:
//! polling (spin on an acquire load) and doorbell (block on an eventfd and
//! re-check). A run selects one mode at startup and never mixes them.

pub mod mailbox;
pub mod wait;

pub use mailbox::{MailboxBoard, SlotState, WorkSignal};
pub use wait::await_condition;

use std::str::FromStr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::error::FabricError;

/// Synchronization discipline for one fabric run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Busy-wait on the sentinel words; trades CPU for latency
    Polling,
    /// Block on doorbell signals; trades a small wake-up latency for CPU
    Doorbell,
}

impl FromStr for SyncMode {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "polling" | "poll" => Ok(SyncMode::Polling),
            "doorbell" | "signal" => Ok(SyncMode::Doorbell),
            other => Err(FabricError::invalid_parameter(
                "mode",
                format!("unknown sync mode '{}', expected polling or doorbell", other),
            )),
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Polling => write!(f, "polling"),
            SyncMode::Doorbell => write!(f, "doorbell"),
        }
    }
}

/// Owned cancellation handle.
///
/// Clones observe the same flag; any holder can stop the loops that carry
/// the token.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    /// Create a fresh, unstopped token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that every loop holding this token winds down
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether stop has been requested
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
