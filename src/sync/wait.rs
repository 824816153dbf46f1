//! Generic wait discipline shared by the coordinator and worker loops.

use std::time::Duration;

use crate::error::Result;

use super::{StopToken, SyncMode};

/// How long a doorbell-mode wait blocks before re-checking the sentinel.
/// The periodic re-check bounds the livelock window of a lost ring.
pub const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Wait until `check` yields a value, honoring the configured discipline.
///
/// Polling mode spins; doorbell mode calls `block` (the caller's blocking
/// primitive, typically a doorbell or registry wait) and re-checks after
/// every wake. Returns `Ok(None)` when the stop token fires first.
pub fn await_condition<T, C, B>(
    mode: SyncMode,
    stop: &StopToken,
    mut check: C,
    mut block: B,
) -> Result<Option<T>>
where
    C: FnMut() -> Option<T>,
    B: FnMut(Duration) -> Result<bool>,
{
    loop {
        if let Some(value) = check() {
            return Ok(Some(value));
        }
        if stop.is_stopped() {
            return Ok(None);
        }
        match mode {
            SyncMode::Polling => std::hint::spin_loop(),
            SyncMode::Doorbell => {
                block(WAIT_SLICE)?;
            }
        }
    }
}
