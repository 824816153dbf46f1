//! Peer worker loop.

use log::debug;

use crate::{
    error::Result,
    handshake::PeerHandle,
    sync::{await_condition, mailbox::WorkSignal, StopToken, SyncMode},
};

/// Why a worker loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The coordinator posted the stop sentinel
    Stopped,
    /// The local stop token fired
    Cancelled,
}

/// Peer-side loop: wait for work, compute over the slice, publish the result.
pub struct Worker {
    handle: PeerHandle,
    mode: SyncMode,
    stop: StopToken,
    work: Box<dyn FnMut(&[u8]) -> u32 + Send>,
}

impl Worker {
    /// Build a worker around a joined peer handle and a work function
    pub fn new(
        handle: PeerHandle,
        mode: SyncMode,
        work: impl FnMut(&[u8]) -> u32 + Send + 'static,
    ) -> Self {
        Self {
            handle,
            mode,
            stop: StopToken::new(),
            work: Box::new(work),
        }
    }

    /// Cancellation handle for this worker
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// The joined peer handle
    pub fn handle(&self) -> &PeerHandle {
        &self.handle
    }

    /// Run until the coordinator posts the stop sentinel (or the local token
    /// fires). Every `Armed` mailbox triggers one computation over the slice
    /// followed by a completion post.
    pub fn run(&mut self) -> Result<WorkerExit> {
        let index = self.handle.index();
        debug!("worker {} entering loop ({})", index, self.mode);
        loop {
            let signal = {
                let handle = &self.handle;
                await_condition(
                    self.mode,
                    &self.stop,
                    || handle.board().take_work(index),
                    |timeout| handle.wait_for_ring(timeout),
                )?
            };
            match signal {
                None => return Ok(WorkerExit::Cancelled),
                Some(WorkSignal::Stop) => {
                    debug!("worker {} stopping", index);
                    return Ok(WorkerExit::Stopped);
                }
                Some(WorkSignal::NewWork) => {
                    let result = (self.work)(self.handle.slice());
                    self.handle.board().post_completion(index, result);
                    if self.mode == SyncMode::Doorbell {
                        self.handle.ring_coordinator();
                    }
                }
            }
        }
    }
}

/// The stock work function: count occurrences of `marker` in the slice
pub fn count_marker(marker: u8) -> impl FnMut(&[u8]) -> u32 + Send {
    move |slice: &[u8]| slice.iter().filter(|&&byte| byte == marker).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_marker() {
        let mut work = count_marker(b'S');
        assert_eq!(work(b""), 0);
        assert_eq!(work(b"xyz"), 0);
        assert_eq!(work(b"SxSxS"), 3);
    }
}
