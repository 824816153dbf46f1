//! Coordinator work-distribution loop.

use std::{ptr, thread};

use log::info;

use crate::{
    doorbell::DoorbellRegistry,
    error::{FabricError, Result},
    layout::RegionLayout,
    memory::SharedMemoryRegion,
    sync::{await_condition, mailbox::MailboxBoard, StopToken, SyncMode},
};

/// Owns the mapped region, the derived layout and the doorbells, and drives
/// work cycles over the worker peers.
///
/// Each cycle copies the work buffer into every worker slice (one transfer
/// thread per peer), arms the mailboxes, then waits for all completions
/// before the next cycle may reuse any slice.
pub struct Coordinator {
    region: SharedMemoryRegion,
    layout: RegionLayout,
    board: MailboxBoard,
    doorbells: DoorbellRegistry,
    mode: SyncMode,
    stop: StopToken,
}

impl Coordinator {
    /// Build the coordinator over an already-mapped region and the doorbells
    /// collected during the handshake
    pub fn new(
        region: SharedMemoryRegion,
        layout: RegionLayout,
        doorbells: DoorbellRegistry,
        mode: SyncMode,
    ) -> Result<Self> {
        if region.size() < layout.total_size() {
            return Err(FabricError::mapping(format!(
                "region is {} bytes, layout needs {}",
                region.size(),
                layout.total_size()
            )));
        }
        if doorbells.client_count() != layout.client_count() {
            return Err(FabricError::invalid_parameter(
                "doorbells",
                "registry sized for a different client count",
            ));
        }

        let board =
            unsafe { MailboxBoard::from_raw(region.as_mut_ptr_unchecked(), layout.client_count()) };
        // a region file reused from an earlier run must not look completed
        board.reset();

        Ok(Self {
            region,
            layout,
            board,
            doorbells,
            mode,
            stop: StopToken::new(),
        })
    }

    /// Geometry this coordinator distributes over
    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    /// Synchronization discipline of this run
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Cancellation handle for the work loop
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Run `cycles` work cycles, distributing `buf` each time.
    ///
    /// Returns the per-peer results of every completed cycle (workers are
    /// indexed `1..client_count`, so entry `j` belongs to peer `j + 1`).
    /// Stops early, with the completed cycles, when the stop token fires.
    pub fn run_cycles(&mut self, cycles: u32, buf: &[u8]) -> Result<Vec<Vec<u32>>> {
        let mut completed = Vec::with_capacity(cycles as usize);
        for cycle in 0..cycles {
            if self.stop.is_stopped() {
                info!("work loop stopped before cycle {}", cycle);
                break;
            }
            self.distribute(buf)?;
            match self.collect()? {
                Some(results) => completed.push(results),
                None => {
                    info!("work loop stopped during cycle {}", cycle);
                    break;
                }
            }
        }
        Ok(completed)
    }

    /// Copy `buf` into every worker slice and arm the mailboxes.
    ///
    /// One transfer thread per peer; each arms (and rings) only after its
    /// copy finished, preserving write-before-signal per slice.
    fn distribute(&self, buf: &[u8]) -> Result<()> {
        let layout = self.layout;
        let board = &self.board;
        let doorbells = &self.doorbells;
        let mode = self.mode;
        let base = SlicePtr(unsafe { self.region.as_mut_ptr_unchecked() });

        thread::scope(|scope| {
            for index in layout.worker_indexes() {
                scope.spawn(move || {
                    // capture the whole `SlicePtr` (which is `Send`), not its
                    // inner `*mut u8` field, which disjoint closure capture
                    // would otherwise grab on its own.
                    let base = base;
                    let len = buf.len().min(layout.slice_size());
                    if len > 0 {
                        unsafe {
                            ptr::copy_nonoverlapping(
                                buf.as_ptr(),
                                base.0.add(layout.slice_offset(index)),
                                len,
                            );
                        }
                    }
                    board.arm(index);
                    if mode == SyncMode::Doorbell {
                        doorbells.ring(index);
                    }
                });
            }
        });
        Ok(())
    }

    /// Wait until every worker posted its completion for the current cycle,
    /// consuming and resetting each slot (read-before-reuse).
    fn collect(&mut self) -> Result<Option<Vec<u32>>> {
        let worker_count = self.layout.client_count().saturating_sub(1) as usize;
        let mut results: Vec<Option<u32>> = vec![None; worker_count];

        let layout = self.layout;
        let board = &self.board;
        let doorbells = &self.doorbells;

        let outcome = await_condition(
            self.mode,
            &self.stop,
            || {
                let mut all_done = true;
                for index in layout.worker_indexes() {
                    let slot = (index - 1) as usize;
                    if results[slot].is_none() {
                        match board.take_completion(index) {
                            Some(result) => results[slot] = Some(result),
                            None => all_done = false,
                        }
                    }
                }
                if all_done {
                    Some(())
                } else {
                    None
                }
            },
            |timeout| doorbells.wait_any(timeout),
        )?;

        match outcome {
            Some(()) => Ok(Some(results.into_iter().map(|r| r.unwrap_or(0)).collect())),
            None => Ok(None),
        }
    }

    /// Tear the fabric down: post the stop sentinel to every worker, ring,
    /// and release the doorbells and the region.
    pub fn shutdown(self) -> Result<()> {
        for index in self.layout.worker_indexes() {
            self.board.post_stop(index);
            self.doorbells.ring(index);
        }
        info!("fabric shut down after stop broadcast");
        // region and doorbells drop here
        Ok(())
    }
}

/// Region base pointer, movable into transfer threads. Slices are disjoint
/// per peer, so concurrent copies never alias.
#[derive(Clone, Copy)]
struct SlicePtr(*mut u8);

unsafe impl Send for SlicePtr {}
unsafe impl Sync for SlicePtr {}
