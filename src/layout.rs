//! Region slicing: derives per-peer slice geometry from the region size and
//! client count.
//!
//! The computation is pure and runs identically on every peer. The handshake
//! transmits only `(region_size, client_count)`; each side recomputes
//! `slice_size` from those inputs, so the derivation can be audited and
//! reproduced offline without a live fabric.

use std::ops::Range;

use log::warn;

use crate::{
    config::{MAX_PEERS, MIN_REGION_SIZE, PAGE_SIZE, SLICE_SIZE_CAP},
    error::{FabricError, Result},
    sync::mailbox::CONTROL_AREA_LEN,
};

/// Immutable slice geometry shared by every member of the fabric.
///
/// Created once by the coordinator and re-derived by every joining peer.
/// Peer `index` owns the byte range starting at `index * slice_size`; slice 0
/// belongs to the coordinator and holds the mailbox control area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    total_size: usize,
    slice_size: usize,
    client_count: u32,
}

impl RegionLayout {
    /// Compute the slice geometry for `client_count` peers over a region of
    /// `total_size` bytes.
    ///
    /// `slice_size = total_size >> trailing_zeros(client_count)`, capped at
    /// [`SLICE_SIZE_CAP`]. Fails with `InvalidTopology` when the client count
    /// is not a power of two in `[1, MAX_PEERS]`, when either size is not
    /// page aligned, or when slice 0 cannot hold the control area.
    pub fn compute(total_size: usize, client_count: u32) -> Result<Self> {
        if client_count == 0 || client_count > MAX_PEERS {
            return Err(FabricError::invalid_topology(format!(
                "client count {} outside [1, {}]",
                client_count, MAX_PEERS
            )));
        }
        if !client_count.is_power_of_two() {
            return Err(FabricError::invalid_topology(format!(
                "client count {} is not a power of two",
                client_count
            )));
        }
        if !is_page_aligned(total_size) {
            return Err(FabricError::invalid_topology(format!(
                "region size {:#x} is not {} aligned",
                total_size, PAGE_SIZE
            )));
        }

        let mut slice_size = total_size >> client_count.trailing_zeros();
        if slice_size > SLICE_SIZE_CAP {
            slice_size = SLICE_SIZE_CAP;
        }
        if !is_page_aligned(slice_size) {
            return Err(FabricError::invalid_topology(format!(
                "slice size {:#x} is not {} aligned",
                slice_size, PAGE_SIZE
            )));
        }
        if slice_size < CONTROL_AREA_LEN {
            return Err(FabricError::invalid_topology(format!(
                "slice size {:#x} cannot hold the {:#x} byte control area",
                slice_size, CONTROL_AREA_LEN
            )));
        }

        Ok(Self {
            total_size,
            slice_size,
            client_count,
        })
    }

    /// Total region size in bytes
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Per-peer slice size in bytes
    pub fn slice_size(&self) -> usize {
        self.slice_size
    }

    /// Number of fabric members, coordinator included
    pub fn client_count(&self) -> u32 {
        self.client_count
    }

    /// Byte offset of the slice owned by `index`
    pub fn slice_offset(&self, index: u32) -> usize {
        self.slice_size * index as usize
    }

    /// Indexes of the worker peers (everything except the coordinator)
    pub fn worker_indexes(&self) -> Range<u32> {
        1..self.client_count
    }
}

/// Clamp a requested region size up to the minimum floor.
///
/// Applied on the coordinator startup path only, so that
/// [`RegionLayout::compute`] stays reproducible from raw handshake inputs.
/// Never silently proceeds below the floor.
pub fn normalize_region_size(requested: usize) -> usize {
    if requested < MIN_REGION_SIZE {
        warn!(
            "region size {:#x} below the minimum floor, clamping to {:#x}",
            requested, MIN_REGION_SIZE
        );
        MIN_REGION_SIZE
    } else {
        requested
    }
}

fn is_page_aligned(n: usize) -> bool {
    n & (PAGE_SIZE - 1) == 0
}
