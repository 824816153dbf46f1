//! # Shmfabric - Shared-Memory Work-Distribution Fabric
//!
//! Shmfabric lets a fixed group of otherwise-isolated processes share one
//! block of memory and exchange doorbell signals: a coordinator hands
//! equal-sized slices of the region to worker peers, triggers computation,
//! and collects results with minimal latency — an alternative to
//! message-passing for bulk data distribution.
//!
//! ## Features
//!
//! - **Reproducible slicing**: every peer derives identical geometry from
//!   `(region_size, client_count)` alone
//! - **One-shot membership handshake**: Unix socket control channel with
//!   eventfd handles passed as ancillary data
//! - **Sticky doorbells**: counting eventfds, safe to ring with no waiter
//! - **Two sync disciplines**: busy-wait polling or doorbell blocking,
//!   identical observable ordering
//! - **Partitioned writes**: no locks; atomic sentinel words are the only
//!   cross-party synchronization state
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                 shared region (file / memfd)          │
//! ├───────────────┬───────────────┬───────────────┬───────┤
//! │ slice 0       │ slice 1       │ slice 2       │  ...  │
//! │ control area  │ peer 1 work   │ peer 2 work   │       │
//! │ (mailboxes)   │               │               │       │
//! └───────────────┴───────────────┴───────────────┴───────┘
//!        ▲                ▲                ▲
//!        │                │                │
//!  ┌───────────┐    ┌───────────┐    ┌───────────┐
//!  │Coordinator│◄──►│ Worker 1  │    │ Worker 2  │  doorbells
//!  └───────────┘    └───────────┘    └───────────┘  (eventfd)
//! ```

// Core modules
pub mod doorbell;
pub mod error;
pub mod fabric;
pub mod handshake;
pub mod layout;
pub mod memory;
pub mod sync;

// Main API re-exports
pub use doorbell::{Doorbell, DoorbellRegistry};
pub use error::{FabricError, Result};
pub use fabric::{count_marker, Coordinator, Worker, WorkerExit};
pub use handshake::{
    CoordinatorRole, HandshakeParticipant, HandshakePdu, HandshakeServer, PduKind, PeerHandle,
    PeerRole,
};
pub use layout::{normalize_region_size, RegionLayout};
pub use memory::{BackingType, MappedWindow, RegionConfig, SharedMemoryRegion};
pub use sync::{MailboxBoard, SlotState, StopToken, SyncMode, WorkSignal};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fabric-wide configuration constants
pub mod config {
    /// Page size every region and slice must align to
    pub const PAGE_SIZE: usize = 4 << 10;

    /// Maximum number of fabric members, coordinator included
    pub const MAX_PEERS: u32 = 64;

    /// Default region size (512 MiB)
    pub const DEFAULT_REGION_SIZE: usize = 512 << 20;

    /// Minimum region size the coordinator will start with
    pub const MIN_REGION_SIZE: usize = DEFAULT_REGION_SIZE;

    /// Cap applied to the derived slice size (256 MiB)
    pub const SLICE_SIZE_CAP: usize = 256 << 20;

    /// Cap applied to mapped view windows (128 MiB)
    pub const VIEW_SIZE_CAP: usize = 128 << 20;
}
