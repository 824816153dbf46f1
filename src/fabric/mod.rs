//! Work distribution over the shared region.

pub mod coordinator;
pub mod worker;

pub use coordinator::Coordinator;
pub use worker::{count_marker, Worker, WorkerExit};
