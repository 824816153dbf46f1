//! End-to-end fabric tests: handshake, work cycles and teardown in one
//! process, with threads standing in for the peer processes.

use std::thread;

use shmfabric::{
    count_marker, Coordinator, HandshakeServer, PeerRole, RegionConfig, RegionLayout,
    SharedMemoryRegion, SyncMode, Worker, WorkerExit,
};
use tempfile::TempDir;

const REGION_SIZE: usize = 1 << 20;
const CLIENTS: u32 = 4;
const SLICE_SIZE: usize = 1 << 18;

/// Bring up a full fabric, run one closure worth of cycles, tear down.
///
/// Returns the per-cycle results and the worker exits.
fn run_fabric<F>(mode: SyncMode, drive: F) -> (Vec<Vec<u32>>, Vec<WorkerExit>)
where
    F: FnOnce(&mut Coordinator) -> Vec<Vec<u32>>,
{
    let dir = TempDir::new().unwrap();
    let region_path = dir.path().join("region.dat");
    let socket_path = dir.path().join("control.sock");

    let layout = RegionLayout::compute(REGION_SIZE, CLIENTS).unwrap();
    let region = SharedMemoryRegion::new(
        RegionConfig::new("fabric_test", REGION_SIZE).with_file_path(&region_path),
    )
    .unwrap();
    let mut server = HandshakeServer::bind(&socket_path, layout).unwrap();

    let workers: Vec<_> = layout
        .worker_indexes()
        .map(|index| {
            let socket_path = socket_path.clone();
            let region_path = region_path.clone();
            thread::spawn(move || {
                let handle = PeerRole::new(index)
                    .unwrap()
                    .join(&socket_path, &region_path, None)
                    .unwrap();
                let mut worker = Worker::new(handle, mode, count_marker(b'S'));
                worker.run().unwrap()
            })
        })
        .collect();

    server.serve(CLIENTS - 1).unwrap();
    let registry = server.into_registry();
    let mut coordinator = Coordinator::new(region, layout, registry, mode).unwrap();

    let results = drive(&mut coordinator);
    coordinator.shutdown().unwrap();

    let exits = workers.into_iter().map(|w| w.join().unwrap()).collect();
    (results, exits)
}

#[test]
fn test_polling_fabric_counts_markers() {
    let buf = vec![b'S'; SLICE_SIZE];
    let (results, exits) = run_fabric(SyncMode::Polling, |coordinator| {
        coordinator.run_cycles(2, &buf).unwrap()
    });

    assert_eq!(results.len(), 2);
    for cycle in &results {
        assert_eq!(cycle.as_slice(), &[SLICE_SIZE as u32; 3]);
    }
    // same input buffer, identical results across cycles
    assert_eq!(results[0], results[1]);
    assert_eq!(exits, vec![WorkerExit::Stopped; 3]);
}

#[test]
fn test_doorbell_fabric_matches_polling() {
    let buf = vec![b'S'; SLICE_SIZE];
    let (results, exits) = run_fabric(SyncMode::Doorbell, |coordinator| {
        coordinator.run_cycles(2, &buf).unwrap()
    });

    assert_eq!(results.len(), 2);
    for cycle in &results {
        assert_eq!(cycle.as_slice(), &[SLICE_SIZE as u32; 3]);
    }
    assert_eq!(exits, vec![WorkerExit::Stopped; 3]);
}

#[test]
fn test_zero_length_work_yields_zero() {
    // arm without writing any marker bytes; the zero-filled
    // slices contain no markers, so every result is 0
    let (results, _exits) = run_fabric(SyncMode::Polling, |coordinator| {
        coordinator.run_cycles(1, &[]).unwrap()
    });

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_slice(), &[0u32; 3]);
}

#[test]
fn test_consecutive_cycles_use_fresh_completions() {
    // the second cycle distributes a marker-free buffer; stale
    // completions from the first cycle must not leak into its results
    let markers = vec![b'S'; SLICE_SIZE];
    let blanks = vec![b'x'; SLICE_SIZE];

    let (results, _exits) = run_fabric(SyncMode::Polling, |coordinator| {
        let mut all = coordinator.run_cycles(1, &markers).unwrap();
        all.extend(coordinator.run_cycles(1, &blanks).unwrap());
        all
    });

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_slice(), &[SLICE_SIZE as u32; 3]);
    assert_eq!(results[1].as_slice(), &[0u32; 3]);
}

#[test]
fn test_partial_buffer_counts_prefix_only() {
    // shorter buffers are copied as a slice prefix over the zeroed region
    let buf = vec![b'S'; 1000];
    let (results, _exits) = run_fabric(SyncMode::Polling, |coordinator| {
        coordinator.run_cycles(1, &buf).unwrap()
    });

    assert_eq!(results[0].as_slice(), &[1000u32; 3]);
}

#[test]
fn test_stop_token_abandons_the_loop() {
    let buf = vec![b'S'; SLICE_SIZE];
    let (results, exits) = run_fabric(SyncMode::Polling, |coordinator| {
        let first = coordinator.run_cycles(1, &buf).unwrap();
        coordinator.stop_token().stop();
        // the stopped loop completes no further cycles
        let rest = coordinator.run_cycles(3, &buf).unwrap();
        assert!(rest.is_empty());
        first
    });

    assert_eq!(results.len(), 1);
    // workers were cancelled by the coordinator's stop broadcast
    assert_eq!(exits, vec![WorkerExit::Stopped; 3]);
}

#[test]
fn test_single_member_fabric_has_no_workers() {
    let dir = TempDir::new().unwrap();
    let region_path = dir.path().join("region.dat");
    let socket_path = dir.path().join("control.sock");

    let layout = RegionLayout::compute(REGION_SIZE, 1).unwrap();
    let region = SharedMemoryRegion::new(
        RegionConfig::new("solo_fabric", REGION_SIZE).with_file_path(&region_path),
    )
    .unwrap();
    let mut server = HandshakeServer::bind(&socket_path, layout).unwrap();
    server.serve(0).unwrap();

    let mut coordinator =
        Coordinator::new(region, layout, server.into_registry(), SyncMode::Polling).unwrap();
    let results = coordinator.run_cycles(2, &[]).unwrap();
    assert_eq!(results, vec![Vec::<u32>::new(), Vec::<u32>::new()]);
    coordinator.shutdown().unwrap();
}
