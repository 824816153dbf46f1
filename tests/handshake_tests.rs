//! Integration tests for the membership handshake

use std::{path::PathBuf, thread, time::Duration};

use shmfabric::{
    FabricError, HandshakeServer, PeerRole, RegionConfig, RegionLayout, SharedMemoryRegion,
};
use tempfile::TempDir;

const REGION_SIZE: usize = 1 << 20;
const CLIENTS: u32 = 4;

struct TestFabric {
    _dir: TempDir,
    region_path: PathBuf,
    socket_path: PathBuf,
    layout: RegionLayout,
    _region: SharedMemoryRegion,
}

fn setup_fabric() -> TestFabric {
    let dir = TempDir::new().unwrap();
    let region_path = dir.path().join("region.dat");
    let socket_path = dir.path().join("control.sock");
    let layout = RegionLayout::compute(REGION_SIZE, CLIENTS).unwrap();
    let region = SharedMemoryRegion::new(
        RegionConfig::new("test_fabric", REGION_SIZE).with_file_path(&region_path),
    )
    .unwrap();
    TestFabric {
        _dir: dir,
        region_path,
        socket_path,
        layout,
        _region: region,
    }
}

#[test]
fn test_peer_joins_and_derives_geometry() {
    let fabric = setup_fabric();
    let mut server = HandshakeServer::bind(&fabric.socket_path, fabric.layout).unwrap();

    let server_thread = thread::spawn(move || {
        server.serve(1).unwrap();
        server
    });

    let handle = PeerRole::new(1)
        .unwrap()
        .join(&fabric.socket_path, &fabric.region_path, None)
        .unwrap();

    // the peer recomputed the exact geometry from the reply inputs
    assert_eq!(*handle.layout(), fabric.layout);
    assert_eq!(handle.index(), 1);
    assert_eq!(handle.slice().len(), fabric.layout.slice_size());

    server_thread.join().unwrap();
}

#[test]
fn test_doorbell_pair_survives_the_exchange() {
    let fabric = setup_fabric();
    let mut server = HandshakeServer::bind(&fabric.socket_path, fabric.layout).unwrap();

    let server_thread = thread::spawn(move || {
        server.serve(1).unwrap();
        server
    });

    let handle = PeerRole::new(2)
        .unwrap()
        .join(&fabric.socket_path, &fabric.region_path, None)
        .unwrap();
    let server = server_thread.join().unwrap();
    let registry = server.into_registry();

    // coordinator -> peer direction
    registry.ring(2);
    assert!(handle.wait_for_ring(Duration::from_millis(500)).unwrap());

    // peer -> coordinator direction
    handle.ring_coordinator();
    assert!(registry.wait_any(Duration::from_millis(500)).unwrap());
}

#[test]
fn test_bad_index_is_isolated() {
    let fabric = setup_fabric();
    let mut server = HandshakeServer::bind(&fabric.socket_path, fabric.layout).unwrap();

    let server_thread = thread::spawn(move || {
        // one expected worker; the bad join must not satisfy or kill the loop
        server.serve(1).unwrap();
        server
    });

    // index 5 with client_count 4: the coordinator drops the connection
    // without a reply, which the peer observes as a handshake failure
    let err = PeerRole::new(5)
        .unwrap()
        .join(&fabric.socket_path, &fabric.region_path, None)
        .unwrap_err();
    assert!(matches!(err, FabricError::Handshake { .. }));

    // a well-formed peer still joins afterwards
    let handle = PeerRole::new(1)
        .unwrap()
        .join(&fabric.socket_path, &fabric.region_path, None)
        .unwrap();
    assert_eq!(handle.index(), 1);

    server_thread.join().unwrap();
}

#[test]
fn test_duplicate_index_is_rejected() {
    let fabric = setup_fabric();
    let mut server = HandshakeServer::bind(&fabric.socket_path, fabric.layout).unwrap();

    let server_thread = thread::spawn(move || {
        server.serve(2).unwrap();
        server
    });

    let first = PeerRole::new(1)
        .unwrap()
        .join(&fabric.socket_path, &fabric.region_path, None)
        .unwrap();
    assert_eq!(first.index(), 1);

    // same index again: dropped without a reply
    let err = PeerRole::new(1)
        .unwrap()
        .join(&fabric.socket_path, &fabric.region_path, None)
        .unwrap_err();
    assert!(matches!(err, FabricError::Handshake { .. }));

    // a different index completes the expected set
    let second = PeerRole::new(3)
        .unwrap()
        .join(&fabric.socket_path, &fabric.region_path, None)
        .unwrap();
    assert_eq!(second.index(), 3);

    server_thread.join().unwrap();
}

#[test]
fn test_peek_window_maps_another_slice() {
    let fabric = setup_fabric();
    let mut server = HandshakeServer::bind(&fabric.socket_path, fabric.layout).unwrap();

    let server_thread = thread::spawn(move || {
        server.serve(1).unwrap();
    });

    let handle = PeerRole::new(1)
        .unwrap()
        .join(&fabric.socket_path, &fabric.region_path, Some(2))
        .unwrap();
    let peek = handle.peek().expect("peek window requested");
    assert_eq!(peek.len(), fabric.layout.slice_size());

    server_thread.join().unwrap();
}

#[test]
fn test_rd_handler_joins_the_wait_set() {
    let fabric = setup_fabric();
    let mut server = HandshakeServer::bind(&fabric.socket_path, fabric.layout).unwrap();

    let server_thread = thread::spawn(move || {
        server.serve(1).unwrap();
        server
    });

    let role = PeerRole::new(1).unwrap();
    // registration uses its own connection and does not count as a join
    let rd_bell = role.register_rd_handler(&fabric.socket_path).unwrap();
    let _handle = role
        .join(&fabric.socket_path, &fabric.region_path, None)
        .unwrap();

    let registry = server_thread.join().unwrap().into_registry();
    rd_bell.ring().unwrap();
    assert!(registry.wait_any(Duration::from_millis(500)).unwrap());
}

#[test]
fn test_coordinator_index_cannot_join() {
    assert!(PeerRole::new(0).is_err());
}
