//! Coordinator side of the membership handshake.

use std::{
    fs,
    os::unix::net::{UnixListener, UnixStream},
    path::Path,
};

use log::{info, warn};

use crate::{
    doorbell::{Doorbell, DoorbellRegistry},
    error::{FabricError, Result},
    layout::RegionLayout,
};

use super::{
    wire::{self, HandshakePdu, PduKind},
    HandshakeParticipant,
};

/// Coordinator handshake state machine.
///
/// Listening -> one PDU per inbound connection -> back to Listening. A
/// malformed join is fatal to that peer only; the role keeps serving.
#[derive(Debug)]
pub struct CoordinatorRole {
    layout: RegionLayout,
    registry: DoorbellRegistry,
    joined: Vec<bool>,
}

impl CoordinatorRole {
    /// Create the role for a fixed layout
    pub fn new(layout: RegionLayout) -> Self {
        let registry = DoorbellRegistry::new(layout.client_count());
        let joined = vec![false; layout.client_count() as usize];
        Self {
            layout,
            registry,
            joined,
        }
    }

    /// Number of peers that completed a MEM_IO join
    pub fn joined_peers(&self) -> u32 {
        self.joined.iter().filter(|j| **j).count() as u32
    }

    /// Hand the collected doorbells to the work loop
    pub fn into_registry(self) -> DoorbellRegistry {
        self.registry
    }

    fn validate_index(&self, raw: i32, require_new: bool) -> Result<u32> {
        if raw <= 0 || raw as u32 >= self.layout.client_count() {
            return Err(FabricError::handshake(format!(
                "peer index {} out of range for {} clients",
                raw,
                self.layout.client_count()
            )));
        }
        let index = raw as u32;
        if require_new && self.joined[index as usize] {
            return Err(FabricError::handshake(format!(
                "peer index {} already joined",
                index
            )));
        }
        Ok(index)
    }
}

impl HandshakeParticipant for CoordinatorRole {
    fn exchange(&mut self, channel: &mut UnixStream) -> Result<()> {
        let (pdu, fd) = wire::recv_pdu(channel)?;
        match pdu.kind()? {
            PduKind::MemIo => {
                let index = self.validate_index(pdu.index, true)?;
                let from_peer = fd
                    .ok_or_else(|| FabricError::handshake("MEM_IO join without a signal handle"))?;
                self.registry
                    .register_from_peer(index, Doorbell::from_owned(from_peer))?;

                if pdu.wants_signal_handle() {
                    let bell = Doorbell::new()?;
                    let reply = HandshakePdu::coordinator_reply(
                        self.layout.total_size() as u64,
                        self.layout.client_count(),
                    );
                    wire::send_pdu(channel, &reply, Some(bell.as_fd()))?;
                    self.registry.register_to_peer(index, bell)?;
                }

                self.joined[index as usize] = true;
                info!(
                    "peer {} joined ({}/{} workers)",
                    index,
                    self.joined_peers(),
                    self.layout.client_count() - 1
                );
            }
            PduKind::RdHandler => {
                let index = self.validate_index(pdu.index, false)?;
                let bell = fd.ok_or_else(|| {
                    FabricError::handshake("RD_HANDLER registration without a handle")
                })?;
                self.registry
                    .register_rd_side(index, Doorbell::from_owned(bell))?;
                info!("peer {} registered a read-side handle", index);
            }
        }
        Ok(())
    }
}

/// Accept loop that drives [`CoordinatorRole`] until the expected number of
/// workers joined
#[derive(Debug)]
pub struct HandshakeServer {
    listener: UnixListener,
    role: CoordinatorRole,
}

impl HandshakeServer {
    /// Bind the control channel and prepare the coordinator role
    pub fn bind(socket_path: &Path, layout: RegionLayout) -> Result<Self> {
        // a stale socket from a previous run would fail the bind
        let _ = fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path)
            .map_err(|e| FabricError::from_io(e, "failed to bind control channel"))?;
        Ok(Self {
            listener,
            role: CoordinatorRole::new(layout),
        })
    }

    /// Serve joins until `expected_peers` distinct workers completed the
    /// exchange. Per-peer failures are logged and skipped.
    pub fn serve(&mut self, expected_peers: u32) -> Result<()> {
        while self.role.joined_peers() < expected_peers {
            let (mut channel, _) = self
                .listener
                .accept()
                .map_err(|e| FabricError::from_io(e, "control channel accept failed"))?;
            if let Err(e) = self.role.exchange(&mut channel) {
                warn!("handshake rejected: {}", e);
            }
            // the per-peer channel closes here so the next peer can join
        }
        Ok(())
    }

    /// Finish the bootstrap and hand the doorbells to the work loop
    pub fn into_registry(self) -> DoorbellRegistry {
        self.role.into_registry()
    }
}
