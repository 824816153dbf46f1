//! Peer side of the membership handshake.

use std::{os::unix::net::UnixStream, path::Path, time::Duration};

use log::warn;

use crate::{
    config::VIEW_SIZE_CAP,
    doorbell::Doorbell,
    error::{FabricError, Result},
    layout::RegionLayout,
    memory::MappedWindow,
    sync::mailbox::MailboxBoard,
};

use super::{
    wire::{self, HandshakePdu, PduKind},
    HandshakeParticipant,
};

/// Peer handshake state machine: Connecting -> AwaitingReply -> Ready.
///
/// Any malformed reply, out-of-range index or mapping failure is fatal to
/// this peer; the coordinator is unaffected.
#[derive(Debug)]
pub struct PeerRole {
    index: u32,
    bell_to_coordinator: Doorbell,
    bell_from_coordinator: Option<Doorbell>,
    reply: Option<HandshakePdu>,
}

impl PeerRole {
    /// Prepare a join for worker `index` (never 0; the coordinator does not
    /// join itself)
    pub fn new(index: u32) -> Result<Self> {
        if index == 0 {
            return Err(FabricError::invalid_parameter(
                "index",
                "index 0 is the coordinator and does not join",
            ));
        }
        Ok(Self {
            index,
            bell_to_coordinator: Doorbell::new()?,
            bell_from_coordinator: None,
            reply: None,
        })
    }

    /// Worker index this role joins as
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Register a read-side wake-up handle under this peer's index.
    ///
    /// Uses its own short-lived connection and expects no reply; the
    /// coordinator folds the handle into its wait set for deferred
    /// (interrupt-style) notification.
    pub fn register_rd_handler(&self, socket_path: &Path) -> Result<Doorbell> {
        let bell = Doorbell::new()?;
        let channel = UnixStream::connect(socket_path)
            .map_err(|e| FabricError::from_io(e, "failed to connect control channel"))?;
        wire::send_pdu(
            &channel,
            &HandshakePdu::rd_handler(self.index),
            Some(bell.as_fd()),
        )?;
        Ok(bell)
    }

    /// Run the full join: exchange over the control channel, re-derive the
    /// layout from the reply, map the slice windows.
    pub fn join(
        mut self,
        socket_path: &Path,
        region_file: &Path,
        peek_index: Option<u32>,
    ) -> Result<PeerHandle> {
        let mut channel = UnixStream::connect(socket_path)
            .map_err(|e| FabricError::from_io(e, "failed to connect control channel"))?;
        self.exchange(&mut channel)?;
        drop(channel); // channel closes after the exchange

        let reply = self
            .reply
            .take()
            .ok_or_else(|| FabricError::handshake("join finished without a reply"))?;
        let layout = RegionLayout::compute(reply.region_size as usize, reply.client_count as u32)?;
        if self.index >= layout.client_count() {
            return Err(FabricError::handshake(format!(
                "own index {} out of range for {} clients",
                self.index,
                layout.client_count()
            )));
        }

        let slice = MappedWindow::map_file(
            region_file,
            layout.slice_offset(self.index),
            layout.slice_size(),
        )?;
        let control = MappedWindow::map_file(region_file, 0, view_len(&layout))?;
        let peek = match peek_index {
            Some(target) if target < layout.client_count() && target != self.index => Some(
                MappedWindow::map_file(region_file, layout.slice_offset(target), view_len(&layout))?,
            ),
            Some(target) => {
                warn!("peek index {} invalid for this fabric, ignored", target);
                None
            }
            None => None,
        };

        Ok(PeerHandle::assemble(
            self.index,
            layout,
            slice,
            control,
            peek,
            self.bell_from_coordinator
                .take()
                .ok_or_else(|| FabricError::handshake("reply carried no signal handle"))?,
            self.bell_to_coordinator,
        ))
    }
}

/// Cap a window at the downstream mapping limit
fn view_len(layout: &RegionLayout) -> usize {
    let len = layout.slice_size();
    if len > VIEW_SIZE_CAP {
        warn!(
            "downsizing view window to {:#x} from {:#x}",
            VIEW_SIZE_CAP, len
        );
        VIEW_SIZE_CAP
    } else {
        len
    }
}

impl HandshakeParticipant for PeerRole {
    fn exchange(&mut self, channel: &mut UnixStream) -> Result<()> {
        let join = HandshakePdu::peer_join(self.index);
        wire::send_pdu(channel, &join, Some(self.bell_to_coordinator.as_fd()))?;

        let (reply, fd) = wire::recv_pdu(channel)?;
        if reply.index != 0 {
            return Err(FabricError::handshake(format!(
                "reply from index {} instead of the coordinator",
                reply.index
            )));
        }
        if reply.kind()? != PduKind::MemIo {
            return Err(FabricError::handshake("reply is not a MEM_IO PDU"));
        }
        self.bell_from_coordinator = Some(Doorbell::from_owned(fd.ok_or_else(|| {
            FabricError::handshake("reply carried no signal handle")
        })?));
        self.reply = Some(reply);
        Ok(())
    }
}

/// Everything a worker needs after a successful join: its index, the derived
/// geometry, the mapped windows and the doorbell pair.
#[derive(Debug)]
pub struct PeerHandle {
    index: u32,
    layout: RegionLayout,
    slice: MappedWindow,
    /// Keeps the control-area mapping alive for `board`
    _control: MappedWindow,
    peek: Option<MappedWindow>,
    board: MailboxBoard,
    bell_from_coordinator: Doorbell,
    bell_to_coordinator: Doorbell,
}

impl PeerHandle {
    fn assemble(
        index: u32,
        layout: RegionLayout,
        slice: MappedWindow,
        control: MappedWindow,
        peek: Option<MappedWindow>,
        bell_from_coordinator: Doorbell,
        bell_to_coordinator: Doorbell,
    ) -> Self {
        // the control window maps slice 0 where the mailboxes live
        let board =
            unsafe { MailboxBoard::from_raw(control.as_mut_ptr_unchecked(), layout.client_count()) };
        Self {
            index,
            layout,
            slice,
            _control: control,
            peek,
            board,
            bell_from_coordinator,
            bell_to_coordinator,
        }
    }

    /// Worker index of this peer
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Geometry derived from the handshake reply
    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    /// Mailbox view over the control area
    pub fn board(&self) -> &MailboxBoard {
        &self.board
    }

    /// This peer's slice of the region
    pub fn slice(&self) -> &[u8] {
        self.slice.as_slice()
    }

    /// Mutable access to this peer's slice
    pub fn slice_mut(&mut self) -> &mut [u8] {
        self.slice.as_mut_slice()
    }

    /// Read-only view of another peer's slice, when configured
    pub fn peek(&self) -> Option<&[u8]> {
        self.peek.as_ref().map(|w| w.as_slice())
    }

    /// Block on the coordinator's doorbell
    pub fn wait_for_ring(&self, timeout: Duration) -> Result<bool> {
        self.bell_from_coordinator.wait(Some(timeout))
    }

    /// Ring the coordinator; delivery failure is logged, not fatal
    pub fn ring_coordinator(&self) {
        if let Err(e) = self.bell_to_coordinator.ring() {
            warn!("peer {} could not ring the coordinator: {}", self.index, e);
        }
    }
}
