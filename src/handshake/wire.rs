//! Handshake wire format.
//!
//! One fixed-size PDU per direction per peer join, encoded with bincode's
//! fixed-width little-endian integers. The accompanying signal handle travels
//! as an `SCM_RIGHTS` control message on the same `sendmsg`.

use std::{
    io::{IoSlice, IoSliceMut, Read},
    os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
    os::unix::net::UnixStream,
};

use nix::{
    cmsg_space,
    sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags},
};
use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};

/// Encoded PDU size: three i32, one u64, one i32
pub const PDU_LEN: usize = 24;

/// Read-side wake-up registration
pub const KIND_RD_HANDLER: i32 = 0;
/// Doorbell exchange and geometry transfer
pub const KIND_MEM_IO: i32 = 1;

/// The only message on the control channel.
///
/// `region_size` and `client_count` are valid only when the sender is the
/// coordinator; a joining peer always sets `needs_signal_handle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakePdu {
    pub index: i32,
    pub kind: i32,
    pub needs_signal_handle: i32,
    pub region_size: u64,
    pub client_count: i32,
}

/// Decoded PDU kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduKind {
    RdHandler,
    MemIo,
}

impl HandshakePdu {
    /// First message of a joining peer
    pub fn peer_join(index: u32) -> Self {
        Self {
            index: index as i32,
            kind: KIND_MEM_IO,
            needs_signal_handle: 1,
            region_size: 0,
            client_count: 0,
        }
    }

    /// Read-side wake-up registration for `index`
    pub fn rd_handler(index: u32) -> Self {
        Self {
            index: index as i32,
            kind: KIND_RD_HANDLER,
            needs_signal_handle: 0,
            region_size: 0,
            client_count: 0,
        }
    }

    /// Coordinator reply carrying the region geometry
    pub fn coordinator_reply(region_size: u64, client_count: u32) -> Self {
        Self {
            index: 0,
            kind: KIND_MEM_IO,
            needs_signal_handle: 0,
            region_size,
            client_count: client_count as i32,
        }
    }

    /// Decode the kind field; unknown kinds are malformed PDUs
    pub fn kind(&self) -> Result<PduKind> {
        match self.kind {
            KIND_RD_HANDLER => Ok(PduKind::RdHandler),
            KIND_MEM_IO => Ok(PduKind::MemIo),
            other => Err(FabricError::handshake(format!("unknown PDU kind {}", other))),
        }
    }

    /// Whether the sender asked for a fresh signal handle in the reply
    pub fn wants_signal_handle(&self) -> bool {
        self.needs_signal_handle != 0
    }

    /// Encode to the fixed wire record
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = bincode::serialize(self)?;
        debug_assert_eq!(bytes.len(), PDU_LEN);
        Ok(bytes)
    }

    /// Decode a wire record
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PDU_LEN {
            return Err(FabricError::handshake(format!(
                "PDU length {} instead of {}",
                bytes.len(),
                PDU_LEN
            )));
        }
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Send a PDU, optionally attaching a signal handle as ancillary data
pub fn send_pdu(channel: &UnixStream, pdu: &HandshakePdu, fd: Option<BorrowedFd<'_>>) -> Result<()> {
    let bytes = pdu.encode()?;
    let iov = [IoSlice::new(&bytes)];
    let raw_fds: Vec<RawFd> = fd.iter().map(|b| b.as_raw_fd()).collect();
    let cmsgs: Vec<ControlMessage<'_>> = if raw_fds.is_empty() {
        Vec::new()
    } else {
        vec![ControlMessage::ScmRights(&raw_fds)]
    };

    sendmsg::<()>(channel.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None)
        .map_err(|e| FabricError::handshake(format!("control channel send failed: {}", e)))?;
    Ok(())
}

/// Receive a PDU and any attached signal handle.
///
/// A closed channel or short record is a handshake failure.
pub fn recv_pdu(channel: &UnixStream) -> Result<(HandshakePdu, Option<OwnedFd>)> {
    let mut buf = [0u8; PDU_LEN];
    let mut cmsg_buf = cmsg_space!([RawFd; 1]);
    let mut received_fd: Option<OwnedFd> = None;
    let bytes_read;

    {
        let mut iov = [IoSliceMut::new(&mut buf)];
        let msg = recvmsg::<()>(
            channel.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buf),
            MsgFlags::empty(),
        )
        .map_err(|e| FabricError::handshake(format!("control channel recv failed: {}", e)))?;
        bytes_read = msg.bytes;
        for cmsg in msg.cmsgs() {
            if let ControlMessageOwned::ScmRights(fds) = cmsg {
                for raw in fds {
                    // ownership transferred by the kernel
                    received_fd = Some(unsafe { OwnedFd::from_raw_fd(raw) });
                }
            }
        }
    }

    if bytes_read == 0 {
        return Err(FabricError::handshake("control channel closed"));
    }

    // a stream socket may split the record; collect the remainder
    let mut total = bytes_read;
    while total < PDU_LEN {
        let n = (&*channel)
            .read(&mut buf[total..])
            .map_err(|e| FabricError::from_io(e, "control channel read"))?;
        if n == 0 {
            return Err(FabricError::handshake("control channel closed mid-record"));
        }
        total += n;
    }

    Ok((HandshakePdu::decode(&buf)?, received_fd))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_size_is_fixed() {
        let pdu = HandshakePdu::peer_join(3);
        assert_eq!(pdu.encode().unwrap().len(), PDU_LEN);

        let reply = HandshakePdu::coordinator_reply(512 << 20, 8);
        assert_eq!(reply.encode().unwrap().len(), PDU_LEN);
    }

    #[test]
    fn test_roundtrip() {
        let pdu = HandshakePdu::coordinator_reply(1 << 30, 16);
        let decoded = HandshakePdu::decode(&pdu.encode().unwrap()).unwrap();
        assert_eq!(decoded, pdu);
        assert_eq!(decoded.kind().unwrap(), PduKind::MemIo);
        assert!(!decoded.wants_signal_handle());
    }

    #[test]
    fn test_short_record_rejected() {
        let err = HandshakePdu::decode(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, FabricError::Handshake { .. }));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut pdu = HandshakePdu::peer_join(1);
        pdu.kind = 9;
        let decoded = HandshakePdu::decode(&pdu.encode().unwrap()).unwrap();
        assert!(decoded.kind().is_err());
    }

    #[test]
    fn test_pdu_over_socketpair_with_fd() {
        use crate::doorbell::Doorbell;
        use std::time::Duration;

        let (left, right) = UnixStream::pair().unwrap();
        let bell = Doorbell::new().unwrap();

        send_pdu(&left, &HandshakePdu::peer_join(2), Some(bell.as_fd())).unwrap();
        let (pdu, fd) = recv_pdu(&right).unwrap();
        assert_eq!(pdu.index, 2);
        assert!(pdu.wants_signal_handle());

        // the transferred handle still observes rings from the sender side
        let received = Doorbell::from_owned(fd.expect("fd attached"));
        bell.ring().unwrap();
        assert!(received.wait(Some(Duration::from_millis(100))).unwrap());
    }

    #[test]
    fn test_pdu_without_fd() {
        let (left, right) = UnixStream::pair().unwrap();
        send_pdu(&left, &HandshakePdu::coordinator_reply(4096, 1), None).unwrap();
        let (pdu, fd) = recv_pdu(&right).unwrap();
        assert_eq!(pdu.region_size, 4096);
        assert!(fd.is_none());
    }
}
