//! Doorbell signals between fabric members.
//!
//! A doorbell is a counting eventfd: ringing writes 1, waiting polls and
//! drains. Rings are sticky until consumed, so a ring delivered while nobody
//! is waiting is observed immediately by the next wait. There is no payload
//! and no acknowledgment.

use std::{
    os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
    sync::Mutex,
    time::Duration,
};

use log::warn;
use mio::{unix::SourceFd, Events, Interest, Poll, Token};
use nix::{
    errno::Errno,
    poll::{poll, PollFd, PollFlags},
    sys::eventfd::{eventfd, EfdFlags},
    unistd::read,
};

use crate::{
    config::MAX_PEERS,
    error::{FabricError, Result},
};

/// One edge-triggered, sticky-until-consumed wake-up signal
#[derive(Debug)]
pub struct Doorbell {
    fd: OwnedFd,
}

impl Doorbell {
    /// Create a fresh doorbell
    pub fn new() -> Result<Self> {
        let fd = eventfd(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)
            .map_err(|e| FabricError::notify(format!("eventfd failed: {}", e)))?;
        Ok(Self { fd })
    }

    /// Adopt a doorbell received over the control channel
    pub fn from_owned(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Duplicate the handle; both ends observe the same counter
    pub fn try_clone(&self) -> Result<Self> {
        let fd = self
            .fd
            .try_clone()
            .map_err(|e| FabricError::from_io(e, "failed to dup doorbell"))?;
        Ok(Self { fd })
    }

    /// Ring the doorbell. Fire-and-forget: a full counter (EAGAIN) means the
    /// other side is already signaled.
    pub fn ring(&self) -> Result<()> {
        let value: u64 = 1;
        match nix::unistd::write(self.fd.as_raw_fd(), &value.to_ne_bytes()) {
            Ok(_) => Ok(()),
            Err(Errno::EAGAIN) => Ok(()),
            Err(e) => Err(FabricError::notify(format!("doorbell write failed: {}", e))),
        }
    }

    /// Wait until the doorbell rings, consuming the ring.
    ///
    /// Returns `Ok(true)` when a ring was consumed, `Ok(false)` on timeout.
    /// `None` blocks indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        let timeout_ms: i32 = timeout
            .map(|t| t.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let pollfd = PollFd::new(&self.fd, PollFlags::POLLIN);
        let mut fds = [pollfd];
        match poll(&mut fds, timeout_ms) {
            Ok(0) => Ok(false),
            Ok(_) => {
                self.drain();
                Ok(true)
            }
            Err(Errno::EINTR) => Ok(false),
            Err(e) => Err(FabricError::notify(format!("doorbell poll failed: {}", e))),
        }
    }

    /// Consume any pending rings without blocking
    pub fn drain(&self) {
        let mut buf = [0u8; 8];
        // reading an eventfd returns and resets the counter
        let _ = read(self.fd.as_raw_fd(), &mut buf);
    }

    /// Borrow the underlying handle (for SCM_RIGHTS transfer)
    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// Raw file descriptor
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Per-index doorbell bookkeeping on the coordinator side.
///
/// `to_peer` handles are rung by the coordinator and awaited by peers;
/// `from_peer` handles travel the other way. Read-side registrations from
/// RD_HANDLER PDUs are kept as alternate wake sources. Registration happens
/// during the handshake only; `wait_any` builds its poll set lazily on first
/// use and assumes the registry is final by then.
#[derive(Debug)]
pub struct DoorbellRegistry {
    client_count: u32,
    to_peer: Vec<Option<Doorbell>>,
    from_peer: Vec<Option<Doorbell>>,
    rd_side: Vec<Option<Doorbell>>,
    poll: Mutex<Option<Poll>>,
}

impl DoorbellRegistry {
    /// Create an empty registry for `client_count` members
    pub fn new(client_count: u32) -> Self {
        let n = client_count as usize;
        Self {
            client_count,
            to_peer: (0..n).map(|_| None).collect(),
            from_peer: (0..n).map(|_| None).collect(),
            rd_side: (0..n).map(|_| None).collect(),
            poll: Mutex::new(None),
        }
    }

    /// Number of fabric members this registry covers
    pub fn client_count(&self) -> u32 {
        self.client_count
    }

    fn check_index(&self, index: u32) -> Result<usize> {
        if index >= self.client_count {
            return Err(FabricError::invalid_parameter(
                "index",
                format!("{} out of range for {} clients", index, self.client_count),
            ));
        }
        Ok(index as usize)
    }

    /// Register the coordinator-to-peer doorbell for `index`
    pub fn register_to_peer(&mut self, index: u32, bell: Doorbell) -> Result<()> {
        let slot = self.check_index(index)?;
        self.to_peer[slot] = Some(bell);
        Ok(())
    }

    /// Register the peer-to-coordinator doorbell for `index`
    pub fn register_from_peer(&mut self, index: u32, bell: Doorbell) -> Result<()> {
        let slot = self.check_index(index)?;
        self.from_peer[slot] = Some(bell);
        Ok(())
    }

    /// Replace the read-side wake-up registration for `index`
    pub fn register_rd_side(&mut self, index: u32, bell: Doorbell) -> Result<()> {
        let slot = self.check_index(index)?;
        self.rd_side[slot] = Some(bell);
        Ok(())
    }

    /// Whether a peer-to-coordinator doorbell is registered for `index`
    pub fn has_peer(&self, index: u32) -> bool {
        (index as usize) < self.from_peer.len() && self.from_peer[index as usize].is_some()
    }

    /// Ring the doorbell registered towards `index`.
    ///
    /// Unregistered indexes and delivery failures are logged no-ops.
    pub fn ring(&self, index: u32) {
        match self.to_peer.get(index as usize) {
            Some(Some(bell)) => {
                if let Err(e) = bell.ring() {
                    warn!("doorbell ring to peer {} failed: {}", index, e);
                }
            }
            _ => warn!("doorbell ring to unregistered index {}", index),
        }
    }

    /// Block until any from-peer or read-side doorbell rings, draining the
    /// ones that fired. Returns whether any ring was consumed.
    pub fn wait_any(&self, timeout: Duration) -> Result<bool> {
        let mut guard = self
            .poll
            .lock()
            .map_err(|_| FabricError::notify("doorbell poll lock poisoned"))?;

        if guard.is_none() {
            *guard = Some(self.build_poll()?);
        }
        let poll = guard.as_mut().unwrap();

        let mut events = Events::with_capacity(2 * MAX_PEERS as usize);
        poll.poll(&mut events, Some(timeout))
            .map_err(|e| FabricError::notify(format!("doorbell poll failed: {}", e)))?;

        let mut fired = false;
        for event in events.iter() {
            let token = event.token().0;
            let (set, index) = if token < MAX_PEERS as usize {
                (&self.from_peer, token)
            } else {
                (&self.rd_side, token - MAX_PEERS as usize)
            };
            if let Some(Some(bell)) = set.get(index) {
                bell.drain();
                fired = true;
            }
        }
        Ok(fired)
    }

    fn build_poll(&self) -> Result<Poll> {
        let poll =
            Poll::new().map_err(|e| FabricError::notify(format!("poll creation failed: {}", e)))?;
        for (index, bell) in self.from_peer.iter().enumerate() {
            if let Some(bell) = bell {
                let raw = bell.as_raw_fd();
                poll.registry()
                    .register(&mut SourceFd(&raw), Token(index), Interest::READABLE)
                    .map_err(|e| FabricError::notify(format!("poll register failed: {}", e)))?;
            }
        }
        for (index, bell) in self.rd_side.iter().enumerate() {
            if let Some(bell) = bell {
                let raw = bell.as_raw_fd();
                poll.registry()
                    .register(
                        &mut SourceFd(&raw),
                        Token(MAX_PEERS as usize + index),
                        Interest::READABLE,
                    )
                    .map_err(|e| FabricError::notify(format!("poll register failed: {}", e)))?;
            }
        }
        Ok(poll)
    }
}
