//! Passing listening sockets to a successor process.
//!
//! The outgoing process sends each exported listener over a UNIX channel as
//! one message: the descriptor as `SCM_RIGHTS`, the raw `sun_path` as data.
//! The successor collects them in [`InheritedSockets`]; each listener picks
//! its match up when it binds, skipping socket creation entirely.

use std::os::fd::{AsRawFd, OwnedFd};

use tracing::debug;

use crate::addr::{SUN_PATH_LEN, UnixAddr};
use crate::error::SocketError;
use crate::listener::ListenerState;
use crate::proto::ListenerSet;
use crate::socket::{local_addr, recv_fd, send_fd};

/// Sockets received from a predecessor, not yet claimed by a listener.
#[derive(Debug, Default)]
pub struct InheritedSockets {
	entries: Vec<(UnixAddr, OwnedFd)>,
}

impl InheritedSockets {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, addr: UnixAddr, fd: OwnedFd) {
		self.entries.push((addr, fd));
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Removes and returns a socket bound to the same endpoint as `addr`.
	pub fn take_compatible(&mut self, addr: &UnixAddr) -> Option<OwnedFd> {
		let idx = self.entries.iter().position(|(a, _)| a.same_endpoint(addr))?;
		Some(self.entries.swap_remove(idx).1)
	}

	/// Reads sockets from `channel` until the peer shuts it down.
	pub fn receive<S: AsRawFd>(channel: &S) -> Result<Self, SocketError> {
		let mut sockets = Self::new();
		while let Some((fd, payload)) = recv_fd(channel, SUN_PATH_LEN)? {
			let addr = if payload.len() == SUN_PATH_LEN {
				UnixAddr::from_bytes(&payload)?
			} else {
				local_addr(&fd)?.ok_or(SocketError::InvalidAddress { reason: "inherited socket is unnamed" })?
			};
			debug!(addr = %addr, fd = fd.as_raw_fd(), "received inherited socket");
			sockets.push(addr, fd);
		}
		Ok(sockets)
	}
}

/// Sends every exported, listening socket of `set` over `channel`.
///
/// Returns how many were sent. The caller holds the protocol-wide lock.
pub fn export_listeners<S: AsRawFd>(channel: &S, set: &ListenerSet) -> Result<usize, SocketError> {
	let mut sent = 0;
	for listener in set.iter() {
		let listener = listener.lock();
		if listener.state() != ListenerState::Listen || !listener.is_exported() {
			continue;
		}
		let Some(fd) = listener.fd() else {
			continue;
		};
		send_fd(channel, &fd, listener.addr().as_bytes())?;
		debug!(listener = listener.id().0, addr = %listener.addr(), "exported listener");
		sent += 1;
	}
	Ok(sent)
}
