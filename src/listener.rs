//! Listener object and its lifecycle outside of binding.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::addr::UnixAddr;
use crate::config::BindConf;
use crate::error::BindStatus;
use crate::poller::{ListenerId, Poller};

/// Shared handle to a listener. The mutex is the per-listener lock.
pub type ListenerRef = Arc<Mutex<Listener>>;

/// Listener states, ordered: only unbind and pause move backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ListenerState {
	/// Configured, not attached to a protocol.
	Init,
	/// Attached to a protocol, no socket.
	Assigned,
	/// Socket bound, listening and registered with the poller.
	Listen,
}

/// Where the listener's socket comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
	/// Created by this process.
	Created,
	/// Handed over by the process that started us.
	Inherited,
}

/// Result of pausing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PauseOutcome {
	/// Socket released, nothing listens anymore.
	Stopped,
	/// Socket left listening for a successor to take over.
	Paused,
}

/// A UNIX stream listener.
#[derive(Debug)]
pub struct Listener {
	id: ListenerId,
	addr: UnixAddr,
	conf: BindConf,
	state: ListenerState,
	origin: Origin,
	/// Present iff state is `Listen`.
	fd: Option<OwnedFd>,
	/// Descriptor provided from outside, consumed by the next bind.
	handed: Option<OwnedFd>,
	proto: Option<&'static str>,
	exported: bool,
}

impl Listener {
	/// Creates a listener whose socket this process will create.
	pub fn new(id: ListenerId, addr: UnixAddr, conf: BindConf) -> Self {
		Self {
			id,
			addr,
			conf,
			state: ListenerState::Init,
			origin: Origin::Created,
			fd: None,
			handed: None,
			proto: None,
			exported: false,
		}
	}

	/// Creates a listener on a descriptor inherited from the parent process.
	///
	/// Binding it only adjusts the descriptor: no socket file is created,
	/// renamed or removed, and ownership and mode are left alone.
	pub fn inherited(id: ListenerId, addr: UnixAddr, conf: BindConf, fd: OwnedFd) -> Self {
		Self {
			origin: Origin::Inherited,
			handed: Some(fd),
			..Self::new(id, addr, conf)
		}
	}

	#[inline]
	pub fn id(&self) -> ListenerId {
		self.id
	}

	#[inline]
	pub fn addr(&self) -> &UnixAddr {
		&self.addr
	}

	#[inline]
	pub fn conf(&self) -> &BindConf {
		&self.conf
	}

	#[inline]
	pub fn state(&self) -> ListenerState {
		self.state
	}

	#[inline]
	pub fn origin(&self) -> Origin {
		self.origin
	}

	/// Name of the protocol the listener was added to.
	pub fn proto(&self) -> Option<&'static str> {
		self.proto
	}

	/// True once bound from a socket that may be passed to a successor.
	pub fn is_exported(&self) -> bool {
		self.exported
	}

	/// Borrows the listening descriptor.
	pub fn fd(&self) -> Option<BorrowedFd<'_>> {
		self.fd.as_ref().map(|fd| fd.as_fd())
	}

	pub fn raw_fd(&self) -> Option<RawFd> {
		self.fd.as_ref().map(|fd| fd.as_raw_fd())
	}

	/// True if a descriptor provided from outside waits for the next bind.
	pub fn has_handed_fd(&self) -> bool {
		self.handed.is_some()
	}

	pub(crate) fn take_handed(&mut self) -> Option<OwnedFd> {
		self.handed.take()
	}

	pub(crate) fn offer_fd(&mut self, fd: OwnedFd) {
		self.handed = Some(fd);
	}

	/// Moves INIT to ASSIGNED. Returns false if the listener was not INIT.
	pub(crate) fn assign(&mut self, proto: &'static str) -> bool {
		if self.state != ListenerState::Init {
			return false;
		}
		self.state = ListenerState::Assigned;
		self.proto = Some(proto);
		true
	}

	pub(crate) fn set_listening(&mut self, fd: OwnedFd) {
		self.exported = self.origin != Origin::Inherited;
		self.fd = Some(fd);
		self.state = ListenerState::Listen;
	}

	/// Closes the listening socket. Always returns NONE.
	///
	/// No-op unless the listener is past ASSIGNED.
	pub fn unbind(&mut self, poller: &dyn Poller) -> BindStatus {
		if self.state > ListenerState::Assigned {
			self.do_unbind(poller);
		}
		BindStatus::NONE
	}

	/// Pauses the listener. The caller holds the listener's lock.
	///
	/// A path socket keeps listening: the successor process takes the name
	/// over with its own rename. An abstract socket cannot be handed over
	/// that way, so it is released.
	pub fn pause(&mut self, poller: &dyn Poller) -> PauseOutcome {
		if !self.addr.is_abstract() {
			return PauseOutcome::Paused;
		}
		self.do_unbind(poller);
		PauseOutcome::Stopped
	}

	/// Deregisters and closes the descriptor, back to ASSIGNED.
	/// Takes no lock.
	fn do_unbind(&mut self, poller: &dyn Poller) {
		if let Some(fd) = self.fd.take() {
			poller.deregister(fd.as_raw_fd());
			debug!(listener = self.id.0, addr = %self.addr, fd = fd.as_raw_fd(), "listener unbound");
		}
		if self.state > ListenerState::Assigned {
			self.state = ListenerState::Assigned;
		}
	}
}
