//! The `unix_stream` protocol descriptor.
//!
//! The descriptor ties the bind, lifecycle and connect operations to the
//! generic protocol contract. Its listener set sits behind the protocol-wide
//! lock; operations that need the lock take `&mut ListenerSet`, which can
//! only be reached through it.

use std::os::fd::{BorrowedFd, OwnedFd};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::addr::{SUN_PATH_LEN, UnixAddr};
use crate::config::GlobalSettings;
use crate::connect::Connection;
use crate::error::{BindOutcome, BindStatus, ConnectOutcome, SocketError};
use crate::handoff::InheritedSockets;
use crate::listener::{Listener, ListenerRef, PauseOutcome};
use crate::poller::Poller;
use crate::socket::{self, SOCK_DOMAIN, SOCK_FAMILY, SOCK_PROTOCOL, SOCK_TYPE};

/// Environment shared by every operation of a protocol.
pub struct ProtoContext {
	settings: GlobalSettings,
	poller: Arc<dyn Poller>,
	pid: u32,
	inherited: Mutex<InheritedSockets>,
}

impl ProtoContext {
	pub fn new(settings: GlobalSettings, poller: Arc<dyn Poller>) -> Self {
		Self {
			settings,
			poller,
			pid: std::process::id(),
			inherited: Mutex::new(InheritedSockets::new()),
		}
	}

	/// Overrides the pid used to name temporary and backup socket files.
	pub fn with_pid(mut self, pid: u32) -> Self {
		self.pid = pid;
		self
	}

	/// Provides sockets received from a predecessor process.
	pub fn with_inherited(self, sockets: InheritedSockets) -> Self {
		*self.inherited.lock() = sockets;
		self
	}

	#[inline]
	pub fn settings(&self) -> &GlobalSettings {
		&self.settings
	}

	#[inline]
	pub fn poller(&self) -> &dyn Poller {
		self.poller.as_ref()
	}

	#[inline]
	pub fn pid(&self) -> u32 {
		self.pid
	}

	/// Takes an inherited socket bound to the same endpoint as `addr`.
	pub fn take_inherited(&self, addr: &UnixAddr) -> Option<OwnedFd> {
		self.inherited.lock().take_compatible(addr)
	}
}

/// Listeners attached to a protocol.
#[derive(Debug, Default)]
pub struct ListenerSet {
	listeners: Vec<ListenerRef>,
	nb_listeners: usize,
}

impl ListenerSet {
	pub fn iter(&self) -> impl Iterator<Item = &ListenerRef> {
		self.listeners.iter()
	}

	pub fn nb_listeners(&self) -> usize {
		self.nb_listeners
	}

	fn push(&mut self, listener: ListenerRef) {
		self.listeners.push(listener);
		self.nb_listeners += 1;
	}
}

/// Operations every transport protocol exposes to the engine.
pub trait ProtocolOps: Send + Sync {
	fn name(&self) -> &'static str;
	fn sock_domain(&self) -> libc::c_int;
	fn sock_type(&self) -> libc::c_int;
	fn sock_prot(&self) -> libc::c_int;
	fn sock_family(&self) -> libc::c_int;
	/// Size of the socket address structure.
	fn sock_addrlen(&self) -> usize;
	/// Size of the address part proper (the path for UNIX sockets).
	fn l3_addrlen(&self) -> usize;

	/// The protocol-wide lock and the listeners it guards.
	fn listeners(&self) -> &Mutex<ListenerSet>;

	fn add(&self, set: &mut ListenerSet, listener: &ListenerRef);
	fn bind(&self, listener: &mut Listener, errlen: usize) -> BindOutcome;
	fn bind_all(&self, set: &mut ListenerSet, errlen: usize) -> BindOutcome;
	fn unbind_all(&self, set: &mut ListenerSet) -> BindStatus;
	fn pause(&self, listener: &mut Listener) -> PauseOutcome;
	fn connect(&self, conn: &mut Connection, has_data: bool) -> ConnectOutcome;
	fn addrcmp(&self, a: &UnixAddr, b: &UnixAddr) -> bool;
	/// Local address of `fd`; None if unnamed.
	fn get_src(&self, fd: BorrowedFd<'_>) -> Result<Option<UnixAddr>, SocketError>;
	/// Peer address of `fd`; None if the peer is unnamed.
	fn get_dst(&self, fd: BorrowedFd<'_>) -> Result<Option<UnixAddr>, SocketError>;
}

/// UNIX-domain stream sockets.
pub struct UnixStreamProtocol {
	ctx: ProtoContext,
	listeners: Mutex<ListenerSet>,
}

impl UnixStreamProtocol {
	pub const NAME: &'static str = "unix_stream";

	pub fn new(ctx: ProtoContext) -> Self {
		Self {
			ctx,
			listeners: Mutex::new(ListenerSet::default()),
		}
	}

	pub fn context(&self) -> &ProtoContext {
		&self.ctx
	}
}

impl ProtocolOps for UnixStreamProtocol {
	fn name(&self) -> &'static str {
		Self::NAME
	}

	fn sock_domain(&self) -> libc::c_int {
		SOCK_DOMAIN
	}

	fn sock_type(&self) -> libc::c_int {
		SOCK_TYPE
	}

	fn sock_prot(&self) -> libc::c_int {
		SOCK_PROTOCOL
	}

	fn sock_family(&self) -> libc::c_int {
		SOCK_FAMILY
	}

	fn sock_addrlen(&self) -> usize {
		std::mem::size_of::<libc::sockaddr_un>()
	}

	fn l3_addrlen(&self) -> usize {
		SUN_PATH_LEN
	}

	fn listeners(&self) -> &Mutex<ListenerSet> {
		&self.listeners
	}

	/// Attaches an INIT listener and moves it to ASSIGNED; others are ignored.
	fn add(&self, set: &mut ListenerSet, listener: &ListenerRef) {
		if listener.lock().assign(Self::NAME) {
			set.push(Arc::clone(listener));
		}
	}

	fn bind(&self, listener: &mut Listener, errlen: usize) -> BindOutcome {
		listener.bind(&self.ctx, errlen)
	}

	/// Binds every listener, OR-ing the statuses and stopping at the first
	/// ABORT. The message is the last one produced.
	fn bind_all(&self, set: &mut ListenerSet, errlen: usize) -> BindOutcome {
		let mut total = BindOutcome::none();
		for listener in set.iter() {
			let outcome = listener.lock().bind(&self.ctx, errlen);
			total.status |= outcome.status;
			if outcome.message.is_some() {
				total.message = outcome.message;
			}
			if total.status.contains(BindStatus::ABORT) {
				break;
			}
		}
		total
	}

	/// Closes every listening socket. Listeners stay attached.
	fn unbind_all(&self, set: &mut ListenerSet) -> BindStatus {
		for listener in set.iter() {
			listener.lock().unbind(self.ctx.poller());
		}
		BindStatus::NONE
	}

	fn pause(&self, listener: &mut Listener) -> PauseOutcome {
		listener.pause(self.ctx.poller())
	}

	fn connect(&self, conn: &mut Connection, has_data: bool) -> ConnectOutcome {
		conn.connect(&self.ctx, has_data)
	}

	fn addrcmp(&self, a: &UnixAddr, b: &UnixAddr) -> bool {
		a.same_endpoint(b)
	}

	fn get_src(&self, fd: BorrowedFd<'_>) -> Result<Option<UnixAddr>, SocketError> {
		socket::local_addr(&fd)
	}

	fn get_dst(&self, fd: BorrowedFd<'_>) -> Result<Option<UnixAddr>, SocketError> {
		socket::peer_addr(&fd)
	}
}

/// Protocols known to the engine, looked up by family and socket type.
#[derive(Default)]
pub struct ProtocolRegistry {
	protos: Vec<Arc<dyn ProtocolOps>>,
}

impl ProtocolRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, proto: Arc<dyn ProtocolOps>) {
		self.protos.push(proto);
	}

	pub fn find(&self, family: libc::c_int, sock_type: libc::c_int) -> Option<Arc<dyn ProtocolOps>> {
		self.protos
			.iter()
			.find(|p| p.sock_family() == family && p.sock_type() == sock_type)
			.cloned()
	}

	pub fn by_name(&self, name: &str) -> Option<Arc<dyn ProtocolOps>> {
		self.protos.iter().find(|p| p.name() == name).cloned()
	}
}
