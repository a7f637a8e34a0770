//! Outbound connections to servers reached over UNIX stream sockets.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::addr::UnixAddr;
use crate::error::{
	ConnErrCode, ConnectOutcome, ConnectStep, SocketError, classify_connect_errno,
	classify_socket_errno,
};
use crate::poller::{ConnId, FdOwner};
use crate::proto::ProtoContext;
use crate::socket::{RawSocket, local_addr, peer_addr, set_cloexec, set_nonblocking};

/// A backend: a named group of servers.
#[derive(Debug)]
pub struct Backend {
	pub id: String,
}

/// A server inside a backend.
#[derive(Debug)]
pub struct Server {
	pub id: String,
	pub backend: Arc<Backend>,
}

/// What a connection is established for.
#[derive(Debug, Clone)]
pub enum Target {
	/// The backend itself, e.g. a dispatch address.
	Backend(Arc<Backend>),
	Server(Arc<Server>),
	/// An in-process service. Cannot be reached over a socket.
	Applet(String),
}

/// Connection flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnFlags(u32);

impl ConnFlags {
	pub const NONE: ConnFlags = ConnFlags(0);
	/// The connection failed; `err_code` may say why.
	pub const ERROR: ConnFlags = ConnFlags(0x01);
	/// Transport-level establishment still in progress.
	pub const WAIT_L4_CONN: ConnFlags = ConnFlags(0x02);
	/// Local and peer addresses must be captured.
	pub const ADDR_TO_SET: ConnFlags = ConnFlags(0x04);
	/// A proxy preamble must be sent once writable.
	pub const SEND_PROXY: ConnFlags = ConnFlags(0x08);

	#[inline]
	pub fn contains(self, other: ConnFlags) -> bool {
		self.0 & other.0 == other.0
	}

	#[inline]
	pub fn remove(&mut self, other: ConnFlags) {
		self.0 &= !other.0;
	}
}

impl BitOr for ConnFlags {
	type Output = ConnFlags;

	fn bitor(self, rhs: ConnFlags) -> ConnFlags {
		ConnFlags(self.0 | rhs.0)
	}
}

impl BitOrAssign for ConnFlags {
	fn bitor_assign(&mut self, rhs: ConnFlags) {
		self.0 |= rhs.0;
	}
}

impl fmt::Debug for ConnFlags {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let names = [
			(ConnFlags::ERROR, "ERROR"),
			(ConnFlags::WAIT_L4_CONN, "WAIT_L4_CONN"),
			(ConnFlags::ADDR_TO_SET, "ADDR_TO_SET"),
			(ConnFlags::SEND_PROXY, "SEND_PROXY"),
		];
		let set: Vec<&str> = names
			.iter()
			.filter(|(flag, _)| self.contains(*flag))
			.map(|(_, name)| *name)
			.collect();
		if set.is_empty() {
			f.write_str("NONE")
		} else {
			f.write_str(&set.join("|"))
		}
	}
}

/// An outbound connection.
#[derive(Debug)]
pub struct Connection {
	id: ConnId,
	target: Target,
	dst: UnixAddr,
	src: Option<UnixAddr>,
	fd: Option<OwnedFd>,
	flags: ConnFlags,
	err_code: Option<ConnErrCode>,
	send_proxy_pending: bool,
	thread_mask: u64,
}

impl Connection {
	pub fn new(id: ConnId, target: Target, dst: UnixAddr) -> Self {
		Self {
			id,
			target,
			dst,
			src: None,
			fd: None,
			flags: ConnFlags::NONE,
			err_code: None,
			send_proxy_pending: false,
			thread_mask: u64::MAX,
		}
	}

	/// Marks a proxy preamble as pending; it counts as data to send.
	pub fn send_proxy(mut self, pending: bool) -> Self {
		self.send_proxy_pending = pending;
		self
	}

	/// Threads the poller may run this connection's callbacks on.
	pub fn thread_mask(mut self, mask: u64) -> Self {
		self.thread_mask = mask;
		self
	}

	#[inline]
	pub fn id(&self) -> ConnId {
		self.id
	}

	pub fn target(&self) -> &Target {
		&self.target
	}

	pub fn dst(&self) -> &UnixAddr {
		&self.dst
	}

	/// Local address, once captured. Stays None for an unnamed client
	/// socket, which is the usual case.
	pub fn src(&self) -> Option<&UnixAddr> {
		self.src.as_ref()
	}

	#[inline]
	pub fn flags(&self) -> ConnFlags {
		self.flags
	}

	/// Set only alongside `ERROR`.
	pub fn err_code(&self) -> Option<ConnErrCode> {
		self.err_code
	}

	pub fn fd(&self) -> Option<BorrowedFd<'_>> {
		self.fd.as_ref().map(|fd| fd.as_fd())
	}

	pub fn raw_fd(&self) -> Option<RawFd> {
		self.fd.as_ref().map(|fd| fd.as_raw_fd())
	}

	/// Starts connecting to `dst` without blocking.
	///
	/// `has_data` tells whether data waits to be sent. On `Ok` the socket is
	/// registered with the poller; establishment may still be in progress
	/// (`WAIT_L4_CONN`). On any other outcome the socket, if one was created,
	/// is already closed and was never registered.
	pub fn connect(&mut self, ctx: &ProtoContext, has_data: bool) -> ConnectOutcome {
		if self.fd.is_some() {
			return ConnectOutcome::Internal;
		}
		// a retry starts from a clean slate
		self.flags.remove(
			ConnFlags::ERROR | ConnFlags::WAIT_L4_CONN | ConnFlags::ADDR_TO_SET | ConnFlags::SEND_PROXY,
		);
		self.err_code = None;
		self.src = None;

		let backend = match &self.target {
			Target::Backend(be) => Arc::clone(be),
			Target::Server(srv) => Arc::clone(&srv.backend),
			Target::Applet(_) => {
				self.flags |= ConnFlags::ERROR;
				return ConnectOutcome::Internal;
			}
		};
		let settings = ctx.settings();

		let sock = match RawSocket::new() {
			Ok(sock) => sock,
			Err(e) => {
				let code = classify_socket_errno(e.errno());
				report_socket_failure(&backend, code, settings.max_sock);
				self.fail(code);
				return ConnectOutcome::Resource;
			}
		};

		if sock.as_raw_fd() >= settings.max_sock {
			// a normal condition when maxsock serializes connections to a server
			warn!(
				backend = %backend.id,
				maxsock = settings.max_sock,
				"socket(): not enough free sockets. Raise -n argument. Giving up."
			);
			self.fail(ConnErrCode::ConfFdLimit);
			return ConnectOutcome::ConfigLimit;
		}

		if let Err(e) = set_nonblocking(&sock, true) {
			debug!(backend = %backend.id, error = %e, "cannot set client socket to non blocking mode");
			self.fail(ConnErrCode::SockErr);
			return ConnectOutcome::Internal;
		}

		if settings.master {
			if let Err(e) = set_cloexec(&sock) {
				error!(backend = %backend.id, error = %e, "cannot set CLOEXEC on client socket");
				self.fail(ConnErrCode::SockErr);
				return ConnectOutcome::Internal;
			}
		}

		let has_data = has_data || self.send_proxy_pending;

		settings.server_buffers.apply_best_effort(&sock);

		let step = match sock.start_connect(&self.dst) {
			Ok(()) => ConnectStep::Connected,
			Err(e) => classify_connect_errno(e.errno()),
		};
		match step {
			ConnectStep::InProgress => self.flags |= ConnFlags::WAIT_L4_CONN,
			ConnectStep::Connected => self.flags.remove(ConnFlags::WAIT_L4_CONN),
			ConnectStep::Failed(outcome, code) => {
				if outcome == ConnectOutcome::Resource {
					warn!(
						backend = %backend.id,
						"Connect() failed for backend {}: {}.",
						backend.id,
						resource_message(code)
					);
				}
				self.fail(code);
				return outcome;
			}
		}

		self.flags |= ConnFlags::ADDR_TO_SET;
		if self.send_proxy_pending {
			self.flags |= ConnFlags::SEND_PROXY;
		}

		let poller = ctx.poller();
		let raw = sock.as_raw_fd();
		if let Err(e) = poller.register(raw, FdOwner::Connection(self.id), self.thread_mask) {
			debug!(backend = %backend.id, fd = raw, error = %e, "cannot register connection");
			self.flags.remove(ConnFlags::WAIT_L4_CONN);
			self.flags |= ConnFlags::ERROR;
			return ConnectOutcome::Resource;
		}

		if self.flags.contains(ConnFlags::WAIT_L4_CONN) {
			poller.want_send(raw);
			poller.cant_send(raw);
			poller.cant_recv(raw);
		} else if has_data {
			poller.want_send(raw);
		}

		self.fd = Some(sock.into_fd());
		ConnectOutcome::Ok
	}

	/// Records the local and peer addresses and clears `ADDR_TO_SET`.
	///
	/// Fails with `ENOTCONN` while establishment is still in progress.
	pub fn capture_addresses(&mut self) -> Result<(), SocketError> {
		if !self.flags.contains(ConnFlags::ADDR_TO_SET) {
			return Ok(());
		}
		let Some(fd) = self.fd.as_ref() else {
			return Err(SocketError::InvalidAddress { reason: "connection has no socket" });
		};
		let src = local_addr(fd)?;
		if let Some(dst) = peer_addr(fd)? {
			self.dst = dst;
		}
		self.src = src;
		self.flags.remove(ConnFlags::ADDR_TO_SET);
		Ok(())
	}

	/// Deregisters and closes the socket.
	pub fn close(&mut self, ctx: &ProtoContext) {
		if let Some(fd) = self.fd.take() {
			ctx.poller().deregister(fd.as_raw_fd());
		}
		self.flags.remove(ConnFlags::WAIT_L4_CONN);
	}

	fn fail(&mut self, code: ConnErrCode) {
		self.err_code = Some(code);
		self.flags |= ConnFlags::ERROR;
	}
}

fn resource_message(code: ConnErrCode) -> &'static str {
	match code {
		ConnErrCode::FreePorts => {
			"can't connect to destination unix socket, check backlog size on the server"
		}
		ConnErrCode::AddrInUse => "local address already in use",
		other => other.description(),
	}
}

/// Logs a failed `socket()`. Exhaustion categories get an emergency notice.
pub(crate) fn report_socket_failure(backend: &Backend, code: ConnErrCode, max_sock: i32) {
	let advice = match code {
		ConnErrCode::SysFdLimit => "reached system FD limit",
		ConnErrCode::ProcFdLimit => "reached process FD limit",
		ConnErrCode::SysMemLimit => "reached system memory limit",
		other => {
			debug!(backend = %backend.id, reason = other.description(), "cannot get a server socket");
			return;
		}
	};
	let hint = match code {
		ConnErrCode::ProcFdLimit => "Please check 'ulimit-n' and restart.",
		_ => "Please check system tunables.",
	};
	error!(
		severity = "emerg",
		backend = %backend.id,
		maxsock = max_sock,
		"Proxy {} {} (maxsock={}). {}",
		backend.id,
		advice,
		max_sock,
		hint
	);
}
