//! Pre-validated settings read by the bind and connect paths.

use std::os::fd::AsRawFd;

use tracing::debug;

use crate::socket::{set_recv_buffer_size, set_send_buffer_size};

/// Buffer size tuning applied to outbound sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferConfig {
	pub recv: Option<usize>,
	pub send: Option<usize>,
}

impl BufferConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn recv(mut self, size: usize) -> Self {
		self.recv = Some(size);
		self
	}

	pub fn send(mut self, size: usize) -> Self {
		self.send = Some(size);
		self
	}

	pub fn both(mut self, size: usize) -> Self {
		self.recv = Some(size);
		self.send = Some(size);
		self
	}

	/// Applies the configured sizes. Failures are logged and otherwise ignored.
	pub(crate) fn apply_best_effort<S: AsRawFd>(&self, socket: &S) {
		if let Some(size) = self.send {
			if let Err(e) = set_send_buffer_size(socket, size) {
				debug!(fd = socket.as_raw_fd(), error = %e, "ignoring send buffer tuning failure");
			}
		}
		if let Some(size) = self.recv {
			if let Err(e) = set_recv_buffer_size(socket, size) {
				debug!(fd = socket.as_raw_fd(), error = %e, "ignoring receive buffer tuning failure");
			}
		}
	}
}

/// Process-wide settings.
#[derive(Debug, Clone, Copy)]
pub struct GlobalSettings {
	/// Descriptors numerically at or above this value are rejected.
	pub max_sock: i32,
	/// Running as the multi-process supervisor's master.
	pub master: bool,
	/// Tuning for sockets connecting to servers.
	pub server_buffers: BufferConfig,
}

impl Default for GlobalSettings {
	fn default() -> Self {
		Self {
			max_sock: i32::MAX,
			master: false,
			server_buffers: BufferConfig::default(),
		}
	}
}

impl GlobalSettings {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn max_sock(mut self, max_sock: i32) -> Self {
		self.max_sock = max_sock;
		self
	}

	pub fn master(mut self, master: bool) -> Self {
		self.master = master;
		self
	}

	pub fn server_buffers(mut self, config: BufferConfig) -> Self {
		self.server_buffers = config;
		self
	}
}

/// Per-listener bind settings.
///
/// # Example
/// ```ignore
/// use uxlane::BindConf;
///
/// let conf = BindConf::new()
///     .owner(Some(1000), None)
///     .mode(0o660)
///     .backlog(1024)
///     .thread_mask(0b11);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct BindConf {
	/// Owner applied to the socket file; None leaves it unchanged.
	pub uid: Option<u32>,
	pub gid: Option<u32>,
	/// Permission bits applied to the socket file; 0 leaves them unchanged.
	pub mode: u32,
	pub backlog: i32,
	/// Threads allowed to accept on this listener.
	pub thread_mask: u64,
}

impl Default for BindConf {
	fn default() -> Self {
		Self {
			uid: None,
			gid: None,
			mode: 0,
			backlog: 1024,
			thread_mask: u64::MAX,
		}
	}
}

impl BindConf {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn owner(mut self, uid: Option<u32>, gid: Option<u32>) -> Self {
		self.uid = uid;
		self.gid = gid;
		self
	}

	pub fn mode(mut self, mode: u32) -> Self {
		self.mode = mode;
		self
	}

	pub fn backlog(mut self, backlog: i32) -> Self {
		self.backlog = backlog;
		self
	}

	pub fn thread_mask(mut self, mask: u64) -> Self {
		self.thread_mask = mask;
		self
	}

	pub(crate) fn changes_owner(&self) -> bool {
		self.uid.is_some() || self.gid.is_some()
	}
}
