use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use crate::error::{SocketError, errno};
use super::options::is_accepting;

/// A socket that has been bound to an address but not yet listening.
///
/// Also the entry state of a descriptor received from a predecessor
/// process, which may or may not be listening already.
#[derive(Debug)]
pub struct BoundSocket {
	fd: OwnedFd,
}

impl BoundSocket {
	/// Wraps a descriptor that is already bound.
	pub fn from_fd(fd: OwnedFd) -> Self {
		Self { fd }
	}

	/// Returns the raw file descriptor.
	#[inline]
	pub fn as_raw_fd(&self) -> libc::c_int {
		self.fd.as_raw_fd()
	}

	/// Starts listening with the given backlog.
	///
	/// Consumes self; on failure the descriptor is closed.
	pub fn listen(self, backlog: i32) -> Result<OwnedFd, SocketError> {
		let result = unsafe { libc::listen(self.as_raw_fd(), backlog) };
		if result == -1 {
			return Err(SocketError::Listen { errno: errno(), backlog });
		}
		Ok(self.fd)
	}

	/// Like [`listen`](Self::listen), but skips the call when `skip_if_accepting`
	/// is set and the socket already has `SO_ACCEPTCONN`.
	///
	/// An inherited socket is already listening; calling `listen()` again
	/// would only resize its backlog.
	pub fn listen_unless_accepting(
		self,
		backlog: i32,
		skip_if_accepting: bool,
	) -> Result<OwnedFd, SocketError> {
		// a failed query counts as "not listening"
		let ready = is_accepting(&self.fd).unwrap_or(false);
		if skip_if_accepting && ready {
			return Ok(self.fd);
		}
		self.listen(backlog)
	}
}

impl AsRawFd for BoundSocket {
	fn as_raw_fd(&self) -> RawFd {
		self.fd.as_raw_fd()
	}
}

impl AsFd for BoundSocket {
	fn as_fd(&self) -> BorrowedFd<'_> {
		self.fd.as_fd()
	}
}
