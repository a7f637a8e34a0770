use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use crate::addr::{ToSockAddr, UnixAddr};
use crate::error::{SocketError, errno};
use super::bound::BoundSocket;
use super::{SOCK_DOMAIN, SOCK_PROTOCOL, SOCK_TYPE};

/// A UNIX stream socket that has been created but not yet bound or connected.
///
/// Dropping it closes the descriptor, so every early return releases it.
#[derive(Debug)]
pub struct RawSocket {
	fd: OwnedFd,
}

impl RawSocket {
	/// Creates a new UNIX stream socket.
	///
	/// No `SOCK_CLOEXEC`: listening sockets must survive `exec()` into a
	/// successor process. Outbound sockets set it explicitly when required.
	pub fn new() -> Result<Self, SocketError> {
		let fd = unsafe { libc::socket(SOCK_DOMAIN, SOCK_TYPE, SOCK_PROTOCOL) };
		if fd == -1 {
			return Err(SocketError::Create { errno: errno() });
		}
		let fd = unsafe { OwnedFd::from_raw_fd(fd) };
		Ok(Self { fd })
	}

	/// Returns the raw file descriptor.
	///
	/// Used internally for syscalls. Does not transfer ownership.
	#[inline]
	pub fn as_raw_fd(&self) -> libc::c_int {
		self.fd.as_raw_fd()
	}

	/// Binds the socket to an address.
	///
	/// Consumes self; on failure the descriptor is closed.
	/// For a path address this creates the socket file.
	pub fn bind(self, addr: &UnixAddr) -> Result<BoundSocket, SocketError> {
		let result = addr.with_raw(|ptr, len| unsafe { libc::bind(self.as_raw_fd(), ptr, len) });

		match result {
			Some(-1) => Err(SocketError::Bind {
				errno: errno(),
				addr: addr.to_string(),
			}),
			Some(_) => Ok(BoundSocket::from_fd(self.into_fd())),
			None => Err(SocketError::InvalidAddress {
				reason: "address too long",
			}),
		}
	}

	/// Issues one `connect()` without waiting.
	///
	/// The socket must already be non-blocking. The caller classifies the
	/// returned errno; `EINPROGRESS` is the usual answer.
	pub fn start_connect(&self, addr: &UnixAddr) -> Result<(), SocketError> {
		let result = addr.with_raw(|ptr, len| unsafe { libc::connect(self.as_raw_fd(), ptr, len) });

		match result {
			Some(-1) => Err(SocketError::Connect {
				errno: errno(),
				addr: addr.to_string(),
			}),
			Some(_) => Ok(()),
			None => Err(SocketError::InvalidAddress {
				reason: "address too long",
			}),
		}
	}

	pub(crate) fn into_fd(self) -> OwnedFd {
		self.fd
	}
}

impl AsRawFd for RawSocket {
	fn as_raw_fd(&self) -> RawFd {
		self.fd.as_raw_fd()
	}
}

impl AsFd for RawSocket {
	fn as_fd(&self) -> BorrowedFd<'_> {
		self.fd.as_fd()
	}
}

impl FromRawFd for RawSocket {
	unsafe fn from_raw_fd(fd: RawFd) -> Self {
		unsafe { Self { fd: OwnedFd::from_raw_fd(fd) } }
	}
}

impl IntoRawFd for RawSocket {
	fn into_raw_fd(self) -> RawFd {
		self.fd.into_raw_fd()
	}
}
