use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::addr::{FromSockAddr, UnixAddr};
use crate::error::{SocketError, errno};

/// Sets or clears `O_NONBLOCK`.
///
/// Required before handing a descriptor to the poller.
pub fn set_nonblocking<S: AsRawFd>(socket: &S, nonblocking: bool) -> Result<(), SocketError> {
	let flags = unsafe { libc::fcntl(socket.as_raw_fd(), libc::F_GETFL) };
	if flags == -1 {
		return Err(SocketError::Fcntl { errno: errno(), op: "F_GETFL" });
	}

	let new_flags = if nonblocking {
		flags | libc::O_NONBLOCK
	} else {
		flags & !libc::O_NONBLOCK
	};

	let result = unsafe { libc::fcntl(socket.as_raw_fd(), libc::F_SETFL, new_flags) };
	if result == -1 {
		return Err(SocketError::Fcntl { errno: errno(), op: "F_SETFL" });
	}
	Ok(())
}

/// Sets `FD_CLOEXEC` so the descriptor does not leak into exec'd workers.
pub fn set_cloexec<S: AsRawFd>(socket: &S) -> Result<(), SocketError> {
	let result = unsafe { libc::fcntl(socket.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
	if result == -1 {
		return Err(SocketError::Fcntl { errno: errno(), op: "F_SETFD" });
	}
	Ok(())
}

/// Returns true if the socket is already listening (`SO_ACCEPTCONN`).
pub fn is_accepting<S: AsRawFd>(socket: &S) -> Result<bool, SocketError> {
	let mut val: libc::c_int = 0;
	let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
	let result = unsafe {
		libc::getsockopt(
			socket.as_raw_fd(),
			libc::SOL_SOCKET,
			libc::SO_ACCEPTCONN,
			&mut val as *mut _ as *mut libc::c_void,
			&mut len,
		)
	};
	if result == -1 {
		return Err(SocketError::GetOption { errno: errno(), option: "SO_ACCEPTCONN" });
	}
	Ok(val != 0)
}

/// Sets receive buffer size (SO_RCVBUF).
///
/// Kernel typically doubles this value internally.
pub fn set_recv_buffer_size<S: AsRawFd>(socket: &S, size: usize) -> Result<(), SocketError> {
	set_int_option(socket, libc::SO_RCVBUF, size as libc::c_int, "SO_RCVBUF")
}

/// Sets send buffer size (SO_SNDBUF).
///
/// Kernel typically doubles this value internally.
pub fn set_send_buffer_size<S: AsRawFd>(socket: &S, size: usize) -> Result<(), SocketError> {
	set_int_option(socket, libc::SO_SNDBUF, size as libc::c_int, "SO_SNDBUF")
}

fn set_int_option<S: AsRawFd>(
	socket: &S,
	option: libc::c_int,
	val: libc::c_int,
	name: &'static str,
) -> Result<(), SocketError> {
	let result = unsafe {
		libc::setsockopt(
			socket.as_raw_fd(),
			libc::SOL_SOCKET,
			option,
			&val as *const _ as *const libc::c_void,
			std::mem::size_of::<libc::c_int>() as libc::socklen_t,
		)
	};
	if result == -1 {
		Err(SocketError::SetOption { errno: errno(), option: name })
	} else {
		Ok(())
	}
}

/// Returns the local address of a socket (`getsockname`).
///
/// None for an unnamed socket, such as a client that never called `bind()`.
pub fn local_addr<S: AsRawFd>(socket: &S) -> Result<Option<UnixAddr>, SocketError> {
	sock_name(socket, libc::getsockname, "SO_SOCKNAME")
}

/// Returns the remote address of a connected socket (`getpeername`).
///
/// None if the peer is unnamed.
pub fn peer_addr<S: AsRawFd>(socket: &S) -> Result<Option<UnixAddr>, SocketError> {
	sock_name(socket, libc::getpeername, "SO_PEERNAME")
}

fn sock_name<S: AsRawFd>(
	socket: &S,
	query: unsafe extern "C" fn(libc::c_int, *mut libc::sockaddr, *mut libc::socklen_t) -> libc::c_int,
	option: &'static str,
) -> Result<Option<UnixAddr>, SocketError> {
	let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
	let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

	let result = unsafe {
		query(
			socket.as_raw_fd(),
			&mut storage as *mut _ as *mut libc::sockaddr,
			&mut len,
		)
	};
	if result == -1 {
		return Err(SocketError::GetOption { errno: errno(), option });
	}
	// the kernel reports only the family for an unnamed socket
	if len as usize <= std::mem::size_of::<libc::sa_family_t>() {
		return Ok(None);
	}

	unsafe {
		UnixAddr::from_sockaddr(&storage as *const _ as *const libc::sockaddr, len)
			.map(Some)
			.ok_or(SocketError::InvalidAddress { reason: "not a unix address" })
	}
}

/// Sends a file descriptor over a Unix socket, with `payload` as the data part.
///
/// The receiving process gets a new fd pointing to the same resource.
pub fn send_fd<S: AsRawFd, F: AsRawFd>(socket: &S, fd: &F, payload: &[u8]) -> Result<(), SocketError> {
	let fd_to_send = fd.as_raw_fd();
	let cmsg_space = unsafe { libc::CMSG_SPACE(std::mem::size_of::<RawFd>() as u32) } as usize;
	let mut cmsg_buf = vec![0u8; cmsg_space];

	// at least one byte must accompany the control message
	let dummy = [0u8; 1];
	let data: &[u8] = if payload.is_empty() { &dummy } else { payload };
	let mut iov = libc::iovec {
		iov_base: data.as_ptr() as *mut libc::c_void,
		iov_len: data.len(),
	};

	let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
	msg.msg_iov = &mut iov;
	msg.msg_iovlen = 1;
	msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
	msg.msg_controllen = cmsg_space as _;

	let cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
	if cmsg.is_null() {
		return Err(SocketError::InvalidAddress { reason: "no room for control message" });
	}
	unsafe {
		(*cmsg).cmsg_level = libc::SOL_SOCKET;
		(*cmsg).cmsg_type = libc::SCM_RIGHTS;
		(*cmsg).cmsg_len = libc::CMSG_LEN(std::mem::size_of::<RawFd>() as u32) as _;
		std::ptr::copy_nonoverlapping(
			&fd_to_send as *const RawFd,
			libc::CMSG_DATA(cmsg) as *mut RawFd,
			1,
		);
	}

	let result = unsafe { libc::sendmsg(socket.as_raw_fd(), &msg, 0) };
	if result == -1 {
		Err(SocketError::SetOption { errno: errno(), option: "SCM_RIGHTS" })
	} else {
		Ok(())
	}
}

/// Receives a file descriptor from a Unix socket.
///
/// Returns the fd and the bytes of the data part that came with it, or None
/// once the peer has shut the channel down. `buf_len` bounds the data part.
pub fn recv_fd<S: AsRawFd>(
	socket: &S,
	buf_len: usize,
) -> Result<Option<(OwnedFd, Vec<u8>)>, SocketError> {
	let cmsg_space = unsafe { libc::CMSG_SPACE(std::mem::size_of::<RawFd>() as u32) } as usize;
	let mut cmsg_buf = vec![0u8; cmsg_space];

	let mut data = vec![0u8; buf_len.max(1)];
	let mut iov = libc::iovec {
		iov_base: data.as_mut_ptr() as *mut libc::c_void,
		iov_len: data.len(),
	};

	let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
	msg.msg_iov = &mut iov;
	msg.msg_iovlen = 1;
	msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
	msg.msg_controllen = cmsg_space as _;

	let n = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, 0) };
	if n == -1 {
		return Err(SocketError::GetOption { errno: errno(), option: "SCM_RIGHTS" });
	}
	if n == 0 {
		return Ok(None);
	}

	let cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
	if cmsg.is_null() {
		return Err(SocketError::InvalidAddress { reason: "no control message received" });
	}

	let fd = unsafe {
		if (*cmsg).cmsg_level != libc::SOL_SOCKET || (*cmsg).cmsg_type != libc::SCM_RIGHTS {
			return Err(SocketError::InvalidAddress { reason: "unexpected control message type" });
		}
		let mut raw: RawFd = -1;
		std::ptr::copy_nonoverlapping(libc::CMSG_DATA(cmsg) as *const RawFd, &mut raw, 1);
		OwnedFd::from_raw_fd(raw)
	};

	data.truncate(n as usize);
	Ok(Some((fd, data)))
}
