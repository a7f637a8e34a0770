//! UNIX stream sockets as typed states.
//!
//! `RawSocket` is created by `socket()`, becomes a `BoundSocket` through
//! `bind()`, and yields the listening descriptor through `listen()`.
//! Outbound sockets stay `RawSocket` until their descriptor is handed to the
//! connection that owns it.

mod bound;
mod options;
mod raw;

pub use self::bound::BoundSocket;
pub use self::options::{
	is_accepting, local_addr, peer_addr, recv_fd, send_fd, set_cloexec, set_nonblocking,
	set_recv_buffer_size, set_send_buffer_size,
};
pub use self::raw::RawSocket;

/// Protocol family passed to `socket()`.
pub const SOCK_DOMAIN: libc::c_int = libc::PF_UNIX;
/// Address family stored in `sockaddr_un`.
pub const SOCK_FAMILY: libc::c_int = libc::AF_UNIX;
/// Socket type: reliable, ordered, two-way byte stream.
pub const SOCK_TYPE: libc::c_int = libc::SOCK_STREAM;
pub const SOCK_PROTOCOL: libc::c_int = 0;
