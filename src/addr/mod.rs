//! UNIX-domain socket addresses.
//!
//! The endpoint of every socket in this crate is a fixed-size `sun_path`
//! buffer. Its first byte decides how the rest is read:
//! - non-zero: a NUL-terminated filesystem path
//! - zero: an abstract name, every remaining byte significant

mod unix;
pub use self::unix::{AddrKind, SUN_PATH_LEN, UnixAddr};

/// Trait for address types that can be converted to raw sockaddr for syscalls.
pub trait ToSockAddr {
	/// Calls the provided closure with a pointer to the raw sockaddr and its size.
	/// Returns None if the address cannot be expressed as a sockaddr.
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R;
}

/// Trait for address types that can be created from raw sockaddr.
pub trait FromSockAddr: Sized {
	/// Creates address from raw sockaddr storage.
	///
	/// # Safety
	/// `addr` must point to at least `len` readable bytes.
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self>;
}

impl FromSockAddr for UnixAddr {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if (len as usize) < std::mem::size_of::<libc::sa_family_t>() {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_un) };
		if raw.sun_family != libc::AF_UNIX as libc::sa_family_t {
			return None;
		}
		Some(Self::from_raw(raw, len))
	}
}
