use std::ffi::OsStr;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::addr::ToSockAddr;
use crate::error::SocketError;

/// Size of the `sun_path` field of `sockaddr_un`.
pub const SUN_PATH_LEN: usize =
	std::mem::size_of::<libc::sockaddr_un>() - std::mem::size_of::<libc::sa_family_t>();

/// Unix domain socket address, stored exactly as the kernel sees `sun_path`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct UnixAddr {
	raw: [u8; SUN_PATH_LEN],
}

/// Decoded view of a [`UnixAddr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrKind<'a> {
	/// Filesystem path, without its terminator.
	Path(&'a Path),
	/// Abstract name: every byte after the leading zero, trailing zeros included.
	Abstract(&'a [u8]),
}

impl UnixAddr {
	/// Creates an address from a filesystem path.
	///
	/// The path must be non-empty, free of NUL bytes and fit in `sun_path`.
	pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SocketError> {
		let bytes = path.as_ref().as_os_str().as_bytes();
		if bytes.is_empty() {
			return Err(SocketError::InvalidAddress { reason: "empty path" });
		}
		if bytes.contains(&0) {
			return Err(SocketError::InvalidAddress { reason: "path contains a NUL byte" });
		}
		Self::from_bytes(bytes)
	}

	/// Creates an abstract socket address (Linux-only).
	///
	/// The name is stored after a leading zero and padded with zeros up to
	/// the buffer length; the padding is part of the name the kernel sees.
	pub fn abstract_name<N: AsRef<[u8]>>(name: N) -> Result<Self, SocketError> {
		let name = name.as_ref();
		if name.len() + 1 > SUN_PATH_LEN {
			return Err(SocketError::InvalidAddress { reason: "abstract name too long" });
		}
		let mut raw = [0u8; SUN_PATH_LEN];
		raw[1..=name.len()].copy_from_slice(name);
		Ok(Self { raw })
	}

	/// Interprets a raw `sun_path` buffer, zero-padded to full length.
	pub fn from_bytes(buf: &[u8]) -> Result<Self, SocketError> {
		if buf.len() > SUN_PATH_LEN {
			return Err(SocketError::InvalidAddress { reason: "address too long" });
		}
		let mut raw = [0u8; SUN_PATH_LEN];
		raw[..buf.len()].copy_from_slice(buf);
		Ok(Self { raw })
	}

	/// Decodes the buffer.
	pub fn kind(&self) -> AddrKind<'_> {
		if self.raw[0] == 0 {
			return AddrKind::Abstract(&self.raw[1..]);
		}
		let len = self.raw.iter().position(|&b| b == 0).unwrap_or(SUN_PATH_LEN);
		AddrKind::Path(Path::new(OsStr::from_bytes(&self.raw[..len])))
	}

	/// Returns the filesystem path, or None for an abstract address.
	pub fn path(&self) -> Option<&Path> {
		match self.kind() {
			AddrKind::Path(path) => Some(path),
			AddrKind::Abstract(_) => None,
		}
	}

	#[inline]
	pub fn is_abstract(&self) -> bool {
		self.raw[0] == 0
	}

	/// Returns the raw `sun_path` buffer.
	pub fn as_bytes(&self) -> &[u8; SUN_PATH_LEN] {
		&self.raw
	}

	/// Returns `<path>.<pid>.<ext>` if it still fits in `sun_path` with its
	/// terminator. None for abstract addresses or oversized names.
	pub(crate) fn pid_sibling(&self, pid: u32, ext: &str) -> Option<PathBuf> {
		let path = self.path()?;
		let mut name = path.as_os_str().to_owned();
		name.push(format!(".{}.{}", pid, ext));
		if name.as_bytes().len() >= SUN_PATH_LEN {
			return None;
		}
		Some(PathBuf::from(name))
	}

	/// Returns true if both addresses designate the same endpoint.
	///
	/// A socket bound under `<path>.<pid>.tmp` and renamed to `<path>` keeps
	/// reporting the temporary name, so the two forms compare equal.
	pub fn same_endpoint(&self, other: &UnixAddr) -> bool {
		if self.raw == other.raw {
			return true;
		}
		match (self.kind(), other.kind()) {
			(AddrKind::Path(a), AddrKind::Path(b)) => is_temp_of(a, b) || is_temp_of(b, a),
			_ => false,
		}
	}

	/// Converts to the raw sockaddr_un for syscalls.
	pub(crate) fn to_raw(&self) -> libc::sockaddr_un {
		let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
		addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
		for (dst, &byte) in addr.sun_path.iter_mut().zip(self.raw.iter()) {
			*dst = byte as libc::c_char;
		}
		addr
	}

	/// Creates from raw sockaddr_un; `len` is the length reported by the kernel.
	pub(crate) fn from_raw(raw: &libc::sockaddr_un, len: libc::socklen_t) -> Self {
		let family = std::mem::size_of::<libc::sa_family_t>();
		let n = (len as usize).saturating_sub(family).min(SUN_PATH_LEN);
		let mut buf = [0u8; SUN_PATH_LEN];
		for (dst, &c) in buf.iter_mut().zip(raw.sun_path[..n].iter()) {
			*dst = c as u8;
		}
		Self { raw: buf }
	}
}

fn is_temp_of(candidate: &Path, path: &Path) -> bool {
	let candidate = candidate.as_os_str().as_bytes();
	let path = path.as_os_str().as_bytes();
	let Some(rest) = candidate.strip_prefix(path) else {
		return false;
	};
	let Some(rest) = rest.strip_prefix(b".") else {
		return false;
	};
	let Some(pid) = rest.strip_suffix(b".tmp") else {
		return false;
	};
	!pid.is_empty() && pid.iter().all(u8::is_ascii_digit)
}

impl fmt::Display for UnixAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.kind() {
			AddrKind::Path(path) => write!(f, "{}", path.display()),
			AddrKind::Abstract(name) => {
				let end = name.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
				write!(f, "@{}", String::from_utf8_lossy(&name[..end]))
			}
		}
	}
}

impl fmt::Debug for UnixAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "UnixAddr({})", self)
	}
}

impl ToSockAddr for UnixAddr {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		let raw = self.to_raw();
		let ptr = &raw as *const _ as *const libc::sockaddr;
		let len = std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;
		Some(f(ptr, len))
	}
}
