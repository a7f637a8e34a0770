//! Zero-downtime bind of UNIX stream listeners.
//!
//! A path listener is never bound to its final name directly. The new
//! socket is bound to `<path>.<pid>.tmp`, fully set up, then renamed over
//! `<path>`. The rename is atomic, so a client opening `<path>` always finds
//! a listening socket: the old one until the rename, the new one after.
//! The old socket stays reachable under `<path>.<pid>.bak` until the new one
//! is published, which is also what a failed rename is rolled back from.

use std::fs::{self, Permissions};
use std::io::ErrorKind;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::addr::{AddrKind, UnixAddr};
use crate::config::BindConf;
use crate::error::{BindOutcome, BindStatus};
use crate::listener::{Listener, ListenerState};
use crate::poller::FdOwner;
use crate::proto::ProtoContext;
use crate::socket::{BoundSocket, RawSocket, set_nonblocking};

const NAME_TOO_LONG: &str = "name too long for UNIX socket (limit usually 97)";

#[derive(Debug)]
struct BindFailure {
	status: BindStatus,
	msg: &'static str,
}

impl BindFailure {
	fn fatal(msg: &'static str) -> Self {
		Self { status: BindStatus::FATAL | BindStatus::ALERT, msg }
	}

	fn retryable(msg: &'static str) -> Self {
		Self { status: BindStatus::RETRYABLE | BindStatus::ALERT, msg }
	}
}

type BindResult<T> = Result<T, BindFailure>;

impl Listener {
	/// Binds the listener and moves it from ASSIGNED to LISTEN.
	///
	/// `errlen` is the size of the caller's message buffer, terminator
	/// included; the message is cut to fit. Any other state is left alone
	/// and reported as NONE.
	///
	/// On failure no descriptor stays open and no temporary or backup file
	/// remains.
	pub fn bind(&mut self, ctx: &ProtoContext, errlen: usize) -> BindOutcome {
		if self.state() != ListenerState::Assigned {
			return BindOutcome::none();
		}

		if !self.has_handed_fd() {
			if let Some(fd) = ctx.take_inherited(self.addr()) {
				self.offer_fd(fd);
			}
		}

		let handed = self.take_handed();
		let handed_raw = handed.as_ref().map(|fd| fd.as_raw_fd());

		let result = match handed {
			Some(fd) => self.finalize(ctx, BoundSocket::from_fd(fd), true),
			None => match self.addr().kind() {
				AddrKind::Path(path) => self.bind_path(ctx, path),
				AddrKind::Abstract(_) => self.bind_abstract(ctx),
			},
		};

		match result {
			Ok(fd) => {
				debug!(listener = self.id().0, addr = %self.addr(), fd = fd.as_raw_fd(), "listener bound");
				self.set_listening(fd);
				BindOutcome::none()
			}
			Err(failure) => {
				let subject = match handed_raw {
					Some(fd) => format!("fd {}", fd),
					None => self.addr().to_string(),
				};
				let message = format!("{} [{}]", failure.msg, subject);
				debug!(listener = self.id().0, status = ?failure.status, "{}", message);
				BindOutcome::failed(failure.status, message, errlen)
			}
		}
	}

	fn bind_path(&self, ctx: &ProtoContext, path: &Path) -> BindResult<OwnedFd> {
		let staging = Staging::prepare(self.addr(), path, ctx.pid())?;
		let temp_addr = UnixAddr::from_path(&staging.temp)
			.map_err(|_| BindFailure::fatal(NAME_TOO_LONG))?;

		let bound = create_and_bind(ctx, &temp_addr)?;
		apply_ownership(&staging.temp, self.conf())?;
		let fd = self.finalize(ctx, bound, false)?;

		if let Err(failure) = staging.publish() {
			ctx.poller().deregister(fd.as_raw_fd());
			return Err(failure);
		}
		Ok(fd)
	}

	fn bind_abstract(&self, ctx: &ProtoContext) -> BindResult<OwnedFd> {
		let bound = create_and_bind(ctx, self.addr())?;
		self.finalize(ctx, bound, false)
	}

	/// Steps shared by created and inherited sockets: ceiling check,
	/// non-blocking mode, listen, poller registration.
	fn finalize(&self, ctx: &ProtoContext, bound: BoundSocket, external: bool) -> BindResult<OwnedFd> {
		if bound.as_raw_fd() >= ctx.settings().max_sock {
			return Err(BindFailure::fatal("socket(): not enough free sockets, raise -n argument"));
		}
		set_nonblocking(&bound, true)
			.map_err(|_| BindFailure::fatal("cannot make UNIX socket non-blocking"))?;

		let fd = bound
			.listen_unless_accepting(self.conf().backlog, external)
			.map_err(|_| BindFailure::fatal("cannot listen to UNIX socket"))?;

		ctx.poller()
			.register(fd.as_raw_fd(), FdOwner::Listener(self.id()), self.conf().thread_mask)
			.map_err(|_| BindFailure::fatal("cannot register UNIX socket"))?;
		Ok(fd)
	}
}

fn create_and_bind(ctx: &ProtoContext, addr: &UnixAddr) -> BindResult<BoundSocket> {
	let sock = RawSocket::new().map_err(|_| BindFailure::fatal("cannot create UNIX socket"))?;
	if sock.as_raw_fd() >= ctx.settings().max_sock {
		return Err(BindFailure::fatal("socket(): not enough free sockets, raise -n argument"));
	}
	sock.bind(addr).map_err(|e| {
		if e.errno() == libc::EADDRINUSE {
			// the old process might still own it
			BindFailure::retryable("cannot listen to socket")
		} else {
			BindFailure::fatal("cannot bind UNIX socket")
		}
	})
}

fn apply_ownership(temp: &Path, conf: &BindConf) -> BindResult<()> {
	const MSG: &str = "cannot change UNIX socket ownership";
	if conf.changes_owner() {
		std::os::unix::fs::chown(temp, conf.uid, conf.gid).map_err(|_| BindFailure::fatal(MSG))?;
	}
	if conf.mode != 0 {
		fs::set_permissions(temp, Permissions::from_mode(conf.mode))
			.map_err(|_| BindFailure::fatal(MSG))?;
	}
	Ok(())
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
	match fs::remove_file(path) {
		Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
		_ => Ok(()),
	}
}

/// Filesystem side of a path bind. Dropping it before `publish` succeeds
/// removes the temporary and backup names, restoring the canonical one
/// first if the rename failed.
struct Staging<'a> {
	path: &'a Path,
	temp: PathBuf,
	backup: PathBuf,
	rename_failed: bool,
	published: bool,
}

impl<'a> Staging<'a> {
	fn prepare(addr: &UnixAddr, path: &'a Path, pid: u32) -> BindResult<Self> {
		let temp = addr.pid_sibling(pid, "tmp").ok_or(BindFailure::fatal(NAME_TOO_LONG))?;
		let backup = addr.pid_sibling(pid, "bak").ok_or(BindFailure::fatal(NAME_TOO_LONG))?;

		// leftovers of an earlier failed attempt
		for stale in [&temp, &backup] {
			remove_if_exists(stale)
				.map_err(|_| BindFailure::fatal("error when trying to unlink previous UNIX socket"))?;
		}

		match fs::hard_link(path, &backup) {
			Err(e) if e.kind() != ErrorKind::NotFound => {
				return Err(BindFailure::fatal("error when trying to preserve previous UNIX socket"));
			}
			_ => {}
		}

		Ok(Self {
			path,
			temp,
			backup,
			rename_failed: false,
			published: false,
		})
	}

	/// Renames the temporary name over the canonical one. Point of no return.
	fn publish(mut self) -> BindResult<()> {
		if let Err(e) = fs::rename(&self.temp, self.path) {
			trace!(path = %self.path.display(), error = %e, "rename failed, restoring backup");
			self.rename_failed = true;
			return Err(BindFailure::fatal("cannot switch final and temporary UNIX sockets"));
		}
		self.published = true;
		let _ = fs::remove_file(&self.backup);
		Ok(())
	}
}

impl Drop for Staging<'_> {
	fn drop(&mut self) {
		if self.published {
			return;
		}
		if self.rename_failed {
			// best effort: both this and the rename may fail, leaving no socket at <path>
			match fs::rename(&self.backup, self.path) {
				Err(e) if e.kind() == ErrorKind::NotFound => {
					let _ = fs::remove_file(self.path);
				}
				_ => {}
			}
		}
		let _ = fs::remove_file(&self.temp);
		let _ = fs::remove_file(&self.backup);
	}
}
