//! Interface to the external event poller.

use std::os::fd::RawFd;

/// Identifies a listener within its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u32);

/// Identifies an outbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

/// Who a registered descriptor belongs to. The poller derives the ready
/// callback from it: accept for listeners, connection I/O otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FdOwner {
	Listener(ListenerId),
	Connection(ConnId),
}

/// Event poller and descriptor table, as seen from the transport layer.
///
/// Implementations provide their own synchronization.
pub trait Poller: Send + Sync {
	/// Inserts `fd` in the descriptor table and the poller.
	fn register(&self, fd: RawFd, owner: FdOwner, thread_mask: u64) -> std::io::Result<()>;

	/// Removes `fd`. Called before the descriptor is closed.
	fn deregister(&self, fd: RawFd);

	/// Subscribes to write readiness.
	fn want_send(&self, fd: RawFd);

	/// Marks the descriptor as not ready for sending.
	fn cant_send(&self, fd: RawFd);

	/// Marks the descriptor as not ready for receiving.
	fn cant_recv(&self, fd: RawFd);
}
