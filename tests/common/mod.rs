#![allow(dead_code)]

use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use uxlane::{FdOwner, GlobalSettings, Poller, ProtoContext, UnixStreamProtocol};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
	Register(RawFd, FdOwner, u64),
	Deregister(RawFd),
	WantSend(RawFd),
	CantSend(RawFd),
	CantRecv(RawFd),
}

/// Poller that records every call.
#[derive(Default)]
pub struct RecordingPoller {
	events: Mutex<Vec<Event>>,
	refuse: AtomicBool,
	unlink: Mutex<Option<PathBuf>>,
}

impl RecordingPoller {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Makes every later `register` fail.
	pub fn refuse_registrations(&self) {
		self.refuse.store(true, Ordering::SeqCst);
	}

	/// Makes the next `register` delete `path` first, standing in for a
	/// filesystem change racing with the bind.
	pub fn unlink_on_register(&self, path: PathBuf) {
		*self.unlink.lock() = Some(path);
	}

	pub fn events(&self) -> Vec<Event> {
		self.events.lock().clone()
	}

	pub fn registrations(&self) -> usize {
		self.events().iter().filter(|e| matches!(e, Event::Register(..))).count()
	}

	/// Descriptors registered and not deregistered since.
	pub fn live(&self) -> Vec<RawFd> {
		let mut live = Vec::new();
		for event in self.events() {
			match event {
				Event::Register(fd, ..) => live.push(fd),
				Event::Deregister(fd) => live.retain(|&l| l != fd),
				_ => {}
			}
		}
		live
	}
}

impl Poller for RecordingPoller {
	fn register(&self, fd: RawFd, owner: FdOwner, thread_mask: u64) -> std::io::Result<()> {
		if self.refuse.load(Ordering::SeqCst) {
			return Err(std::io::Error::other("fd table full"));
		}
		if let Some(path) = self.unlink.lock().take() {
			std::fs::remove_file(path).unwrap();
		}
		self.events.lock().push(Event::Register(fd, owner, thread_mask));
		Ok(())
	}

	fn deregister(&self, fd: RawFd) {
		self.events.lock().push(Event::Deregister(fd));
	}

	fn want_send(&self, fd: RawFd) {
		self.events.lock().push(Event::WantSend(fd));
	}

	fn cant_send(&self, fd: RawFd) {
		self.events.lock().push(Event::CantSend(fd));
	}

	fn cant_recv(&self, fd: RawFd) {
		self.events.lock().push(Event::CantRecv(fd));
	}
}

pub fn context(poller: &Arc<RecordingPoller>, settings: GlobalSettings, pid: u32) -> ProtoContext {
	ProtoContext::new(settings, poller.clone()).with_pid(pid)
}

pub fn protocol(poller: &Arc<RecordingPoller>, pid: u32) -> UnixStreamProtocol {
	UnixStreamProtocol::new(context(poller, GlobalSettings::new(), pid))
}

/// Entries of `dir`, sorted.
pub fn dir_entries(dir: &Path) -> Vec<PathBuf> {
	let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
		.unwrap()
		.map(|e| e.unwrap().path())
		.collect();
	entries.sort();
	entries
}

/// Abstract name unique to this test process.
pub fn abstract_name(tag: &str) -> Vec<u8> {
	format!("uxlane-{}-{}", std::process::id(), tag).into_bytes()
}
