mod common;

use std::os::fd::OwnedFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;

use parking_lot::Mutex;
use uxlane::{
	BindConf, BindStatus, FdOwner, Listener, ListenerId, ListenerRef, ListenerState, PauseOutcome,
	ProtocolOps, UnixAddr,
};

use common::{Event, RecordingPoller, dir_entries};

const PID: u32 = 4242;

fn listener(id: u32, addr: UnixAddr) -> ListenerRef {
	Arc::new(Mutex::new(Listener::new(ListenerId(id), addr, BindConf::new())))
}

#[test]
fn add_assigns_init_listeners_once() {
	let dir = tempfile::tempdir().unwrap();
	let poller = RecordingPoller::new();
	let proto = common::protocol(&poller, PID);
	let a = listener(1, UnixAddr::from_path(dir.path().join("a.sock")).unwrap());
	let b = listener(2, UnixAddr::from_path(dir.path().join("b.sock")).unwrap());

	let mut set = proto.listeners().lock();
	proto.add(&mut set, &a);
	proto.add(&mut set, &b);
	// already assigned: ignored
	proto.add(&mut set, &a);

	assert_eq!(set.nb_listeners(), 2);
	assert_eq!(set.iter().count(), 2);
	assert_eq!(a.lock().state(), ListenerState::Assigned);
	assert_eq!(a.lock().proto(), Some("unix_stream"));
	drop(set);

	assert!(poller.events().is_empty());
	assert!(dir_entries(dir.path()).is_empty());
}

#[test]
fn bind_all_binds_every_listener() {
	let dir = tempfile::tempdir().unwrap();
	let poller = RecordingPoller::new();
	let proto = common::protocol(&poller, PID);
	let listeners: Vec<ListenerRef> = (0..3)
		.map(|i| listener(i, UnixAddr::from_path(dir.path().join(format!("{}.sock", i))).unwrap()))
		.collect();

	let mut set = proto.listeners().lock();
	for l in &listeners {
		proto.add(&mut set, l);
	}
	let out = proto.bind_all(&mut set, 256);
	drop(set);

	assert_eq!(out.status, BindStatus::NONE);
	assert_eq!(out.message, None);
	for (i, l) in listeners.iter().enumerate() {
		let l = l.lock();
		assert_eq!(l.state(), ListenerState::Listen);
		let fd = l.raw_fd().unwrap();
		assert!(
			poller
				.events()
				.contains(&Event::Register(fd, FdOwner::Listener(ListenerId(i as u32)), u64::MAX))
		);
	}
	assert_eq!(dir_entries(dir.path()).len(), 3);
}

#[test]
fn bind_all_aggregates_failures_and_continues() {
	let dir = tempfile::tempdir().unwrap();
	let poller = RecordingPoller::new();
	let proto = common::protocol(&poller, PID);

	let good = listener(1, UnixAddr::from_path(dir.path().join("good.sock")).unwrap());
	let base = dir.path().as_os_str().len() + 1;
	let long = dir.path().join("l".repeat(100 - base));
	let bad = listener(2, UnixAddr::from_path(&long).unwrap());
	let after = listener(3, UnixAddr::from_path(dir.path().join("after.sock")).unwrap());

	let mut set = proto.listeners().lock();
	for l in [&good, &bad, &after] {
		proto.add(&mut set, l);
	}
	let out = proto.bind_all(&mut set, 256);
	drop(set);

	assert_eq!(out.status, BindStatus::FATAL | BindStatus::ALERT);
	assert!(out.message.unwrap().starts_with("name too long for UNIX socket"));
	assert_eq!(good.lock().state(), ListenerState::Listen);
	assert_eq!(bad.lock().state(), ListenerState::Assigned);
	assert_eq!(after.lock().state(), ListenerState::Listen);
	assert_eq!(poller.registrations(), 2);
}

#[test]
fn bind_all_twice_is_harmless() {
	let dir = tempfile::tempdir().unwrap();
	let poller = RecordingPoller::new();
	let proto = common::protocol(&poller, PID);
	let l = listener(1, UnixAddr::from_path(dir.path().join("twice.sock")).unwrap());

	let mut set = proto.listeners().lock();
	proto.add(&mut set, &l);
	assert!(proto.bind_all(&mut set, 256).status.is_none());
	assert!(proto.bind_all(&mut set, 256).status.is_none());
	drop(set);

	assert_eq!(poller.registrations(), 1);
}

#[test]
fn unbind_all_returns_listeners_to_assigned() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("u.sock");
	let poller = RecordingPoller::new();
	let proto = common::protocol(&poller, PID);
	let bound = listener(1, UnixAddr::from_path(&path).unwrap());
	let idle = listener(2, UnixAddr::from_path(dir.path().join("idle.sock")).unwrap());

	let mut set = proto.listeners().lock();
	proto.add(&mut set, &bound);
	assert!(proto.bind(&mut bound.lock(), 256).status.is_none());
	proto.add(&mut set, &idle);
	let fd = bound.lock().raw_fd().unwrap();

	assert_eq!(proto.unbind_all(&mut set), BindStatus::NONE);
	assert_eq!(set.nb_listeners(), 2);
	drop(set);

	assert_eq!(bound.lock().state(), ListenerState::Assigned);
	assert_eq!(bound.lock().raw_fd(), None);
	assert_eq!(idle.lock().state(), ListenerState::Assigned);
	assert!(poller.events().contains(&Event::Deregister(fd)));
	assert!(poller.live().is_empty());
	// the file stays; a later bind replaces it
	assert!(path.exists());
	assert!(UnixStream::connect(&path).is_err());

	assert!(proto.bind(&mut bound.lock(), 256).status.is_none());
	assert!(UnixStream::connect(&path).is_ok());
}

#[test]
fn unbind_outside_listen_is_a_noop() {
	let poller = RecordingPoller::new();
	let proto = common::protocol(&poller, PID);
	let l = listener(1, UnixAddr::abstract_name(common::abstract_name("noop")).unwrap());

	assert_eq!(l.lock().unbind(proto.context().poller()), BindStatus::NONE);
	assert_eq!(l.lock().state(), ListenerState::Init);
	proto.add(&mut proto.listeners().lock(), &l);
	assert_eq!(l.lock().unbind(proto.context().poller()), BindStatus::NONE);
	assert_eq!(l.lock().state(), ListenerState::Assigned);
	assert!(poller.events().is_empty());
}

#[test]
fn pausing_a_path_listener_keeps_it_accepting() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("p.sock");
	let poller = RecordingPoller::new();
	let proto = common::protocol(&poller, PID);
	let l = listener(1, UnixAddr::from_path(&path).unwrap());
	proto.add(&mut proto.listeners().lock(), &l);
	assert!(proto.bind(&mut l.lock(), 256).status.is_none());

	assert_eq!(proto.pause(&mut l.lock()), PauseOutcome::Paused);

	let guard = l.lock();
	assert_eq!(guard.state(), ListenerState::Listen);
	let fd = guard.raw_fd().unwrap();
	let std_listener = UnixListener::from(guard.fd().unwrap().try_clone_to_owned().unwrap());
	drop(guard);

	assert_eq!(poller.live(), vec![fd]);
	let _client = UnixStream::connect(&path).unwrap();
	assert!(std_listener.accept().is_ok());
}

#[test]
fn pausing_an_abstract_listener_stops_it() {
	let addr = UnixAddr::abstract_name(common::abstract_name("pause")).unwrap();
	let poller = RecordingPoller::new();
	let proto = common::protocol(&poller, PID);
	let l = listener(1, addr.clone());
	proto.add(&mut proto.listeners().lock(), &l);
	assert!(proto.bind(&mut l.lock(), 256).status.is_none());
	let fd = l.lock().raw_fd().unwrap();

	assert_eq!(proto.pause(&mut l.lock()), PauseOutcome::Stopped);
	assert_eq!(l.lock().state(), ListenerState::Assigned);
	assert_eq!(l.lock().raw_fd(), None);
	assert!(poller.events().contains(&Event::Deregister(fd)));

	// the name is free again
	let other = listener(2, addr);
	proto.add(&mut proto.listeners().lock(), &other);
	assert!(proto.bind(&mut other.lock(), 256).status.is_none());
}

#[test]
fn listener_handed_a_descriptor_uses_it() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("h.sock");
	let fd: OwnedFd = UnixListener::bind(&path).unwrap().into();

	let poller = RecordingPoller::new();
	let proto = common::protocol(&poller, PID);
	let l = Arc::new(Mutex::new(Listener::inherited(
		ListenerId(1),
		UnixAddr::from_path(&path).unwrap(),
		BindConf::new(),
		fd,
	)));
	assert!(l.lock().has_handed_fd());

	let mut set = proto.listeners().lock();
	proto.add(&mut set, &l);
	assert!(proto.bind_all(&mut set, 256).status.is_none());
	drop(set);

	assert!(!l.lock().has_handed_fd());
	proto.unbind_all(&mut proto.listeners().lock());
	assert_eq!(l.lock().state(), ListenerState::Assigned);
}
