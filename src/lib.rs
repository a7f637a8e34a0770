pub mod socket;
mod addr;
mod bind;
mod config;
mod connect;
mod error;
mod handoff;
mod listener;
mod poller;
mod proto;

pub use self::error::{SocketError, errno, BindStatus, BindOutcome, ConnectOutcome, ConnErrCode,
					  ConnectStep, classify_socket_errno, classify_connect_errno};
pub use self::addr::{AddrKind, FromSockAddr, ToSockAddr, UnixAddr, SUN_PATH_LEN};
pub use self::config::{BindConf, BufferConfig, GlobalSettings};
pub use self::poller::{ConnId, FdOwner, ListenerId, Poller};
pub use self::listener::{Listener, ListenerRef, ListenerState, Origin, PauseOutcome};
pub use self::connect::{Backend, ConnFlags, Connection, Server, Target};
pub use self::handoff::{InheritedSockets, export_listeners};
pub use self::proto::{ListenerSet, ProtoContext, ProtocolOps, ProtocolRegistry, UnixStreamProtocol};
