use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Socket creation/configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("socket() failed: {}", errno_to_str(*.errno))]
    Create { errno: i32 },

    #[error("bind({addr}) failed: {}", errno_to_str(*.errno))]
    Bind { errno: i32, addr: String },

    #[error("listen(backlog={backlog}) failed: {}", errno_to_str(*.errno))]
    Listen { errno: i32, backlog: i32 },

    #[error("connect({addr}) failed: {}", errno_to_str(*.errno))]
    Connect { errno: i32, addr: String },

    #[error("fcntl({op}) failed: {}", errno_to_str(*.errno))]
    Fcntl { errno: i32, op: &'static str },

    #[error("setsockopt({option}) failed: {}", errno_to_str(*.errno))]
    SetOption { errno: i32, option: &'static str },

    #[error("getsockopt({option}) failed: {}", errno_to_str(*.errno))]
    GetOption { errno: i32, option: &'static str },

    #[error("invalid address: {reason}")]
    InvalidAddress { reason: &'static str },
}

impl SocketError {
    /// Returns the raw errno carried by this error.
    pub fn errno(&self) -> i32 {
        match self {
            SocketError::Create { errno }
            | SocketError::Bind { errno, .. }
            | SocketError::Listen { errno, .. }
            | SocketError::Connect { errno, .. }
            | SocketError::Fcntl { errno, .. }
            | SocketError::SetOption { errno, .. }
            | SocketError::GetOption { errno, .. } => *errno,
            SocketError::InvalidAddress { .. } => libc::EINVAL,
        }
    }
}

/// Returns current errno value.
#[inline]
pub fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

/// Converts errno to human-readable string.
fn errno_to_str(errno: i32) -> String {
    match errno {
        libc::EACCES => "permission denied".into(),
        libc::EADDRINUSE => "address already in use".into(),
        libc::EADDRNOTAVAIL => "address not available".into(),
        libc::EAFNOSUPPORT => "address family not supported".into(),
        libc::EAGAIN => "resource temporarily unavailable".into(),
        libc::EALREADY => "operation already in progress".into(),
        libc::EBADF => "bad file descriptor".into(),
        libc::ECONNREFUSED => "connection refused".into(),
        libc::EINPROGRESS => "operation in progress".into(),
        libc::EINTR => "interrupted by signal".into(),
        libc::EINVAL => "invalid argument".into(),
        libc::EISCONN => "already connected".into(),
        libc::EMFILE => "too many open files".into(),
        libc::ENAMETOOLONG => "file name too long".into(),
        libc::ENETUNREACH => "network unreachable".into(),
        libc::ENFILE => "file table overflow".into(),
        libc::ENOBUFS => "no buffer space available".into(),
        libc::ENOENT => "no such file or directory".into(),
        libc::ENOMEM => "out of memory".into(),
        libc::EPERM => "operation not permitted".into(),
        libc::EPROTONOSUPPORT => "protocol not supported".into(),
        libc::ETIMEDOUT => "connection timed out".into(),
        _ => format!("errno {}", errno),
    }
}

/// Maps errno to std::io::ErrorKind.
fn errno_to_kind(errno: i32) -> std::io::ErrorKind {
    match errno {
        libc::EACCES | libc::EPERM => std::io::ErrorKind::PermissionDenied,
        libc::EADDRINUSE => std::io::ErrorKind::AddrInUse,
        libc::EADDRNOTAVAIL => std::io::ErrorKind::AddrNotAvailable,
        libc::EAGAIN => std::io::ErrorKind::WouldBlock,
        libc::ECONNREFUSED => std::io::ErrorKind::ConnectionRefused,
        libc::EINTR => std::io::ErrorKind::Interrupted,
        libc::EINVAL => std::io::ErrorKind::InvalidInput,
        libc::ENOENT => std::io::ErrorKind::NotFound,
        libc::ETIMEDOUT => std::io::ErrorKind::TimedOut,
        _ => std::io::ErrorKind::Other,
    }
}

impl From<SocketError> for std::io::Error {
    fn from(err: SocketError) -> Self {
        std::io::Error::new(errno_to_kind(err.errno()), err)
    }
}

// ============================================================================
// Bind-time status
// ============================================================================

/// Composable status returned by listener bind operations.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BindStatus(u8);

impl BindStatus {
    pub const NONE: BindStatus = BindStatus(0);
    /// A warning accompanies an otherwise successful bind.
    pub const WARN: BindStatus = BindStatus(0x01);
    /// The address is still held elsewhere; retrying later may succeed.
    pub const RETRYABLE: BindStatus = BindStatus(0x02);
    pub const FATAL: BindStatus = BindStatus(0x04);
    /// Stop binding the remaining listeners.
    pub const ABORT: BindStatus = BindStatus(0x08);
    /// The message must be shown to the operator.
    pub const ALERT: BindStatus = BindStatus(0x10);

    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn contains(self, other: BindStatus) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn intersects(self, other: BindStatus) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for BindStatus {
    type Output = BindStatus;

    fn bitor(self, rhs: BindStatus) -> BindStatus {
        BindStatus(self.0 | rhs.0)
    }
}

impl BitOrAssign for BindStatus {
    fn bitor_assign(&mut self, rhs: BindStatus) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for BindStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("NONE");
        }
        let names = [
            (BindStatus::WARN, "WARN"),
            (BindStatus::RETRYABLE, "RETRYABLE"),
            (BindStatus::FATAL, "FATAL"),
            (BindStatus::ABORT, "ABORT"),
            (BindStatus::ALERT, "ALERT"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Status plus the operator message of a bind attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BindOutcome {
    pub status: BindStatus,
    pub message: Option<String>,
}

impl BindOutcome {
    pub(crate) fn none() -> Self {
        Self::default()
    }

    /// Builds an outcome whose message fits a caller buffer of `errlen` bytes,
    /// terminator included. A zero `errlen` drops the message.
    pub(crate) fn failed(status: BindStatus, message: String, errlen: usize) -> Self {
        Self {
            status,
            message: truncate_message(message, errlen),
        }
    }
}

fn truncate_message(mut message: String, errlen: usize) -> Option<String> {
    if errlen == 0 {
        return None;
    }
    let max = errlen - 1;
    if message.len() > max {
        let mut cut = max;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    Some(message)
}

// ============================================================================
// Connect-time taxonomy
// ============================================================================

/// Coarse outcome of an outbound connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectOutcome {
    Ok,
    /// A system resource is lacking (descriptors, memory, local endpoints).
    Resource,
    /// The administrative socket ceiling was reached.
    ConfigLimit,
    ServerTimeout,
    /// The server refused, was unreachable, or denied access.
    ServerClosed,
    Internal,
}

impl ConnectOutcome {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == ConnectOutcome::Ok
    }
}

/// Precise reason attached to a failed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnErrCode {
    /// System-wide descriptor table is full (ENFILE).
    SysFdLimit,
    /// Process descriptor limit reached (EMFILE).
    ProcFdLimit,
    /// Kernel memory exhausted (ENOBUFS, ENOMEM).
    SysMemLimit,
    /// Address family or protocol unsupported.
    NoProto,
    SockErr,
    /// Descriptor at or above the configured socket ceiling.
    ConfFdLimit,
    /// No local endpoint available, usually a full server backlog.
    FreePorts,
    AddrInUse,
    L4Timeout,
    /// Refused, unreachable or permission denied.
    L4Refused,
}

impl ConnErrCode {
    /// True for descriptor/memory exhaustion, which warrants an emergency notice.
    pub fn is_exhaustion(self) -> bool {
        matches!(
            self,
            ConnErrCode::SysFdLimit | ConnErrCode::ProcFdLimit | ConnErrCode::SysMemLimit
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            ConnErrCode::SysFdLimit => "reached system FD limit",
            ConnErrCode::ProcFdLimit => "reached process FD limit",
            ConnErrCode::SysMemLimit => "reached system memory limit",
            ConnErrCode::NoProto => "protocol or address family not supported",
            ConnErrCode::SockErr => "general socket error",
            ConnErrCode::ConfFdLimit => "reached configured maxsock",
            ConnErrCode::FreePorts => "no free local endpoint",
            ConnErrCode::AddrInUse => "local address already in use",
            ConnErrCode::L4Timeout => "connection timed out",
            ConnErrCode::L4Refused => "connection refused",
        }
    }
}

/// Maps a failed `socket()` errno onto its discriminant.
pub fn classify_socket_errno(errno: i32) -> ConnErrCode {
    match errno {
        libc::ENFILE => ConnErrCode::SysFdLimit,
        libc::EMFILE => ConnErrCode::ProcFdLimit,
        libc::ENOBUFS | libc::ENOMEM => ConnErrCode::SysMemLimit,
        libc::EAFNOSUPPORT | libc::EPROTONOSUPPORT => ConnErrCode::NoProto,
        _ => ConnErrCode::SockErr,
    }
}

/// What a non-blocking `connect()` result means for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStep {
    /// Establishment continues asynchronously.
    InProgress,
    Connected,
    Failed(ConnectOutcome, ConnErrCode),
}

/// Maps a `connect()` errno (0 for success) onto the next step.
pub fn classify_connect_errno(errno: i32) -> ConnectStep {
    match errno {
        0 | libc::EISCONN => ConnectStep::Connected,
        libc::EINPROGRESS | libc::EALREADY => ConnectStep::InProgress,
        libc::EAGAIN | libc::EADDRNOTAVAIL => {
            ConnectStep::Failed(ConnectOutcome::Resource, ConnErrCode::FreePorts)
        }
        libc::EADDRINUSE => ConnectStep::Failed(ConnectOutcome::Resource, ConnErrCode::AddrInUse),
        libc::ETIMEDOUT => {
            ConnectStep::Failed(ConnectOutcome::ServerTimeout, ConnErrCode::L4Timeout)
        }
        _ => ConnectStep::Failed(ConnectOutcome::ServerClosed, ConnErrCode::L4Refused),
    }
}
