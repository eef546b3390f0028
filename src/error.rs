use thiserror::Error;

/// Unified error type for the support backend
#[derive(Error, Debug)]
pub enum WcaError {
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    #[error("D-Bus fdo error: {0}")]
    DbusFdo(#[from] zbus::fdo::Error),

    #[error("API version mismatch: caller built against {requested}, backend implements {implemented}")]
    VersionMismatch { requested: u32, implemented: u32 },

    #[error("Backend already initialized")]
    AlreadyInitialized,

    #[error("Backend not initialized")]
    NotInitialized,

    #[error("Backend not synchronized yet")]
    NotReady,

    #[error("Operation already in progress: {0}")]
    Busy(String),

    #[error("Device not found: {0}")]
    NoDevice(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid service handle: {0}")]
    InvalidHandle(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Connection manager error: {0}")]
    Daemon(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WcaError {
    /// Positive errno value describing this error
    pub fn errno(&self) -> i32 {
        match self {
            Self::Dbus(_) | Self::DbusFdo(_) | Self::Daemon(_) => libc::EIO,
            Self::VersionMismatch { .. } => libc::EPROTO,
            Self::AlreadyInitialized => libc::EALREADY,
            Self::NotInitialized => libc::ENOTCONN,
            Self::NotReady => libc::EAGAIN,
            Self::Busy(_) => libc::EBUSY,
            Self::NoDevice(_) => libc::ENODEV,
            Self::InvalidArgument(_) | Self::Parse(_) => libc::EINVAL,
            Self::InvalidHandle(_) => libc::EBADF,
            Self::PermissionDenied(_) => libc::EPERM,
            Self::Timeout(_) => libc::ETIMEDOUT,
            Self::Cancelled(_) => libc::ECANCELED,
            Self::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// Negative errno, the code handed back to C-style callers
    pub fn code(&self) -> i32 {
        -self.errno()
    }
}

pub type WcaResult<T> = Result<T, WcaError>;

/// Map a synchronous acceptance result to the signed code space:
/// `0` when accepted, a negative errno when rejected.
pub fn acceptance_code(result: &WcaResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}
