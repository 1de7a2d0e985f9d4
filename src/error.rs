use std::io;

use nix::errno::Errno;

use crate::ptracer::{Pid, State};

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], for callers that branch on the kind of
/// failure rather than on a specific variant.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// Malformed argument: a programming-contract violation.
    Argument,

    /// Well-formed argument with a value outside its valid domain.
    Domain,

    /// The target process does not exist, or has already exited.
    NoSuchProcess,

    /// The operation is not allowed in the current lifecycle state.
    Permission,

    /// A wait status matched none of the known encodings.
    Classification,

    /// Any other OS or I/O failure.
    Os,

    Internal,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Invalid signal number = {signal}")]
    InvalidSignal { signal: i32 },

    #[error("Invalid trace options = {bits:#x}")]
    InvalidOptions { bits: i64 },

    #[error("Invalid pid = {pid}")]
    InvalidPid { pid: i32 },

    #[error("Invalid wait status = {status}")]
    InvalidStatus { status: i32 },

    #[error("No such process = {pid}")]
    NoSuchProcess { pid: Pid, source: Errno },

    #[error("Operation not permitted on process = {pid}")]
    Permission { pid: Pid, source: Errno },

    #[error("Cannot {op} tracee = {pid} in state {state:?}")]
    InvalidState { pid: Pid, state: State, op: &'static str },

    #[error("Unrecognized wait status = {status:#x}")]
    Unclassified { status: i32 },

    #[error("Input/output error")]
    IO(#[from] io::Error),

    #[error("OS error")]
    OS(#[from] nix::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Argument(..) =>
                ErrorKind::Argument,
            Error::InvalidSignal { .. } |
            Error::InvalidOptions { .. } |
            Error::InvalidPid { .. } |
            Error::InvalidStatus { .. } =>
                ErrorKind::Domain,
            Error::NoSuchProcess { .. } =>
                ErrorKind::NoSuchProcess,
            Error::Permission { .. } |
            Error::InvalidState { .. } =>
                ErrorKind::Permission,
            Error::Unclassified { .. } =>
                ErrorKind::Classification,
            Error::IO(..) |
            Error::OS(..) =>
                ErrorKind::Os,
            Error::Internal(..) =>
                ErrorKind::Internal,
        }
    }

    /// The OS error code that caused this error, if any.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::NoSuchProcess { source, .. } |
            Error::Permission { source, .. } =>
                Some(*source),
            Error::OS(errno) =>
                Some(*errno),
            Error::IO(err) =>
                err.raw_os_error().map(Errno::from_i32),
            _ =>
                None,
        }
    }

    /// True if the error means the target process is gone.
    pub fn tracee_died(&self) -> bool {
        matches!(self, Error::NoSuchProcess { .. })
    }
}

pub(crate) trait ResultExt<T> {
    /// Attribute an OS error to the process `pid`, so that `ESRCH` and `EPERM` keep
    /// their own error kinds.
    fn tracee_err(self, pid: Pid) -> Result<T>;
}

impl<T> ResultExt<T> for std::result::Result<T, nix::Error> {
    fn tracee_err(self, pid: Pid) -> Result<T> {
        self.map_err(|source| match source {
            Errno::ESRCH => Error::NoSuchProcess { pid, source },
            Errno::EPERM => Error::Permission { pid, source },
            errno => Error::OS(errno),
        })
    }
}

macro_rules! internal_error {
    ($msg: expr) => {
        return Err(crate::error::Error::Internal($msg.into()))
    }
}

pub(crate) use internal_error;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracee_err_kinds() {
        let pid = Pid::from_raw(1234);

        let err = Err::<(), _>(Errno::ESRCH).tracee_err(pid).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSuchProcess);
        assert_eq!(err.errno(), Some(Errno::ESRCH));
        assert!(err.tracee_died());

        let err = Err::<(), _>(Errno::EPERM).tracee_err(pid).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
        assert_eq!(err.errno(), Some(Errno::EPERM));
        assert!(!err.tracee_died());

        let err = Err::<(), _>(Errno::EIO).tracee_err(pid).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Os);
        assert_eq!(err.errno(), Some(Errno::EIO));
    }

    #[test]
    fn test_domain_errors_are_not_process_errors() {
        let errs = [
            Error::InvalidSignal { signal: -1 },
            Error::InvalidOptions { bits: -1 },
            Error::InvalidPid { pid: 0 },
            Error::InvalidStatus { status: -1 },
        ];

        for err in &errs {
            assert_eq!(err.kind(), ErrorKind::Domain);
            assert_eq!(err.errno(), None);
            assert!(!err.tracee_died());
        }
    }

    #[test]
    fn test_unclassified_kind() {
        let err = Error::Unclassified { status: 0xffff };
        assert_eq!(err.kind(), ErrorKind::Classification);
        assert_eq!(err.to_string(), "Unrecognized wait status = 0xffff");
    }
}
