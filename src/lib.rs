pub mod error;
pub mod event;
pub mod ptracer;
pub mod spawn;
pub mod status;
pub mod trace;

pub use error::{Error, ErrorKind, Result};
pub use event::{classify, Classifier, Event, TraceEvent, UnknownEvent};
pub use ptracer::{Options, Pid, Ptracer, Restart, Siginfo, Signal, State, TracedProcess, Tracee};
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub use ptracer::Registers;
pub use spawn::Command;
pub use status::{ExitStatus, RawStatus};
