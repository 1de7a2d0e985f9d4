//! Bit-level access to the traditional `wait(2)` status word.
//!
//! The layout reproduced here is the one Linux writes for `waitpid(2)`:
//!
//!   31                 16 15               8 7  6            0
//!    +------------------+------------------+--+--------------+
//!    |   trace event    |  code / stop sig | c|   term sig   |
//!    +------------------+------------------+--+--------------+
//!
//! - exited:   `term sig == 0`, exit code in bits `15:8`.
//! - signaled: `term sig` in `1..0x7f`, core-dump flag in bit 7.
//! - stopped:  low byte is `0x7f`, stop signal in bits `15:8`, and for trap stops a
//!   ptrace event code in bits `31:16`.

use std::fmt;

/// Low byte of a stopped status.
const STOPPED: i32 = 0x7f;

/// Bit OR'd into `SIGTRAP` for syscall-stops when `PTRACE_O_TRACESYSGOOD` is set.
pub const SYSCALL_TRAP_BIT: i32 = 0x80;

/// Highest valid signal number.
pub fn max_signal() -> i32 {
    libc::SIGRTMAX()
}

/// True if `sig` names a real signal (not `0`).
pub fn is_valid_signal(sig: i32) -> bool {
    1 <= sig && sig <= max_signal()
}

/// A raw `wait(2)` status.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct RawStatus(i32);

impl RawStatus {
    pub const fn new(status: i32) -> Self {
        Self(status)
    }

    /// Encode the status of a process that exited with `code`.
    pub const fn exited(code: u8) -> Self {
        Self((code as i32) << 8)
    }

    /// Encode the status of a process killed by `sig`.
    pub const fn signaled(sig: i32, core_dumped: bool) -> Self {
        let core = if core_dumped { 0x80 } else { 0 };
        Self((sig & 0x7f) | core)
    }

    /// Encode the status of a process stopped by `sig`, with ptrace event `event`.
    pub const fn stopped(sig: i32, event: u16) -> Self {
        Self(((event as i32) << 16) | ((sig & 0xff) << 8) | STOPPED)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    /// `WIFEXITED`.
    pub const fn is_exited(self) -> bool {
        self.term_sig() == 0
    }

    /// `WEXITSTATUS`.
    pub const fn exit_code(self) -> i32 {
        (self.0 >> 8) & 0xff
    }

    /// `WIFSIGNALED`.
    pub const fn is_signaled(self) -> bool {
        let sig = self.term_sig();
        sig != 0 && sig != STOPPED
    }

    /// `WTERMSIG`.
    pub const fn term_sig(self) -> i32 {
        self.0 & 0x7f
    }

    /// `WCOREDUMP`.
    pub const fn core_dumped(self) -> bool {
        self.0 & 0x80 != 0
    }

    /// `WIFSTOPPED`.
    pub const fn is_stopped(self) -> bool {
        self.0 & 0xff == STOPPED
    }

    /// `WSTOPSIG`, including the syscall-trap bit if present.
    pub const fn stop_sig(self) -> i32 {
        (self.0 >> 8) & 0xff
    }

    /// `WIFCONTINUED`.
    pub const fn is_continued(self) -> bool {
        self.0 == 0xffff
    }

    /// Ptrace event code in the upper word (`status >> 16`).
    pub const fn trace_event(self) -> u16 {
        ((self.0 as u32) >> 16) as u16
    }

    /// Bits that must be clear in a well-formed exited status.
    pub(crate) const fn exited_garbage(self) -> i32 {
        self.0 & !0xff00
    }

    /// Bits that must be clear in a well-formed signaled status.
    pub(crate) const fn signaled_garbage(self) -> i32 {
        self.0 & !0xff
    }
}

impl fmt::Debug for RawStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawStatus({:#x})", self.0)
    }
}

impl From<i32> for RawStatus {
    fn from(status: i32) -> Self {
        Self(status)
    }
}

/// Pending termination reported by the event message of a `PTRACE_EVENT_EXIT` stop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitStatus {
    Exited(i32),
    Signaled { signal: i32, core_dumped: bool },
}

impl ExitStatus {
    /// Decode the event message of an exit-notification stop.
    ///
    /// In this context, `PTRACE_GETEVENTMSG` returns the pending wait status as an
    /// `unsigned long`. Only the low 16-bit word is meaningful.
    pub fn from_event_message(msg: u64) -> Self {
        // The bit layout of the word `status` is:
        //
        //   15                         8   7                     0
        //    +-------------------------+---+---------------------+
        //    |        exit_code        | c |       sig_no        |
        //    +-------------------------+---+---------------------+
        //
        // If `status[6:0]` is nonzero, the process is being signaled with `sig_no`,
        // and a set `status[7]` bit flags a core dump. Otherwise, it is a normal exit
        // with exit code `status[15:8]`.
        let status = RawStatus::new(msg as u16 as i32);

        if status.is_exited() {
            ExitStatus::Exited(status.exit_code())
        } else {
            ExitStatus::Signaled {
                signal: status.term_sig(),
                core_dumped: status.core_dumped(),
            }
        }
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Exited(code) => Some(*code),
            ExitStatus::Signaled { .. } => None,
        }
    }
}
