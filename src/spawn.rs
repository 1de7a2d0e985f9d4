//! Spawning and reaping traced child processes.

use std::ffi::CString;
use std::panic::{self, AssertUnwindSafe};

use nix::{
    errno::Errno,
    sys::{signal::{raise, Signal}, wait::WaitPidFlag},
    unistd::{fork as nix_fork, ForkResult, Pid},
};
use tracing::{debug, warn};

use crate::error::{Error, Result, ResultExt};
use crate::event::{self, Event};
use crate::ptracer::Options;
use crate::trace;

/// Exit code of a child which could not set itself up for tracing.
const SETUP_FAILED: i32 = 127;

/// Exit code of a forked child whose entry point panicked.
const CHILD_PANICKED: i32 = 101;

/// Command to spawn as a child process to be traced.
#[derive(Clone, Debug)]
pub struct Command {
    /// Argument vector to pass to `execv()`.
    argv: Vec<CString>,

    /// Request `PTRACE_TRACEME` and raise `SIGSTOP` after forking, pre-exec.
    ///
    /// Defaults to `true`.
    trace_me: bool,

    /// Options to set once the child has been observed in its initial stop.
    options: Options,
}

impl Command {
    pub fn new(argv: Vec<impl Into<Vec<u8>>>) -> Result<Self> {
        if argv.is_empty() {
            return Err(Error::Argument("command executable required".into()));
        }

        // Ensure we own NUL-terminated strings for the foreign exec call.
        //
        // We're heap-allocating, so always do this before forking.
        let argv = argv
            .into_iter()
            .map(CString::new)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| Error::Argument(err.to_string()))?;

        Ok(Self { argv, trace_me: true, options: Options::empty() })
    }

    /// Set the value of the `trace_me` flag.
    pub fn trace_me(mut self, trace_me: bool) -> Self {
        self.trace_me = trace_me;
        self
    }

    /// Set ptrace options to apply when the child is first stopped.
    ///
    /// Ignored unless `trace_me` is set.
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Fork and exec a child process determined by `self.argv`.
    ///
    /// If `self.trace_me`, the child process will set itself as a tracee of the parent,
    /// then raise `SIGSTOP` so the parent can observe it without a race. This function
    /// consumes that stop, applies `self.options`, and returns with the child still
    /// stopped, before `exec()`.
    pub fn fork_exec(self) -> Result<Pid> {
        let options = trace::check_options(self.options)?;

        // Heap-allocates, must occur pre-fork.
        let argv = self.argv();

        // SAFETY: the child only makes async-signal-safe calls before `exec()` or
        // `_exit()`.
        match unsafe { nix_fork() }? {
            ForkResult::Child => {
                // Never return into the caller's stack in the child: any failure must
                // end the process right here.
                if self.trace_me {
                    Self::request_tracing();
                }

                // Use `libc::execv`, because the `nix` wrapper heap-allocates a `Vec`
                // internally, which is not async-signal-safe.
                unsafe {
                    libc::execv(argv[0], argv.as_ptr());
                    libc::_exit(SETUP_FAILED)
                }
            },
            ForkResult::Parent { child } => {
                debug!(pid = child.as_raw(), argv = ?self.argv, "spawned child");

                if self.trace_me {
                    await_initial_stop(child, options)?;
                }

                Ok(child)
            },
        }
    }

    fn request_tracing() {
        if trace::trace_me().is_err() || raise(Signal::SIGSTOP).is_err() {
            unsafe { libc::_exit(SETUP_FAILED) }
        }
    }

    // Construct NUL-terminated arguments for `execv`. We heap-allocate to return a `Vec`,
    // and so must do this before calling `fork()`.
    fn argv(&self) -> Vec<*const libc::c_char> {
        let mut argv: Vec<_> = self.argv
            .iter()
            .map(|s| s.as_ptr())
            .collect();
        argv.push(std::ptr::null());
        argv
    }
}

/// Fork a child which requests tracing, stops itself, then runs `child` and exits with
/// its return value.
///
/// Returns once the child has been observed in its initial stop, with `options` set.
///
/// # Safety
///
/// The child is a copy of the calling process with a single thread. If the caller is
/// multithreaded, `child` must only make async-signal-safe calls.
pub unsafe fn fork<F>(options: Options, child: F) -> Result<Pid>
where
    F: FnOnce() -> i32,
{
    let options = trace::check_options(options)?;

    match nix_fork()? {
        ForkResult::Child => {
            Command::request_tracing();

            let code = panic::catch_unwind(AssertUnwindSafe(child)).unwrap_or(CHILD_PANICKED);

            libc::_exit(code)
        },
        ForkResult::Parent { child } => {
            debug!(pid = child.as_raw(), "forked child");

            await_initial_stop(child, options)?;

            Ok(child)
        },
    }
}

/// Wait for a state change of `pid` with `waitpid(2)`.
///
/// Returns `None` if `WNOHANG` was passed and `pid` has not changed state. If `pid` is
/// not a waitable child or tracee, fails with [`Error::NoSuchProcess`].
pub fn waitpid(pid: Pid, flags: WaitPidFlag) -> Result<Option<i32>> {
    let mut status: libc::c_int = 0;

    // SAFETY: `status` is valid for writes for the duration of the call.
    let res = unsafe { libc::waitpid(pid.as_raw(), &mut status, flags.bits()) };

    match Errno::result(res) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(status)),
        Err(Errno::ECHILD) => Err(Error::NoSuchProcess { pid, source: Errno::ECHILD }),
        Err(errno) => Err::<Option<i32>, _>(errno).tracee_err(pid),
    }
}

// Consume the self-raised `SIGSTOP` of a new child, then set its options.
fn await_initial_stop(pid: Pid, options: Options) -> Result<()> {
    let status = match waitpid(pid, WaitPidFlag::__WALL)? {
        Some(status) => status,
        None => return Err(Error::Internal("blocking wait returned no status".into())),
    };

    match event::classify(status)? {
        Event::Stop => {},
        event if event.is_terminal() => {
            debug!(pid = pid.as_raw(), %event, "child exited before its initial stop");
            return Err(Error::NoSuchProcess { pid, source: Errno::ESRCH });
        },
        event => {
            warn!(pid = pid.as_raw(), %event, "unexpected initial stop of child");
            kill_and_reap(pid);
            return Err(Error::Internal(format!("unexpected initial stop: {}", event)));
        },
    }

    if !options.is_empty() {
        if let Err(err) = trace::setup(pid, options) {
            kill_and_reap(pid);
            return Err(err);
        }
    }

    Ok(())
}

// Dispose of a child that failed setup. It is stopped, so one wait reaps it.
fn kill_and_reap(pid: Pid) {
    match trace::kill(pid, libc::SIGKILL) {
        Ok(()) => {},
        Err(err) if err.tracee_died() => return,
        Err(err) => {
            warn!(pid = pid.as_raw(), %err, "unable to kill child");
            return;
        },
    }

    match waitpid(pid, WaitPidFlag::__WALL) {
        Ok(status) => debug!(pid = pid.as_raw(), ?status, "reaped child"),
        Err(err) if err.tracee_died() => {},
        Err(err) => warn!(pid = pid.as_raw(), %err, "unable to reap child"),
    }
}
