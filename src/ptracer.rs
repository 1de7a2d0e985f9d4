//! Types for attaching to processes, managing tracees, and interpreting tracing events.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::time::Duration;

use nix::{errno::Errno, sys::wait::WaitPidFlag};
use tracing::{debug, info, trace, warn};

use crate::error::{internal_error, Error, Result};
use crate::event::{Classifier, Event};
use crate::spawn::{self, Command};
use crate::status::{ExitStatus, RawStatus};
use crate::trace;

pub use nix::unistd::Pid;
pub use nix::sys::ptrace::Options;

/// POSIX signal.
pub use nix::sys::signal::Signal;

/// Extra signal info, such as its cause.
pub type Siginfo = libc::siginfo_t;

/// General-purpose registers of a stopped tracee.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub type Registers = libc::user_regs_struct;

/// Lifecycle state of a process, from the point of view of one [`Ptracer`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum State {
    /// Not traced by us.
    Untraced,

    /// Traced and executing. The next stop is observed via [`Ptracer::wait()`].
    Running,

    /// In a ptrace-stop, ready to accept requests.
    Stopped,

    /// Seized and in group-stop, but allowed to run by `PTRACE_LISTEN`.
    Listening,

    /// Terminated and reaped. No request can succeed.
    Gone,
}

/// Restart requests, which resume stopped tracees.
///
/// The restart mode determines the possible subsequent stops of the restarted tracee.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Restart {
    Step,
    Continue,
    Syscall,
}

/// Tracee task observed in a stop, with an optional pending signal.
///
/// **Warning:** the underlying tracee is not guaranteed to exist, and
/// operations on it may fail between calls to [`Ptracer::wait()`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tracee {
    pid: Pid,
    status: RawStatus,
    event: Event,
    message: Option<u64>,
    pending: Option<i32>,

    #[doc(hidden)]
    _not_send: PhantomData<*const ()>,
}

impl Tracee {
    /// Construct a tracee for an observed `event`.
    ///
    /// Signals intercepted before delivery are pending by default, so that restarting
    /// the tracee delivers them. All other stops have no pending signal.
    pub fn new(pid: Pid, status: impl Into<RawStatus>, event: Event, message: Option<u64>) -> Self {
        let status = status.into();
        let pending = match event {
            Event::Genuine { signal } => Some(signal),
            _ => None,
        };
        let _not_send = PhantomData;

        Self { pid, status, event, message, pending, _not_send }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The raw `wait(2)` status this tracee was observed with.
    pub fn status(&self) -> RawStatus {
        self.status
    }

    pub fn event(&self) -> Event {
        self.event
    }

    /// The `PTRACE_GETEVENTMSG` message read when the stop was observed.
    ///
    /// `None` if the event carries no message, or if the tracee died before it could
    /// be read.
    pub fn message(&self) -> Option<u64> {
        self.message
    }

    /// For fork, vfork and clone stops, the new task.
    pub fn new_pid(&self) -> Option<Pid> {
        match self.event {
            Event::Fork | Event::Vfork | Event::Clone =>
                self.message.map(|msg| Pid::from_raw(msg as u32 as i32)),
            _ =>
                None,
        }
    }

    /// For exit-notification stops, the pending termination.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self.event {
            Event::Exit => self.message.map(ExitStatus::from_event_message),
            _ => None,
        }
    }

    pub fn pending_signal(&self) -> Option<i32> {
        self.pending
    }

    /// Set a signal to deliver to the stopped process upon restart.
    pub fn inject(&mut self, pending: i32) -> Result<()> {
        if trace::check_signal(pending)? == 0 {
            self.pending = None;
        } else {
            self.pending = Some(pending);
        }

        Ok(())
    }

    /// Remove any signal scheduled for delivery upon restart.
    pub fn suppress(&mut self) {
        self.pending = None;
    }

    /// Signal info for a signal-delivery-stop.
    pub fn siginfo(&self) -> Result<Option<Siginfo>> {
        let info = if let Event::Genuine { .. } = self.event {
            Some(trace::siginfo(self.pid)?)
        } else {
            None
        };

        Ok(info)
    }

    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    pub fn registers(&self) -> Result<Registers> {
        trace::registers(self.pid)
    }

    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    pub fn set_registers(&mut self, regs: Registers) -> Result<()> {
        trace::set_registers(self.pid, &regs)
    }
}

/// Per-process tracing record owned by a [`Ptracer`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TracedProcess {
    pid: Pid,
    state: State,
    options: Options,
    seized: bool,
    message: Option<u64>,
}

impl TracedProcess {
    fn new(pid: Pid, state: State, options: Options, seized: bool) -> Self {
        Self { pid, state, options, seized, message: None }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Options most recently negotiated for this tracee.
    pub fn options(&self) -> Options {
        self.options
    }

    /// True if attached with `PTRACE_SEIZE` semantics.
    pub fn seized(&self) -> bool {
        self.seized
    }
}

/// Tracer for Linux processes.
///
/// A `Ptracer` exclusively owns every tracee it spawns, attaches to, or auto-attaches
/// via fork, vfork and clone events. When dropped, it kills and reaps every tracee that
/// is still alive (see [`Ptracer::set_kill_on_drop()`]).
#[derive(Debug)]
pub struct Ptracer {
    /// Ptrace options that will be applied to spawned tracees.
    options: Options,

    /// Time to sleep for before polling tracees for new events.
    poll_delay: Duration,

    /// Upper bound for the polling backoff.
    max_poll_delay: Duration,

    classifier: Classifier,

    kill_on_drop: bool,

    /// Known tracees, and their state.
    tracees: BTreeMap<i32, TracedProcess>,
}

const DEFAULT_POLL_DELAY: Duration = Duration::from_micros(1);
const DEFAULT_MAX_POLL_DELAY: Duration = Duration::from_millis(10);

/// Options applied to spawned tracees by default: every option in
/// [`SUPPORTED_OPTIONS`](crate::trace::SUPPORTED_OPTIONS).
pub const DEFAULT_OPTIONS: Options = trace::SUPPORTED_OPTIONS;

/// Options required to tell syscall-stops apart from other `SIGTRAP` stops:
/// [`PTRACE_O_TRACESYSGOOD`](Options::PTRACE_O_TRACESYSGOOD).
pub const REQUIRED_OPTIONS: Options = Options::PTRACE_O_TRACESYSGOOD;

impl Ptracer {
    pub fn new() -> Self {
        Self {
            options: DEFAULT_OPTIONS,
            poll_delay: DEFAULT_POLL_DELAY,
            max_poll_delay: DEFAULT_MAX_POLL_DELAY,
            classifier: Classifier::new(),
            kill_on_drop: true,
            tracees: BTreeMap::new(),
        }
    }

    /// Return the ptrace options applied to newly-spawned tracees.
    ///
    /// The options set on a tracee are inherited by its auto-attached children.
    pub fn traceme_options(&self) -> Options {
        self.options
    }

    /// Set the ptrace options applied to newly-spawned tracees.
    ///
    /// **NOTE:** [`REQUIRED_OPTIONS`] are always set, even if unset in the passed value.
    ///
    /// Setting this value does not affect any existing tracees--- see
    /// [`Ptracer::setup()`].
    pub fn set_traceme_options(&mut self, options: Options) -> Result<()> {
        self.options = trace::check_options(options | REQUIRED_OPTIONS)?;
        Ok(())
    }

    /// Return the initial tracee poll delay.
    pub fn poll_delay(&self) -> Duration {
        self.poll_delay
    }

    /// Set the initial tracee poll delay.
    pub fn set_poll_delay(&mut self, poll_delay: Duration) {
        self.poll_delay = poll_delay;
    }

    pub fn max_poll_delay(&self) -> Duration {
        self.max_poll_delay
    }

    /// Set the maximum delay between two polls of the tracee set.
    pub fn set_max_poll_delay(&mut self, max_poll_delay: Duration) {
        self.max_poll_delay = max_poll_delay;
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Set the classifier used to interpret wait statuses.
    pub fn set_classifier(&mut self, classifier: Classifier) {
        self.classifier = classifier;
    }

    pub fn kill_on_drop(&self) -> bool {
        self.kill_on_drop
    }

    /// If `true` (the default), live tracees are killed and reaped on drop.
    pub fn set_kill_on_drop(&mut self, kill_on_drop: bool) {
        self.kill_on_drop = kill_on_drop;
    }

    /// The tracing record for `pid`, if it is owned by this tracer.
    pub fn tracee(&self, pid: Pid) -> Option<&TracedProcess> {
        self.tracees.get(&pid.as_raw())
    }

    /// Lifecycle state of `pid`. Unknown pids are [`State::Untraced`].
    pub fn state(&self, pid: Pid) -> State {
        self.tracee(pid).map_or(State::Untraced, |t| t.state)
    }

    /// Tracees which have not yet terminated.
    pub fn tracees(&self) -> impl Iterator<Item = &TracedProcess> {
        self.tracees.values().filter(|t| t.state != State::Gone)
    }

    /// Spawn `cmd` for tracing.
    ///
    /// The child requests `PTRACE_TRACEME` and stops itself before `exec()`. It is
    /// returned in that stop, with [`Ptracer::traceme_options()`] already applied.
    pub fn spawn(&mut self, cmd: Command) -> Result<Pid> {
        let options = self.options;
        let pid = cmd.trace_me(true).options(options).fork_exec()?;

        self.register(TracedProcess::new(pid, State::Stopped, options, false));

        Ok(pid)
    }

    /// Fork a traced child which runs `child`, then exits with its return value.
    ///
    /// The child is returned in its initial stop, with [`Ptracer::traceme_options()`]
    /// already applied.
    ///
    /// # Safety
    ///
    /// As for [`spawn::fork()`].
    pub unsafe fn fork<F>(&mut self, child: F) -> Result<Pid>
    where
        F: FnOnce() -> i32,
    {
        let options = self.options;
        let pid = spawn::fork(options, child)?;

        self.register(TracedProcess::new(pid, State::Stopped, options, false));

        Ok(pid)
    }

    /// Attach to a running process. This will deliver a `SIGSTOP`.
    ///
    /// **Warning:** the tracee is [`State::Running`] until its attach-stop is observed
    /// via [`Ptracer::wait()`].
    pub fn attach(&mut self, pid: Pid) -> Result<()> {
        self.ensure_untraced(pid, "attach")?;

        trace::attach(pid)?;

        self.register(TracedProcess::new(pid, State::Running, Options::empty(), false));

        Ok(())
    }

    /// Attach to a running process without stopping it, setting `options`.
    pub fn seize(&mut self, pid: Pid, options: Options) -> Result<()> {
        let options = trace::check_options(options)?;

        self.ensure_untraced(pid, "seize")?;

        trace::seize(pid, options)?;

        self.register(TracedProcess::new(pid, State::Running, options, true));

        Ok(())
    }

    /// Set the ptrace options of a stopped tracee.
    pub fn setup(&mut self, pid: Pid, options: Options) -> Result<()> {
        self.stopped(pid, "set options of")?;

        trace::setup(pid, options)?;

        self.tracee_mut(pid)?.options = options;

        Ok(())
    }

    /// Resume the stopped tracee, delivering any pending signal.
    pub fn restart(&mut self, tracee: Tracee, restart: Restart) -> Result<()> {
        let Tracee { pid, pending, .. } = tracee;
        let signal = pending.unwrap_or(0);

        match restart {
            Restart::Step => self.singlestep(pid, signal),
            Restart::Continue => self.resume(pid, signal),
            Restart::Syscall => self.syscall(pid, signal),
        }
    }

    /// Resume a stopped tracee, delivering `signal` if nonzero.
    pub fn resume(&mut self, pid: Pid, signal: i32) -> Result<()> {
        self.stopped(pid, "resume")?;
        trace::resume(pid, signal)?;
        self.set_running(pid)
    }

    /// Resume a stopped tracee until the next syscall entry or exit.
    pub fn syscall(&mut self, pid: Pid, signal: i32) -> Result<()> {
        self.stopped(pid, "syscall-step")?;
        trace::syscall(pid, signal)?;
        self.set_running(pid)
    }

    /// Resume a stopped tracee for a single instruction.
    pub fn singlestep(&mut self, pid: Pid, signal: i32) -> Result<()> {
        self.stopped(pid, "singlestep")?;
        trace::singlestep(pid, signal)?;
        self.set_running(pid)
    }

    /// Detach from a stopped tracee, which resumes untraced.
    pub fn detach(&mut self, pid: Pid, signal: i32) -> Result<()> {
        self.stopped(pid, "detach")?;
        trace::detach(pid, signal)?;
        self.remove_tracee(pid);

        Ok(())
    }

    /// Force a seized tracee into a stop.
    ///
    /// A no-op for tracees which are already stopped. Otherwise, the tracee remains
    /// [`State::Running`] until its interrupt-stop is observed via [`Ptracer::wait()`].
    pub fn interrupt(&mut self, pid: Pid) -> Result<()> {
        let tracee = self.live(pid)?;
        Self::ensure_seized(&tracee, "interrupt")?;

        // The kernel would hold the interrupt pending, and report a second stop as soon
        // as the tracee is resumed.
        if tracee.state == State::Stopped {
            debug!(pid = pid.as_raw(), "tracee already stopped, not interrupting");
            return Ok(());
        }

        trace::interrupt(pid)?;

        Ok(())
    }

    /// Let a stopped, seized tracee run without being reported as stopped.
    pub fn listen(&mut self, pid: Pid) -> Result<()> {
        let tracee = self.stopped(pid, "listen")?;
        Self::ensure_seized(&tracee, "listen")?;

        trace::listen(pid)?;

        self.set_tracee_state(pid, State::Listening)
    }

    /// Send `signal` to a live tracee.
    ///
    /// The tracee state is not changed: any resulting stop or termination is observed
    /// via [`Ptracer::wait()`].
    pub fn kill(&mut self, pid: Pid, signal: i32) -> Result<()> {
        self.live(pid)?;
        trace::kill(pid, signal)
    }

    /// The event message of the latest ptrace-event-stop of `pid`.
    ///
    /// Fails with [`Error::InvalidState`] unless `pid` is still in that stop, since the
    /// message is stale once the tracee has been resumed.
    pub fn event_message(&self, pid: Pid) -> Result<u64> {
        let tracee = self.stopped(pid, "read the event message of")?;

        match tracee.message {
            Some(msg) => Ok(msg),
            None => trace::event_message(pid),
        }
    }

    /// Wait for some live tracee to stop or terminate.
    ///
    /// If there are no tracees to wait on, returns `None`.
    pub fn wait(&mut self) -> Result<Option<Tracee>> {
        let mut poll_delay = self.poll_delay;

        // Wait on known tracees with exponential backoff.
        let (pid, status) = loop {
            if self.tracees().next().is_none() {
                debug!("no tracees to wait on");

                return Ok(None);
            }

            if let Some(update) = self.poll_tracees()? {
                // A tracee changed state; examine its `wait(2)` status.
                break update;
            } else {
                trace!(tracees = self.tracees.len(), ?poll_delay, "no tracee updates, backing off");

                std::thread::sleep(poll_delay);

                // Back off before next attempt.
                poll_delay = std::cmp::min(poll_delay * 2, self.max_poll_delay);
            }
        };

        self.observe(pid, status).map(Some)
    }

    /// Block until the live tracee `pid` stops or terminates.
    pub fn wait_for(&mut self, pid: Pid) -> Result<Tracee> {
        self.live(pid)?;

        match spawn::waitpid(pid, WaitPidFlag::__WALL)? {
            Some(status) => self.observe(pid, status),
            None => internal_error!("blocking wait returned no status"),
        }
    }

    // Poll tracees for a `wait(2)` status change.
    fn poll_tracees(&mut self) -> Result<Option<(Pid, i32)>> {
        let flags = WaitPidFlag::__WALL | WaitPidFlag::WNOHANG;

        let live: Vec<Pid> = self.tracees().map(|t| t.pid).collect();

        for pid in live {
            match spawn::waitpid(pid, flags) {
                Ok(None) => {
                    // Alive, no state change. Check remaining tracees.
                    continue;
                },
                Ok(Some(status)) => {
                    // One of our tracees changed state.
                    return Ok(Some((pid, status)));
                },
                Err(err) if err.tracee_died() => {
                    // Reaped elsewhere, or replaced by an off-leader `exec()`. Either way
                    // we will never see it again.
                    debug!(pid = pid.as_raw(), "tracee is no longer waitable");
                    self.set_tracee_state(pid, State::Gone)?;
                    continue;
                },
                Err(err) => {
                    // Something else went wrong.
                    return Err(err);
                },
            }
        }

        // No tracee changed state.
        Ok(None)
    }

    // Classify a status reported for `pid` and advance its state.
    fn observe(&mut self, pid: Pid, status: i32) -> Result<Tracee> {
        let event = match self.classifier.classify(status) {
            Ok(event) => event,
            Err(err) => {
                // The tracee is still in a ptrace-stop, and may be resumed.
                if RawStatus::new(status).is_stopped() {
                    self.set_tracee_state(pid, State::Stopped)?;
                }

                return Err(err);
            },
        };

        debug!(pid = pid.as_raw(), status, %event, "observed tracee status");

        if event.is_terminal() {
            info!(pid = pid.as_raw(), %event, "tracee terminated");

            let tracee = self.tracee_mut(pid)?;
            tracee.state = State::Gone;
            tracee.message = None;

            return Ok(Tracee::new(pid, status, event, None));
        }

        let message = if event.has_message() {
            match trace::event_message(pid) {
                Ok(msg) => Some(msg),
                Err(err) if err.tracee_died() => {
                    // Killed after the stop was reported. Its termination will be
                    // observed by a later wait.
                    debug!(pid = pid.as_raw(), %event, "tracee died before event message was read");
                    None
                },
                Err(err) => return Err(err),
            }
        } else {
            None
        };

        let (options, seized) = {
            let tracee = self.tracee_mut(pid)?;
            tracee.state = State::Stopped;
            tracee.message = message;
            (tracee.options, tracee.seized)
        };

        let tracee = Tracee::new(pid, status, event, message);

        match event {
            Event::Fork | Event::Vfork | Event::Clone => {
                // The new task starts traced, with our options, and will report an
                // initial stop. Take ownership so that we poll it.
                if let Some(new) = tracee.new_pid() {
                    self.adopt(new, options, seized);
                }
            },
            Event::Exec => {
                // The message is the former tid of the exec-ing thread. If the exec
                // happened off the thread group leader, that tid is gone for good.
                if let Some(old) = message.map(|msg| Pid::from_raw(msg as u32 as i32)) {
                    if old != pid {
                        self.remove_tracee(old);
                    }
                }
            },
            _ => {},
        }

        Ok(tracee)
    }

    fn register(&mut self, tracee: TracedProcess) {
        info!(pid = tracee.pid.as_raw(), state = ?tracee.state, seized = tracee.seized, "registering tracee");

        self.tracees.insert(tracee.pid.as_raw(), tracee);
    }

    // Take ownership of an auto-attached task, unless it is already known and alive.
    fn adopt(&mut self, pid: Pid, options: Options, seized: bool) {
        if self.live(pid).is_ok() {
            debug!(pid = pid.as_raw(), "auto-attached tracee already known");
            return;
        }

        self.register(TracedProcess::new(pid, State::Running, options, seized));
    }

    fn remove_tracee(&mut self, pid: Pid) -> Option<TracedProcess> {
        info!(pid = pid.as_raw(), "removing tracee");
        self.tracees.remove(&pid.as_raw())
    }

    fn tracee_mut(&mut self, pid: Pid) -> Result<&mut TracedProcess> {
        match self.tracees.get_mut(&pid.as_raw()) {
            Some(tracee) => Ok(tracee),
            None => internal_error!("no state for tracee"),
        }
    }

    fn set_tracee_state(&mut self, pid: Pid, state: State) -> Result<()> {
        debug!(pid = pid.as_raw(), ?state, "setting tracee state");

        self.tracee_mut(pid)?.state = state;

        Ok(())
    }

    fn set_running(&mut self, pid: Pid) -> Result<()> {
        let tracee = self.tracee_mut(pid)?;

        // The event message is only valid until the tracee is resumed.
        tracee.message = None;
        tracee.state = State::Running;

        debug!(pid = pid.as_raw(), "tracee running");

        Ok(())
    }

    fn live(&self, pid: Pid) -> Result<TracedProcess> {
        match self.tracee(pid) {
            Some(tracee) if tracee.state != State::Gone => Ok(*tracee),
            _ => Err(Error::NoSuchProcess { pid, source: Errno::ESRCH }),
        }
    }

    fn stopped(&self, pid: Pid, op: &'static str) -> Result<TracedProcess> {
        let tracee = self.live(pid)?;

        if tracee.state == State::Stopped {
            Ok(tracee)
        } else {
            Err(Error::InvalidState { pid, state: tracee.state, op })
        }
    }

    fn ensure_seized(tracee: &TracedProcess, op: &'static str) -> Result<()> {
        if tracee.seized {
            Ok(())
        } else {
            Err(Error::InvalidState { pid: tracee.pid, state: tracee.state, op })
        }
    }

    fn ensure_untraced(&self, pid: Pid, op: &'static str) -> Result<()> {
        match self.live(pid) {
            Ok(tracee) => Err(Error::InvalidState { pid, state: tracee.state, op }),
            Err(_) => Ok(()),
        }
    }

    // Kill `pid` and wait for its termination, resuming it from any intervening stops.
    fn terminate(&mut self, pid: Pid) {
        match trace::kill(pid, libc::SIGKILL) {
            Ok(()) => {},
            Err(err) if err.tracee_died() => {
                debug!(pid = pid.as_raw(), "tracee already dead");
            },
            Err(err) => {
                warn!(pid = pid.as_raw(), %err, "unable to kill tracee");
                return;
            },
        }

        loop {
            match spawn::waitpid(pid, WaitPidFlag::__WALL) {
                Ok(Some(status)) => {
                    let status = RawStatus::new(status);

                    if status.is_exited() || status.is_signaled() {
                        debug!(pid = pid.as_raw(), ?status, "reaped tracee");
                        break;
                    }

                    // E.g. an exit-notification stop.
                    match trace::resume(pid, 0) {
                        Ok(()) => {},
                        Err(err) if err.tracee_died() => {
                            // Reported by the next wait.
                        },
                        Err(err) => {
                            warn!(pid = pid.as_raw(), %err, "unable to resume dying tracee");
                            break;
                        },
                    }
                },
                Ok(None) => break,
                Err(err) => {
                    debug!(pid = pid.as_raw(), %err, "stopped reaping tracee");
                    break;
                },
            }
        }

        self.tracees.remove(&pid.as_raw());
    }
}

impl Default for Ptracer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Ptracer {
    fn drop(&mut self) {
        if !self.kill_on_drop {
            return;
        }

        let live: Vec<Pid> = self.tracees().map(|t| t.pid).collect();

        for pid in live {
            info!(pid = pid.as_raw(), "killing tracee on teardown");
            self.terminate(pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn pid(raw: i32) -> Pid {
        Pid::from_raw(raw)
    }

    #[test]
    fn test_default_options() {
        let tracer = Ptracer::new();
        assert!(tracer.traceme_options().contains(REQUIRED_OPTIONS));
        assert_eq!(tracer.traceme_options(), DEFAULT_OPTIONS);
    }

    #[test]
    fn test_set_traceme_options() {
        let mut tracer = Ptracer::new();

        tracer.set_traceme_options(Options::empty()).unwrap();
        assert_eq!(tracer.traceme_options(), REQUIRED_OPTIONS);

        tracer.set_traceme_options(Options::PTRACE_O_TRACEEXIT).unwrap();
        assert_eq!(tracer.traceme_options(), REQUIRED_OPTIONS | Options::PTRACE_O_TRACEEXIT);

        let err = tracer.set_traceme_options(Options::PTRACE_O_TRACESECCOMP).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Domain);

        // Unchanged by the rejected update.
        assert_eq!(tracer.traceme_options(), REQUIRED_OPTIONS | Options::PTRACE_O_TRACEEXIT);
    }

    #[test]
    fn test_unknown_pid_is_untraced() {
        let mut tracer = Ptracer::new();
        let unknown = pid(i32::MAX);

        assert_eq!(tracer.state(unknown), State::Untraced);
        assert!(tracer.tracee(unknown).is_none());
        assert!(tracer.wait().unwrap().is_none());

        // Existence is checked before any other argument.
        let errs = vec![
            tracer.resume(unknown, -1).unwrap_err(),
            tracer.syscall(unknown, 0).unwrap_err(),
            tracer.singlestep(unknown, 0).unwrap_err(),
            tracer.detach(unknown, i32::MAX).unwrap_err(),
            tracer.interrupt(unknown).unwrap_err(),
            tracer.listen(unknown).unwrap_err(),
            tracer.kill(unknown, libc::SIGKILL).unwrap_err(),
            tracer.event_message(unknown).unwrap_err(),
            tracer.setup(unknown, Options::PTRACE_O_TRACESECCOMP).unwrap_err(),
            tracer.wait_for(unknown).unwrap_err(),
        ];

        for err in errs {
            assert_eq!(err.kind(), ErrorKind::NoSuchProcess);
            assert_eq!(err.errno(), Some(Errno::ESRCH));
        }
    }

    #[test]
    fn test_state_checks() {
        let mut tracer = Ptracer::new();
        tracer.set_kill_on_drop(false);

        let running = pid(i32::MAX - 1);
        tracer.register(TracedProcess::new(running, State::Running, Options::empty(), false));

        let err = tracer.resume(running, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidState { state: State::Running, .. }));
        assert_eq!(err.kind(), ErrorKind::Permission);

        // Resuming invalidates the event message.
        let err = tracer.event_message(running).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);

        // Not seized.
        let err = tracer.interrupt(running).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);

        let err = tracer.attach(running).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);

        let err = tracer.seize(running, Options::empty()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);

        // Options are validated before ownership.
        let err = tracer.seize(running, Options::PTRACE_O_TRACESECCOMP).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Domain);
    }

    #[test]
    fn test_gone_tracees_reject_requests() {
        let mut tracer = Ptracer::new();
        let gone = pid(i32::MAX - 2);
        tracer.register(TracedProcess::new(gone, State::Gone, Options::empty(), false));

        assert_eq!(tracer.state(gone), State::Gone);
        assert_eq!(tracer.tracees().count(), 0);

        let err = tracer.resume(gone, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSuchProcess);

        let err = tracer.kill(gone, libc::SIGKILL).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSuchProcess);
    }

    #[test]
    fn test_tracee_pending_signal() {
        let event = Event::Genuine { signal: libc::SIGINT };
        let mut tracee = Tracee::new(pid(1), RawStatus::stopped(libc::SIGINT, 0), event, None);
        assert_eq!(tracee.pending_signal(), Some(libc::SIGINT));

        tracee.suppress();
        assert_eq!(tracee.pending_signal(), None);

        tracee.inject(libc::SIGUSR1).unwrap();
        assert_eq!(tracee.pending_signal(), Some(libc::SIGUSR1));

        tracee.inject(0).unwrap();
        assert_eq!(tracee.pending_signal(), None);

        let err = tracee.inject(-1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Domain);

        let stop = Tracee::new(pid(1), RawStatus::stopped(libc::SIGSTOP, 0), Event::Stop, None);
        assert_eq!(stop.pending_signal(), None);
    }

    #[test]
    fn test_tracee_messages() {
        let fork = Tracee::new(pid(1), RawStatus::stopped(libc::SIGTRAP, 1), Event::Fork, Some(42));
        assert_eq!(fork.new_pid(), Some(pid(42)));
        assert_eq!(fork.exit_status(), None);

        let exit = Tracee::new(pid(1), RawStatus::stopped(libc::SIGTRAP, 6), Event::Exit, Some(13 << 8));
        assert_eq!(exit.exit_status(), Some(ExitStatus::Exited(13)));
        assert_eq!(exit.new_pid(), None);

        let died = Tracee::new(pid(1), RawStatus::stopped(libc::SIGTRAP, 6), Event::Exit, None);
        assert_eq!(died.exit_status(), None);
    }
}
