//! Classification of `wait(2)` statuses into tracing events.

use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::ptracer::{Options, Signal};
use crate::status::{self, RawStatus, SYSCALL_TRAP_BIT};

/// `PTRACE_EVENT_STOP`, reported for interrupt-stops and for group-stops of seized
/// tracees.
const EVENT_STOP: u16 = libc::PTRACE_EVENT_STOP as u16;

/// The kind of stop or termination described by one wait status.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Event {
    /// Job-control or administrative stop, safe to resume transparently.
    Stop,

    /// Syscall-enter-stop or syscall-exit-stop.
    Syscall,

    // ptrace-event-stops
    Fork,
    Vfork,
    Clone,
    VforkDone,
    Exec,

    /// The tracee is about to exit. Its termination is reported by a later status.
    Exit,

    /// Signal-delivery-stop for a signal which will be delivered on restart unless
    /// suppressed.
    Genuine { signal: i32 },

    /// Normal termination.
    ExitGenuine { code: i32 },

    /// Termination by an uncaught signal.
    ExitSignal { signal: i32, core_dumped: bool },
}

impl Event {
    /// Stable, lowercase name of the event kind.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Stop => "stop",
            Event::Syscall => "syscall",
            Event::Fork => "fork",
            Event::Vfork => "vfork",
            Event::Clone => "clone",
            Event::VforkDone => "vfork_done",
            Event::Exec => "exec",
            Event::Exit => "exit",
            Event::Genuine { .. } => "genuine",
            Event::ExitGenuine { .. } => "exit_genuine",
            Event::ExitSignal { .. } => "exit_signal",
        }
    }

    /// Auxiliary value: the exit code, or the signal number.
    pub fn payload(&self) -> Option<i32> {
        match *self {
            Event::Genuine { signal } => Some(signal),
            Event::ExitGenuine { code } => Some(code),
            Event::ExitSignal { signal, .. } => Some(signal),
            _ => None,
        }
    }

    /// The carried signal, if it is one `nix` can name.
    pub fn signal(&self) -> Option<Signal> {
        match *self {
            Event::Genuine { signal } |
            Event::ExitSignal { signal, .. } =>
                Signal::try_from(signal).ok(),
            _ =>
                None,
        }
    }

    /// True if the tracee no longer exists once this event is observed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::ExitGenuine { .. } | Event::ExitSignal { .. })
    }

    /// True for the events that carry a message from `PTRACE_GETEVENTMSG`.
    pub fn has_message(&self) -> bool {
        self.trace_event().is_some()
    }

    /// The ptrace event which produces this stop, if any.
    pub fn trace_event(&self) -> Option<TraceEvent> {
        let event = match self {
            Event::Fork => TraceEvent::Fork,
            Event::Vfork => TraceEvent::Vfork,
            Event::Clone => TraceEvent::Clone,
            Event::Exec => TraceEvent::Exec,
            Event::VforkDone => TraceEvent::VforkDone,
            Event::Exit => TraceEvent::Exit,
            _ => return None,
        };

        Some(event)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload() {
            Some(payload) => write!(f, "{}({})", self.name(), payload),
            None => f.write_str(self.name()),
        }
    }
}

/// Kernel ptrace event codes, as found in the upper word of a `SIGTRAP` stop status.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u16)]
pub enum TraceEvent {
    Fork = 1,
    Vfork = 2,
    Clone = 3,
    Exec = 4,
    VforkDone = 5,
    Exit = 6,
}

impl TraceEvent {
    pub const ALL: [TraceEvent; 6] = [
        TraceEvent::Fork,
        TraceEvent::Vfork,
        TraceEvent::Clone,
        TraceEvent::Exec,
        TraceEvent::VforkDone,
        TraceEvent::Exit,
    ];

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|event| event.code() == code)
    }

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        self.event().name()
    }

    /// The event reported for a trap-stop with this code.
    pub fn event(self) -> Event {
        match self {
            TraceEvent::Fork => Event::Fork,
            TraceEvent::Vfork => Event::Vfork,
            TraceEvent::Clone => Event::Clone,
            TraceEvent::Exec => Event::Exec,
            TraceEvent::VforkDone => Event::VforkDone,
            TraceEvent::Exit => Event::Exit,
        }
    }

    /// The ptrace option which enables stops for this event.
    pub fn option(self) -> Options {
        match self {
            TraceEvent::Fork => Options::PTRACE_O_TRACEFORK,
            TraceEvent::Vfork => Options::PTRACE_O_TRACEVFORK,
            TraceEvent::Clone => Options::PTRACE_O_TRACECLONE,
            TraceEvent::Exec => Options::PTRACE_O_TRACEEXEC,
            TraceEvent::VforkDone => Options::PTRACE_O_TRACEVFORKDONE,
            TraceEvent::Exit => Options::PTRACE_O_TRACEEXIT,
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TraceEvent {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|event| event.name() == name)
            .ok_or_else(|| Error::Argument(format!("unknown trace event name `{}`", name)))
    }
}

/// How to classify a trap-stop whose ptrace event code is not a known one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnknownEvent {
    /// Report a plain [`Event::Stop`].
    Stop,

    /// Fail with [`Error::Unclassified`].
    Reject,
}

/// Wait status classifier.
///
/// The defaults match Linux: the job-control stop signals are `SIGSTOP`, `SIGTSTP`,
/// `SIGTTIN` and `SIGTTOU`, and trap-stops with an unknown event code are plain stops.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Classifier {
    /// Bit `n` is set iff signal `n` is a job-control stop signal.
    stop_signals: u128,

    unknown_event: UnknownEvent,
}

const fn signal_bit(sig: i32) -> u128 {
    1u128 << (sig as u32)
}

const DEFAULT_STOP_SIGNALS: u128 = signal_bit(libc::SIGSTOP)
    | signal_bit(libc::SIGTSTP)
    | signal_bit(libc::SIGTTIN)
    | signal_bit(libc::SIGTTOU);

impl Classifier {
    pub const fn new() -> Self {
        Self {
            stop_signals: DEFAULT_STOP_SIGNALS,
            unknown_event: UnknownEvent::Stop,
        }
    }

    /// Replace the set of signals whose stops are reported as [`Event::Stop`].
    ///
    /// Fails if any signal number is invalid.
    pub fn with_stop_signals(mut self, signals: &[i32]) -> Result<Self> {
        let mut set = 0;

        for &signal in signals {
            if !status::is_valid_signal(signal) {
                return Err(Error::InvalidSignal { signal });
            }

            set |= signal_bit(signal);
        }

        self.stop_signals = set;

        Ok(self)
    }

    pub fn with_unknown_event(mut self, unknown_event: UnknownEvent) -> Self {
        self.unknown_event = unknown_event;
        self
    }

    pub fn is_stop_signal(&self, signal: i32) -> bool {
        status::is_valid_signal(signal) && self.stop_signals & signal_bit(signal) != 0
    }

    pub fn unknown_event(&self) -> UnknownEvent {
        self.unknown_event
    }

    /// Decode `status` into exactly one event.
    pub fn classify(&self, status: i32) -> Result<Event> {
        if status < 0 {
            return Err(Error::InvalidStatus { status });
        }

        let raw = RawStatus::new(status);
        let unclassified = Err(Error::Unclassified { status });

        if raw.is_stopped() {
            let signal = raw.stop_sig();
            let event = raw.trace_event();

            if signal == libc::SIGTRAP | SYSCALL_TRAP_BIT {
                return if event == 0 { Ok(Event::Syscall) } else { unclassified };
            }

            if signal == libc::SIGTRAP {
                if let Some(trace_event) = TraceEvent::from_code(event) {
                    return Ok(trace_event.event());
                }

                // A bare trap, or an interrupt-stop of a seized tracee.
                if event == 0 || event == EVENT_STOP {
                    return Ok(Event::Stop);
                }

                return match self.unknown_event {
                    UnknownEvent::Stop => Ok(Event::Stop),
                    UnknownEvent::Reject => unclassified,
                };
            }

            if self.is_stop_signal(signal) && (event == 0 || event == EVENT_STOP) {
                return Ok(Event::Stop);
            }

            if status::is_valid_signal(signal) && event == 0 {
                return Ok(Event::Genuine { signal });
            }

            return unclassified;
        }

        if raw.is_signaled() {
            let signal = raw.term_sig();

            if raw.signaled_garbage() == 0 && status::is_valid_signal(signal) {
                return Ok(Event::ExitSignal { signal, core_dumped: raw.core_dumped() });
            }

            return unclassified;
        }

        if raw.is_exited() && raw.exited_garbage() == 0 {
            return Ok(Event::ExitGenuine { code: raw.exit_code() });
        }

        unclassified
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

static DEFAULT_CLASSIFIER: Classifier = Classifier::new();

/// Classify `status` with the default [`Classifier`].
pub fn classify(status: i32) -> Result<Event> {
    DEFAULT_CLASSIFIER.classify(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn stopped(sig: i32, event: u16) -> i32 {
        RawStatus::stopped(sig, event).raw()
    }

    #[test]
    fn test_negative_status_is_domain_error() {
        for &status in &[-1, i32::MIN, -0x7f, -(13 << 8)] {
            let err = classify(status).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Domain);
        }
    }

    #[test]
    fn test_exit_genuine() {
        for code in 0..=255u8 {
            let status = RawStatus::exited(code).raw();
            assert_eq!(classify(status).unwrap(), Event::ExitGenuine { code: i32::from(code) });
        }

        assert_eq!(classify(13 << 8).unwrap().payload(), Some(13));
    }

    #[test]
    fn test_exit_signal() {
        let status = RawStatus::signaled(libc::SIGKILL, false).raw();
        let event = classify(status).unwrap();
        assert_eq!(event, Event::ExitSignal { signal: libc::SIGKILL, core_dumped: false });
        assert_eq!(event.payload(), Some(libc::SIGKILL));
        assert_eq!(event.signal(), Some(Signal::SIGKILL));
        assert!(event.is_terminal());

        let status = RawStatus::signaled(libc::SIGTRAP, true).raw();
        assert_eq!(
            classify(status).unwrap(),
            Event::ExitSignal { signal: libc::SIGTRAP, core_dumped: true },
        );
    }

    #[test]
    fn test_job_control_stops() {
        for &sig in &[libc::SIGSTOP, libc::SIGTSTP, libc::SIGTTIN, libc::SIGTTOU] {
            assert_eq!(classify(stopped(sig, 0)).unwrap(), Event::Stop);

            // Group-stop of a seized tracee.
            assert_eq!(classify(stopped(sig, EVENT_STOP)).unwrap(), Event::Stop);
        }
    }

    #[test]
    fn test_genuine() {
        let event = classify(stopped(libc::SIGINT, 0)).unwrap();
        assert_eq!(event, Event::Genuine { signal: libc::SIGINT });
        assert_eq!(event.payload(), Some(libc::SIGINT));
        assert!(!event.is_terminal());

        let rt = libc::SIGRTMIN() + 1;
        let event = classify(stopped(rt, 0)).unwrap();
        assert_eq!(event, Event::Genuine { signal: rt });
        assert_eq!(event.signal(), None);
    }

    #[test]
    fn test_syscall() {
        assert_eq!(classify(stopped(libc::SIGTRAP | 0x80, 0)).unwrap(), Event::Syscall);
        assert_eq!(classify(0x857f).unwrap(), Event::Syscall);
    }

    #[test]
    fn test_trace_events() {
        let cases = [
            (1, Event::Fork),
            (2, Event::Vfork),
            (3, Event::Clone),
            (4, Event::Exec),
            (5, Event::VforkDone),
            (6, Event::Exit),
        ];

        for &(code, event) in &cases {
            assert_eq!(classify(stopped(libc::SIGTRAP, code)).unwrap(), event);
            assert!(event.has_message());
            assert_eq!(event.trace_event().map(TraceEvent::code), Some(code));
        }

        assert_eq!(classify((4 << 16) | 0x057f).unwrap(), Event::Exec);
        assert_eq!(classify((6 << 16) | 0x057f).unwrap(), Event::Exit);
        assert_eq!(classify((1 << 16) | 0x057f).unwrap(), Event::Fork);
    }

    #[test]
    fn test_bare_and_interrupt_traps() {
        assert_eq!(classify(stopped(libc::SIGTRAP, 0)).unwrap(), Event::Stop);
        assert_eq!(classify(stopped(libc::SIGTRAP, EVENT_STOP)).unwrap(), Event::Stop);
    }

    #[test]
    fn test_unknown_trace_event_fallback() {
        // `PTRACE_EVENT_SECCOMP`, which we never request.
        let status = stopped(libc::SIGTRAP, 7);

        assert_eq!(classify(status).unwrap(), Event::Stop);

        let strict = Classifier::new().with_unknown_event(UnknownEvent::Reject);
        let err = strict.classify(status).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Classification);

        // Known codes and interrupt-stops are unaffected.
        assert_eq!(strict.classify(stopped(libc::SIGTRAP, 6)).unwrap(), Event::Exit);
        assert_eq!(strict.classify(stopped(libc::SIGTRAP, EVENT_STOP)).unwrap(), Event::Stop);
    }

    #[test]
    fn test_custom_stop_signals() {
        let classifier = Classifier::new().with_stop_signals(&[libc::SIGSTOP]).unwrap();

        assert_eq!(classifier.classify(stopped(libc::SIGSTOP, 0)).unwrap(), Event::Stop);
        assert_eq!(
            classifier.classify(stopped(libc::SIGTSTP, 0)).unwrap(),
            Event::Genuine { signal: libc::SIGTSTP },
        );

        let err = Classifier::new().with_stop_signals(&[0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Domain);

        let err = Classifier::new().with_stop_signals(&[status::max_signal() + 1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Domain);
    }

    #[test]
    fn test_unrecognized_statuses() {
        let cases = [
            // Continued.
            0xffff,
            // Stop signal 0, and out-of-range stop signals.
            0x007f,
            0xff7f,
            0xc07f,
            // Syscall-stop with an event code.
            (1 << 16) | 0x857f,
            // Genuine signal with an event code.
            (1 << 16) | 0x027f,
            // Exited with garbage above the exit code.
            (1 << 16) | (13 << 8),
            // Signaled with garbage above the low byte.
            0x0109,
            // Signaled with an out-of-range signal.
            0x7e,
        ];

        for &status in &cases {
            let err = classify(status).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Classification, "status = {:#x}", status);
        }
    }

    #[test]
    fn test_exactly_one_event_for_kernel_layouts() {
        let mut statuses = vec![];

        for code in 0..=255u8 {
            statuses.push(RawStatus::exited(code).raw());
        }

        for sig in 1..=status::max_signal() {
            statuses.push(RawStatus::signaled(sig, false).raw());
            statuses.push(RawStatus::signaled(sig, true).raw());
            statuses.push(RawStatus::stopped(sig, 0).raw());
        }

        for status in statuses {
            let event = classify(status).unwrap();
            assert_eq!(classify(status).unwrap(), event);
        }
    }

    #[test]
    fn test_names() {
        assert_eq!(Event::VforkDone.name(), "vfork_done");
        assert_eq!(Event::ExitGenuine { code: 13 }.to_string(), "exit_genuine(13)");
        assert_eq!(Event::Stop.to_string(), "stop");

        for &event in &TraceEvent::ALL {
            assert_eq!(event.name().parse::<TraceEvent>().unwrap(), event);
            assert_eq!(TraceEvent::from_code(event.code()), Some(event));
        }

        let err = "pink".parse::<TraceEvent>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);

        assert_eq!(TraceEvent::from_code(0), None);
        assert_eq!(TraceEvent::from_code(u16::MAX), None);
    }

    #[test]
    fn test_trace_event_options() {
        let all = TraceEvent::ALL
            .iter()
            .fold(Options::empty(), |options, event| options | event.option());

        assert_eq!(all | Options::PTRACE_O_TRACESYSGOOD | Options::PTRACE_O_EXITKILL, crate::trace::SUPPORTED_OPTIONS);
        assert_eq!(TraceEvent::Exit.option().bits(), libc::PTRACE_O_TRACEEXIT);
    }
}
