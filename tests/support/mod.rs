#![allow(dead_code)]

use anyhow::Result;
use nix::unistd::{fork, ForkResult};
use ptctl::{Event, Pid, Ptracer, Restart, Tracee};

#[allow(unused)]
macro_rules! pid {
    ($raw: expr) => {
        ptctl::Pid::from_raw($raw)
    };
}

/// Restart every observed stop in `mode`, delivering pending signals, until no live
/// tracees remain. Returns every observed tracee stop, in order.
pub fn drain(tracer: &mut Ptracer, mode: Restart) -> Result<Vec<Tracee>> {
    let mut trace = vec![];

    while let Some(tracee) = tracer.wait()? {
        eprintln!("{}: {}", tracee.pid(), tracee.event());
        trace.push(tracee);

        if tracee.event().is_terminal() {
            continue;
        }

        match tracer.restart(tracee, mode) {
            Err(err) if err.tracee_died() => {},
            res => res?,
        }
    }

    Ok(trace)
}

/// Events observed for `pid`, in order.
pub fn events_of(trace: &[Tracee], pid: Pid) -> Vec<Event> {
    trace
        .iter()
        .filter(|t| t.pid() == pid)
        .map(|t| t.event())
        .collect()
}

/// Fork an untraced child which sleeps until killed.
pub fn fork_sleeper() -> Result<Pid> {
    match unsafe { fork() }? {
        ForkResult::Child => loop {
            unsafe { libc::pause(); }
        },
        ForkResult::Parent { child } => Ok(child),
    }
}

/// Pid of a reaped child, which no longer names a process.
pub fn dead_pid() -> Result<Pid> {
    match unsafe { fork() }? {
        ForkResult::Child => unsafe { libc::_exit(0) },
        ForkResult::Parent { child } => {
            nix::sys::wait::waitpid(child, None)?;
            Ok(child)
        },
    }
}
