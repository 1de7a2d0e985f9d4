//! Thin, validating wrappers around individual `ptrace(2)` requests.
//!
//! Each function issues exactly one request against one pid and reports failure
//! synchronously. Nothing here retries, and nothing here tracks tracee state: see
//! [`Ptracer`](crate::Ptracer) for that.
//!
//! Signal arguments are raw signal numbers so that real-time signals can be forwarded.
//! A signal of `0` means "no signal". Signals are validated before any request is made,
//! so an invalid signal is reported even if `pid` does not exist.

use std::convert::TryFrom;
use std::mem::MaybeUninit;

use nix::errno::Errno;
use nix::unistd::getpid;
use tracing::trace;

use crate::error::{internal_error, Error, Result, ResultExt};
use crate::ptracer::{Options, Pid, Siginfo};
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
use crate::ptracer::Registers;
use crate::status;

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type RequestType = libc::c_uint;

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type RequestType = libc::c_int;

/// Register set of the general-purpose registers, for `PTRACE_GETREGSET`.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
const NT_PRSTATUS: usize = 1;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
const PTRACE_SYSEMU: RequestType = 31;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
const PTRACE_SYSEMU_SINGLESTEP: RequestType = 32;

/// Options this crate knows how to interpret.
pub const SUPPORTED_OPTIONS: Options = Options::empty()
    .union(Options::PTRACE_O_TRACESYSGOOD)
    .union(Options::PTRACE_O_TRACEFORK)
    .union(Options::PTRACE_O_TRACEVFORK)
    .union(Options::PTRACE_O_TRACECLONE)
    .union(Options::PTRACE_O_TRACEEXEC)
    .union(Options::PTRACE_O_TRACEVFORKDONE)
    .union(Options::PTRACE_O_TRACEEXIT)
    .union(Options::PTRACE_O_EXITKILL);

/// Validate a raw option bitmask.
pub fn options_from_bits(bits: i64) -> Result<Options> {
    let invalid = Error::InvalidOptions { bits };

    let raw = libc::c_int::try_from(bits).map_err(|_| Error::InvalidOptions { bits })?;

    if raw < 0 {
        return Err(invalid);
    }

    let options = Options::from_bits(raw).ok_or(invalid)?;

    check_options(options)
}

/// Reject options outside [`SUPPORTED_OPTIONS`].
pub fn check_options(options: Options) -> Result<Options> {
    if SUPPORTED_OPTIONS.contains(options) {
        Ok(options)
    } else {
        Err(Error::InvalidOptions { bits: i64::from(options.bits()) })
    }
}

/// Validate a signal argument, where `0` means "no signal".
pub fn check_signal(signal: i32) -> Result<i32> {
    if signal == 0 || status::is_valid_signal(signal) {
        Ok(signal)
    } else {
        Err(Error::InvalidSignal { signal })
    }
}

fn request(req: RequestType, pid: Pid, addr: usize, data: usize) -> Result<libc::c_long> {
    trace!(req, pid = pid.as_raw(), addr, data, "ptrace request");

    // SAFETY: only requests whose `addr` and `data` are plain integers, or point to
    // storage owned by the caller for the duration of the call, are issued.
    let res = unsafe {
        libc::ptrace(
            req,
            pid.as_raw(),
            addr as *mut libc::c_void,
            data as *mut libc::c_void,
        )
    };

    Errno::result(res).tracee_err(pid)
}

fn restart(req: RequestType, pid: Pid, signal: i32) -> Result<()> {
    let signal = check_signal(signal)?;
    request(req, pid, 0, signal as usize)?;
    Ok(())
}

/// Request to be traced by the parent process (`PTRACE_TRACEME`).
///
/// Fails with [`Error::Permission`] if the calling process is already traced.
pub fn trace_me() -> Result<()> {
    // SAFETY: `PTRACE_TRACEME` ignores all other arguments.
    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_TRACEME,
            0,
            std::ptr::null_mut::<libc::c_void>(),
            std::ptr::null_mut::<libc::c_void>(),
        )
    };

    Errno::result(res).tracee_err(getpid())?;

    Ok(())
}

/// Set the ptrace options of a stopped tracee (`PTRACE_SETOPTIONS`).
pub fn setup(pid: Pid, options: Options) -> Result<()> {
    let options = check_options(options)?;
    request(libc::PTRACE_SETOPTIONS, pid, 0, options.bits() as usize)?;
    Ok(())
}

/// Restart a stopped tracee (`PTRACE_CONT`).
pub fn resume(pid: Pid, signal: i32) -> Result<()> {
    restart(libc::PTRACE_CONT, pid, signal)
}

/// Restart a stopped tracee, stopping at the next syscall entry or exit
/// (`PTRACE_SYSCALL`).
pub fn syscall(pid: Pid, signal: i32) -> Result<()> {
    restart(libc::PTRACE_SYSCALL, pid, signal)
}

/// Restart a stopped tracee for exactly one instruction (`PTRACE_SINGLESTEP`).
pub fn singlestep(pid: Pid, signal: i32) -> Result<()> {
    restart(libc::PTRACE_SINGLESTEP, pid, signal)
}

/// Restart a stopped tracee, stopping at the entry of the next syscall, which will
/// not be executed (`PTRACE_SYSEMU`).
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn sysemu(pid: Pid, signal: i32) -> Result<()> {
    restart(PTRACE_SYSEMU, pid, signal)
}

/// Like [`sysemu()`], but also singlestep if not at a syscall.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn sysemu_singlestep(pid: Pid, signal: i32) -> Result<()> {
    restart(PTRACE_SYSEMU_SINGLESTEP, pid, signal)
}

/// Detach from a stopped tracee, restarting it (`PTRACE_DETACH`).
pub fn detach(pid: Pid, signal: i32) -> Result<()> {
    restart(libc::PTRACE_DETACH, pid, signal)
}

/// Send `signal` to the process `pid` with `kill(2)`.
///
/// `pid` must name a single process: `0` and negative (process group) values are
/// rejected.
pub fn kill(pid: Pid, signal: i32) -> Result<()> {
    if pid.as_raw() <= 0 {
        return Err(Error::InvalidPid { pid: pid.as_raw() });
    }

    let signal = check_signal(signal)?;

    // SAFETY: `kill(2)` has no memory-safety preconditions.
    let res = unsafe { libc::kill(pid.as_raw(), signal) };

    Errno::result(res).tracee_err(pid)?;

    Ok(())
}

/// Send `signal` to the thread `tid`.
///
/// If `tgid` is given and positive, `tgkill(2)` is used, so that a recycled `tid`
/// in another thread group is never signaled. Otherwise, falls back to `tkill(2)`.
pub fn tgkill(tgid: Option<Pid>, tid: Pid, signal: i32) -> Result<()> {
    if tid.as_raw() <= 0 {
        return Err(Error::InvalidPid { pid: tid.as_raw() });
    }

    let signal = check_signal(signal)?;

    // SAFETY: neither syscall has memory-safety preconditions.
    let res = match tgid {
        Some(tgid) if tgid.as_raw() > 0 => unsafe {
            libc::syscall(libc::SYS_tgkill, tgid.as_raw(), tid.as_raw(), signal)
        },
        _ => unsafe {
            libc::syscall(libc::SYS_tkill, tid.as_raw(), signal)
        },
    };

    Errno::result(res).tracee_err(tid)?;

    Ok(())
}

/// Attach to `pid`, which will be sent a `SIGSTOP` (`PTRACE_ATTACH`).
///
/// **Warning:** the tracee may not be considered stopped until it has been seen to
/// stop via `wait()`.
pub fn attach(pid: Pid) -> Result<()> {
    request(libc::PTRACE_ATTACH, pid, 0, 0)?;
    Ok(())
}

/// Attach to `pid` without stopping it, and set its options (`PTRACE_SEIZE`).
///
/// Options are validated before the request is made.
pub fn seize(pid: Pid, options: Options) -> Result<()> {
    let options = check_options(options)?;
    request(libc::PTRACE_SEIZE, pid, 0, options.bits() as usize)?;
    Ok(())
}

/// Stop a seized tracee without signal or job-control side effects
/// (`PTRACE_INTERRUPT`).
pub fn interrupt(pid: Pid) -> Result<()> {
    request(libc::PTRACE_INTERRUPT, pid, 0, 0)?;
    Ok(())
}

/// Let a seized tracee in group-stop run without being reported as stopped
/// (`PTRACE_LISTEN`).
pub fn listen(pid: Pid) -> Result<()> {
    request(libc::PTRACE_LISTEN, pid, 0, 0)?;
    Ok(())
}

/// Read the message of the latest ptrace-event-stop (`PTRACE_GETEVENTMSG`).
///
/// For fork, vfork, clone and vfork-done events this is the pid of the new task. For
/// exec events it is the former thread id of the exec-ing thread. For exit events it
/// is the pending wait status (see [`ExitStatus`](crate::ExitStatus)).
///
/// The message is only meaningful while the tracee remains in the ptrace-event-stop.
/// Once it has been restarted, the value read here is stale.
pub fn event_message(pid: Pid) -> Result<u64> {
    let mut msg: libc::c_ulong = 0;
    request(libc::PTRACE_GETEVENTMSG, pid, 0, &mut msg as *mut _ as usize)?;
    Ok(msg as u64)
}

/// Read the signal info of a stopped tracee (`PTRACE_GETSIGINFO`).
pub fn siginfo(pid: Pid) -> Result<Siginfo> {
    let mut info = MaybeUninit::<Siginfo>::uninit();
    request(libc::PTRACE_GETSIGINFO, pid, 0, info.as_mut_ptr() as usize)?;

    // SAFETY: the kernel fully initialized `info` on success.
    Ok(unsafe { info.assume_init() })
}

/// Read the general-purpose registers of a stopped tracee (`PTRACE_GETREGSET`).
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub fn registers(pid: Pid) -> Result<Registers> {
    let mut regs = MaybeUninit::<Registers>::uninit();
    let mut iov = libc::iovec {
        iov_base: regs.as_mut_ptr() as *mut libc::c_void,
        iov_len: std::mem::size_of::<Registers>(),
    };

    request(libc::PTRACE_GETREGSET, pid, NT_PRSTATUS, &mut iov as *mut _ as usize)?;

    // The kernel shrinks `iov_len` to the size it wrote.
    if iov.iov_len != std::mem::size_of::<Registers>() {
        internal_error!("short read of general-purpose registers");
    }

    // SAFETY: the kernel fully initialized `regs`, as checked above.
    Ok(unsafe { regs.assume_init() })
}

/// Overwrite the general-purpose registers of a stopped tracee (`PTRACE_SETREGSET`).
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub fn set_registers(pid: Pid, regs: &Registers) -> Result<()> {
    let mut iov = libc::iovec {
        iov_base: regs as *const Registers as *mut libc::c_void,
        iov_len: std::mem::size_of::<Registers>(),
    };

    request(libc::PTRACE_SETREGSET, pid, NT_PRSTATUS, &mut iov as *mut _ as usize)?;

    Ok(())
}
