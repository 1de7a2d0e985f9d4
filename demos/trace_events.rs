use anyhow::Result;
use ptctl::{Classifier, Command, Options, Ptracer, Restart, TraceEvent, UnknownEvent};
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

#[derive(StructOpt, Debug)]
struct Opt {
    /// Stop at every syscall entry and exit.
    #[structopt(short, long)]
    syscalls: bool,

    /// Fail on trap-stops with unknown event codes.
    #[structopt(long)]
    strict: bool,

    /// Trace events to enable, e.g. `fork,exec,exit`. Defaults to all.
    #[structopt(short, long, use_delimiter = true)]
    events: Vec<TraceEvent>,

    #[structopt(min_values = 1)]
    argv: Vec<String>,
}

fn options(events: &[TraceEvent]) -> Options {
    if events.is_empty() {
        return ptctl::ptracer::DEFAULT_OPTIONS;
    }

    events.iter().fold(Options::empty(), |options, event| options | event.option())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let opt = Opt::from_args();

    let mut ptracer = Ptracer::new();
    ptracer.set_traceme_options(options(&opt.events))?;

    if opt.strict {
        let classifier = Classifier::new().with_unknown_event(UnknownEvent::Reject);
        ptracer.set_classifier(classifier);
    }

    let mode = if opt.syscalls { Restart::Syscall } else { Restart::Continue };

    // Tracee is in pre-exec ptrace-stop.
    let pid = ptracer.spawn(Command::new(opt.argv)?)?;

    match mode {
        Restart::Syscall => ptracer.syscall(pid, 0)?,
        _ => ptracer.resume(pid, 0)?,
    }

    while let Some(tracee) = ptracer.wait()? {
        let event = tracee.event();

        match (tracee.new_pid(), tracee.exit_status()) {
            (Some(new), _) => println!("{:>8}: {} (new = {})", tracee.pid(), event, new),
            (_, Some(status)) => println!("{:>8}: {} ({:?})", tracee.pid(), event, status),
            _ => println!("{:>8}: {}", tracee.pid(), event),
        }

        if event.is_terminal() {
            continue;
        }

        ptracer.restart(tracee, mode)?;
    }

    Ok(())
}
