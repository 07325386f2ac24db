//! Thin CLI driver: parses arguments, wires a [`fs_sink::FsSink`] into the
//! consumer engine, installs stop-signal handlers, and maps the result to a
//! process exit code.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use clap::Parser;
use nix::sys::signal::{self, SigHandler, Signal};

use consumer_core::{ChannelMode, ConsumerConfig, TraceInstance};
use fs_sink::FsSink;

/// Drains per-CPU kernel ring-buffer trace channels to the local file system.
#[derive(Parser, Debug)]
#[command(name = "consumerd", version, about)]
struct Args {
    /// Trace output directory.
    #[arg(short = 't', long = "trace", value_name = "DIR")]
    trace_dir: String,

    /// Trace source root (where the ring files live).
    #[arg(short = 'c', long = "channels", value_name = "DIR")]
    channels_dir: String,

    /// Daemonise. Accepted for compatibility; this driver always runs attached.
    #[arg(short = 'd', long = "daemon")]
    daemonize: bool,

    /// Append to an existing trace instead of refusing to overwrite it.
    #[arg(short = 'a', long = "append")]
    append: bool,

    /// Number of worker threads.
    #[arg(short = 'N', long = "threads", value_name = "N", default_value_t = 1)]
    worker_count: usize,

    /// Only consume flight-recorder channels.
    #[arg(short = 'f', long = "flight-only", conflicts_with = "normal_only")]
    flight_only: bool,

    /// Only consume normal (non flight-recorder) channels.
    #[arg(short = 'n', long = "normal-only")]
    normal_only: bool,

    /// Verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn mode_from_args(args: &Args) -> ChannelMode {
    if args.flight_only {
        ChannelMode::FlightOnly
    } else if args.normal_only {
        ChannelMode::NormalOnly
    } else {
        ChannelMode::All
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if args.daemonize {
        log::warn!("-d/--daemon is accepted but not implemented; running attached to the foreground");
    }

    let config = match ConsumerConfig::builder(&args.channels_dir)
        .worker_count(args.worker_count)
        .mode(mode_from_args(&args))
        .verbose(args.verbose)
        .build()
    {
        Ok(config) => config,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let sink = FsSink::new(&args.trace_dir, args.append);
    if let Err(err) = std::fs::create_dir_all(&args.trace_dir) {
        log::error!("cannot create trace output directory {}: {err}", args.trace_dir);
        return ExitCode::FAILURE;
    }

    let instance = TraceInstance::new();
    install_stop_handlers(&instance);

    match instance.start(&config, &sink) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

// The signal handler below only ever stores `true` into an `AtomicBool`,
// which is the narrow slice of work that is actually safe to do from signal
// context. `TraceInstance` itself is never touched from the handler.
static STOP_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

fn install_stop_handlers(instance: &TraceInstance) {
    let _ = STOP_FLAG.set(instance.stop_handle());
    let handler = SigHandler::Handler(request_stop);
    for signal in [Signal::SIGINT, Signal::SIGQUIT, Signal::SIGTERM] {
        // SAFETY: `request_stop` only performs an atomic store, which is
        // async-signal-safe.
        if let Err(err) = unsafe { signal::signal(signal, handler) } {
            log::warn!("failed to install handler for {signal:?}: {err}");
        }
    }
}

extern "C" fn request_stop(_: libc::c_int) {
    if let Some(flag) = STOP_FLAG.get() {
        flag.store(true, Ordering::Relaxed);
    }
}
