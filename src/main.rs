use clap::{Parser, Subcommand, ValueEnum};
use sigbridge::config::BridgeConfig;
use sigbridge::{fd_monitor, lifecycle, Signal};
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;
use std::str::FromStr;

/// Route POSIX signals to per-thread event handlers, with crash reports for
/// fatal signals.
#[derive(Parser, Debug)]
#[command(name = "sigbridge", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = "sigbridge.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start signal handling and service the event loop until terminated
    Run {
        /// Also print a line for each of these signals (e.g. USR1, SIGHUP)
        #[arg(long = "log-signal", value_name = "SIGNAL", value_parser = parse_signal)]
        log_signals: Vec<Signal>,
    },
    /// Start signal handling, then crash on purpose
    Crash {
        #[arg(long, value_enum, default_value_t = CrashKind::NullDeref)]
        kind: CrashKind,
    },
    /// Start signal handling and register an event handler for one signal
    Register {
        #[arg(long, value_parser = parse_signal)]
        signal: Signal,
    },
    /// Print the resolved configuration and exit
    CheckConfig,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CrashKind {
    NullDeref,
    Abort,
    Segv,
    Bus,
    Ill,
    Fpe,
    Trap,
}

/// Accepts "SIGUSR1", "USR1" and "usr1".
fn parse_signal(name: &str) -> Result<Signal, String> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&full).map_err(|_| format!("unknown signal: {name}"))
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "sigbridge=debug"
    } else {
        "sigbridge=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match BridgeConfig::load(&cli.config) {
        Ok(config) => config.with_env_overrides(),
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    match cli.command {
        Command::Run { log_signals } => run(&config, &log_signals),
        Command::Crash { kind } => {
            lifecycle::start(&config);
            crash(kind);
        }
        Command::Register { signal } => {
            lifecycle::start(&config);
            sigbridge::set_handler(signal, Some(Rc::new(|_: Signal| {})));
            println!("registered {signal}");
        }
        Command::CheckConfig => {
            println!("{config:#?}");
        }
    }
}

fn run(config: &BridgeConfig, log_signals: &[Signal]) {
    lifecycle::start(config);

    for &signal in log_signals {
        sigbridge::block(signal);
        sigbridge::set_handler(
            signal,
            Some(Rc::new(|signal: Signal| {
                let mut stdout = std::io::stdout().lock();
                let _ = writeln!(stdout, "received {signal}");
                let _ = stdout.flush();
            })),
        );
    }

    {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "ready");
        let _ = stdout.flush();
    }

    if let Err(e) = fd_monitor::run() {
        tracing::error!(error = %e, "event loop failed");
        std::process::exit(1);
    }
}

fn crash(kind: CrashKind) {
    let signal = match kind {
        CrashKind::NullDeref => {
            // Non-null so the read reaches the MMU rather than a debug assertion.
            let addr = std::hint::black_box(16usize) as *const usize;
            // SAFETY: not safe at all; this is the point.
            let value = unsafe { std::ptr::read_volatile(addr) };
            tracing::error!(value, "read from an unmapped address succeeded");
            std::process::exit(2);
        }
        CrashKind::Abort => std::process::abort(),
        CrashKind::Bus => {
            bus_fault();
            std::process::exit(2);
        }
        CrashKind::Segv => Signal::SIGSEGV,
        CrashKind::Ill => Signal::SIGILL,
        CrashKind::Fpe => Signal::SIGFPE,
        CrashKind::Trap => Signal::SIGTRAP,
    };
    if let Err(e) = nix::sys::signal::raise(signal) {
        tracing::error!(signal = %signal, error = %e, "raise failed");
    }
    std::process::exit(2);
}

/// Read through a mapping of an empty file, which faults with SIGBUS.
fn bus_fault() {
    // SAFETY: not safe at all; this is the point.
    unsafe {
        let fd = libc::memfd_create(c"sigbridge-bus".as_ptr(), libc::MFD_CLOEXEC);
        if fd < 0 {
            tracing::error!(error = %nix::errno::Errno::last(), "memfd_create failed");
            return;
        }
        let page = libc::mmap(
            std::ptr::null_mut(),
            4096,
            libc::PROT_READ,
            libc::MAP_PRIVATE,
            fd,
            0,
        );
        if page == libc::MAP_FAILED {
            tracing::error!(error = %nix::errno::Errno::last(), "mmap failed");
            return;
        }
        let value = std::ptr::read_volatile(page.cast::<u8>());
        tracing::error!(value, "read past the end of a file mapping succeeded");
    }
}
