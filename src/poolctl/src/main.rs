//! `poolctl`: the pool administration CLI front-end over `pool-activity`
//! and `vdev-core` (spec §6.1).

mod commands;
mod registry;

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use vdev_core::error::ErrorKind;

#[derive(Parser)]
#[command(name = "poolctl", version, about = "Pool device and activity administration", propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach a new device to an existing vdev leg or raidz top-level
    Attach {
        pool: String,
        existing_vdev: String,
        new_device: String,
        #[arg(short = 'f', long)]
        force: bool,
        #[arg(short = 's', long = "sequential")]
        sequential_rebuild: bool,
        #[arg(short = 'w', long)]
        wait: bool,
        #[arg(short = 'o', long = "property", value_parser = parse_ashift)]
        ashift: Option<u8>,
    },
    /// Replace an existing device with a new one
    Replace {
        pool: String,
        old_device: String,
        new_device: String,
        #[arg(short = 'f', long)]
        force: bool,
        #[arg(short = 's', long = "sequential")]
        sequential_rebuild: bool,
        #[arg(short = 'w', long)]
        wait: bool,
    },
    /// Detach a mirror leg
    Detach { pool: String, device: String },
    /// Remove a top-level device
    Remove {
        pool: String,
        device: String,
        #[arg(short = 'n')]
        noop_estimate: bool,
        #[arg(short = 'p')]
        parsable: bool,
        #[arg(short = 's')]
        stop: bool,
        #[arg(short = 'w')]
        wait: bool,
    },
    /// Bring a device online
    Online {
        pool: String,
        device: String,
        #[arg(long = "power")]
        power_on: bool,
        #[arg(short = 'e')]
        expand: bool,
    },
    /// Take a device offline
    Offline {
        pool: String,
        device: String,
        #[arg(long = "power")]
        power_on: bool,
        #[arg(short = 'f')]
        force: bool,
        #[arg(short = 't')]
        temporary: bool,
    },
    /// Clear device errors
    Clear {
        pool: String,
        device: Option<String>,
        #[arg(short = 'n')]
        dry_rewind: bool,
        #[arg(short = 'F')]
        full_rewind: bool,
        #[arg(short = 'X')]
        extreme_rewind: bool,
        #[arg(long = "power")]
        power_on: bool,
    },
    /// Wipe a device's vdev label
    Labelclear {
        device: String,
        #[arg(short = 'f')]
        force: bool,
    },
    /// Start, pause or stop a scrub
    Scrub {
        pool: String,
        #[arg(short = 's')]
        stop: bool,
        #[arg(short = 'p')]
        pause: bool,
        #[arg(short = 'e')]
        error_scrub: bool,
        #[arg(short = 'w')]
        wait: bool,
    },
    /// Restart an in-progress resilver
    Resilver { pool: String },
    /// Start, pause or cancel a trim
    Trim {
        pool: String,
        #[arg(short = 'c')]
        cancel: bool,
        #[arg(short = 'd', long = "secure")]
        secure: bool,
        #[arg(short = 'r', long = "rate")]
        rate: Option<u64>,
        #[arg(short = 's', long = "suspend")]
        suspend: bool,
        #[arg(short = 'w')]
        wait: bool,
    },
    /// Start, pause, cancel or clear a device initialize
    Initialize {
        pool: String,
        #[arg(short = 'c')]
        cancel: bool,
        #[arg(short = 's', long = "suspend")]
        suspend: bool,
        #[arg(short = 'u', long = "uninit")]
        uninit: bool,
        #[arg(short = 'w')]
        wait: bool,
    },
    /// Create or discard a pool checkpoint
    Checkpoint {
        pool: String,
        #[arg(short = 'd', long = "discard")]
        discard: bool,
        #[arg(short = 'w')]
        wait: bool,
    },
    /// Block until named activities quiesce
    Wait {
        pool: String,
        #[arg(short = 'H')]
        scripted: bool,
        #[arg(short = 'p')]
        parsable_exact: bool,
        #[arg(short = 'T')]
        timestamp: Option<String>,
        #[arg(short = 't', value_delimiter = ',')]
        activities: Vec<String>,
    },
    /// Inspect or clear the in-process event ring
    Events {
        #[arg(long)]
        clear: bool,
    },
}

fn parse_ashift(s: &str) -> Result<u8, String> {
    let value = s.strip_prefix("ashift=").unwrap_or(s);
    value.parse().map_err(|_| format!("invalid ashift value: {s}"))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Attach {
            pool,
            existing_vdev,
            new_device,
            force,
            sequential_rebuild,
            wait,
            ashift,
        } => commands::device::attach(&pool, &existing_vdev, &new_device, force, sequential_rebuild, wait, ashift),
        Commands::Replace {
            pool,
            old_device,
            new_device,
            force,
            sequential_rebuild,
            wait,
        } => commands::device::replace(&pool, &old_device, &new_device, force, sequential_rebuild, wait),
        Commands::Detach { pool, device } => commands::device::detach(&pool, &device),
        Commands::Remove {
            pool,
            device,
            noop_estimate,
            parsable,
            stop,
            wait,
        } => commands::device::remove(&pool, &device, noop_estimate, parsable, stop, wait),
        Commands::Online { pool, device, power_on, expand } => {
            commands::device::online(&pool, &device, expand, power_on)
        }
        Commands::Offline {
            pool,
            device,
            power_on,
            force,
            temporary,
        } => {
            let _ = power_on;
            commands::device::offline(&pool, &device, force, temporary)
        }
        Commands::Clear {
            pool,
            device,
            dry_rewind,
            full_rewind,
            extreme_rewind,
            power_on,
        } => commands::device::clear(&pool, device.as_deref(), dry_rewind, full_rewind, extreme_rewind, power_on),
        Commands::Labelclear { device, force } => commands::device::labelclear(&device, force),
        Commands::Scrub {
            pool,
            stop,
            pause,
            error_scrub,
            wait,
        } => commands::activity::scrub(&pool, stop, pause, error_scrub, wait),
        Commands::Resilver { pool } => commands::activity::resilver(&pool),
        Commands::Trim {
            pool,
            cancel,
            secure,
            rate,
            suspend,
            wait,
        } => commands::activity::trim(&pool, cancel, secure, rate, suspend, wait),
        Commands::Initialize {
            pool,
            cancel,
            suspend,
            uninit,
            wait,
        } => commands::activity::initialize(&pool, cancel, suspend, uninit, wait),
        Commands::Checkpoint { pool, discard, wait } => commands::activity::checkpoint(&pool, discard, wait),
        Commands::Wait {
            pool,
            scripted,
            parsable_exact,
            timestamp,
            activities,
        } => {
            let _ = timestamp;
            let print_status = !scripted && !parsable_exact;
            commands::activity::wait(&pool, &activities, print_status, Duration::from_secs(1))
        }
        Commands::Events { clear } => commands::events::events(clear),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_target(false).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("poolctl: {err}");
            let code = err
                .downcast_ref::<ErrorKind>()
                .map(ErrorKind::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}
