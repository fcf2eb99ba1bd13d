//! The `peer-tracker` binary: parse CLI flags, resolve configuration,
//! install logging, probe for a public IP, then run the dispatcher until
//! shutdown (§6).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use peer_tracker::config::{self, CliArgs};
use peer_tracker::processor::{self, TrackerAddresses};
use peer_tracker::{dispatcher, logging, Registry};

/// Timeout for the one-shot public-IP probe (§4.5).
const PUBLIC_IP_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
        }
    };

    let config = match config::resolve(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config load error: {e}");
            return 2;
        }
    };

    if args.print_config {
        println!("{config}");
        return 0;
    }

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("failed to initialize logging: {e}");
        return 2;
    }

    log::info!("starting peer-tracker");

    let registry = Arc::new(Registry::new(config.registry.capacity));

    let public_ip = processor::probe_public_ip(PUBLIC_IP_PROBE_TIMEOUT);
    let addrs = Arc::new(TrackerAddresses::new(public_ip));

    let shutdown = Arc::new(AtomicBool::new(false));
    if let Err(e) = install_signal_handler(Arc::clone(&shutdown)) {
        eprintln!("failed to install signal handler: {e}");
        return 3;
    }

    match dispatcher::run(&config, registry, addrs, shutdown) {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{e}");
            e.exit_code()
        }
    }
}

/// The first SIGINT flips `shutdown` and lets the accept loop and workers
/// wind down at the top of their next iteration. A second SIGINT forces
/// an immediate exit with code 6 (§5).
fn install_signal_handler(shutdown: Arc<AtomicBool>) -> Result<(), ctrlc::Error> {
    let interrupts = Arc::new(AtomicUsize::new(0));

    ctrlc::set_handler(move || {
        if interrupts.fetch_add(1, Ordering::SeqCst) == 0 {
            log::warn!("shutdown requested; finishing in-flight work");
            shutdown.store(true, Ordering::SeqCst);
        } else {
            log::error!("second interrupt received; forcing immediate exit");
            std::process::exit(6);
        }
    })
}
