use bthome_listener::app::{Options, RealScanner, RunError, run_with_io};
use bthome_listener::logging;
use clap::Parser;
use std::panic::{self, PanicHookInfo};

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

async fn run(options: Options) -> Result<(), RunError> {
    let config = options.parser_config()?;
    tracing::info!(
        discovery = config.discovery,
        sensors = config.sensor_whitelist.len(),
        trackers = config.tracker_whitelist.len(),
        keys = config.keys.len(),
        "Configuration loaded"
    );

    let mut out = std::io::stdout().lock();
    let mut err = std::io::stderr();
    run_with_io(options, config, &RealScanner, &mut out, &mut err).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd, Telegraf execd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {info}");
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    logging::init(options.verbose);

    match run(options).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {why}");
            std::process::exit(EXIT_ERROR);
        }
    }
}
