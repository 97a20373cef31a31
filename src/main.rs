use std::io::{self, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use rt_monitor::{
    console, telemetry, transport, Console, CpalCuePlayer, LineReader, Monitor, MonitorConfig,
    SessionStore, StdinOperator,
};

// Exit status used when a second Ctrl+C interrupts a blocking prompt.
const FORCED_EXIT_CODE: i32 = 130;

// The main entry point for the command-line monitor application.
fn main() -> Result<()> {
    let config = MonitorConfig::parse_args()?;
    console::set_color_enabled(console::color_wanted(
        config.no_color,
        io::stdout().is_terminal(),
    ));
    telemetry::init_tracing(&config)?;

    if config.list_ports {
        print_ports(&transport::list_ports()?);
        return Ok(());
    }

    println!("==============================");
    println!("  Reaction Experiment Monitor ");
    println!("==============================");

    // Sounds are part of the experiment; without them there is nothing to run.
    let cues = CpalCuePlayer::load(&config.sounds_dir).with_context(|| {
        format!(
            "failed to load audio cues from {}",
            config.sounds_dir.display()
        )
    })?;

    let mut operator = StdinOperator;
    let device = match &config.port {
        Some(port) => port.clone(),
        None => {
            let ports = transport::list_ports()?;
            print_ports(&ports);
            transport::choose_port(&ports, &mut operator)?.device.clone()
        }
    };

    let port = transport::open(&device, config.baud, config.read_timeout())?;
    let stop = install_interrupt_handler()?;

    let mut monitor = Monitor::new(
        cues,
        operator,
        SessionStore::new(&config.output_dir),
        Console::new(io::stdout()),
    );
    monitor.connected(&device);

    let mut reader = LineReader::new(port);
    let result = monitor.run(&mut reader, &stop);

    println!();
    println!("Closing connection...");
    drop(reader);
    tracing::info!(port = %device, "connection closed");

    result.with_context(|| format!("reading from {device} failed"))
}

fn print_ports(ports: &[transport::PortEntry]) {
    println!("Available ports:");
    for port in ports {
        println!("{port}");
    }
}

// First Ctrl+C asks the main loop to stop after its current read. A second one
// exits at once, since the loop may be parked in a blocking prompt.
fn install_interrupt_handler() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(FORCED_EXIT_CODE);
        }
    })
    .context("failed to install the Ctrl+C handler")?;
    Ok(stop)
}
