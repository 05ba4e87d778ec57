//! Sends one recording slice per motor fault type and checks each verdict.

use clap::Parser;
use log::{error, info};
use motorbench::{
    args::ProbeArgs,
    batch::SerialDiagnoser,
    config::BenchConfig,
    fault::FaultType,
    gui::resolve_port,
    probe::{expected_led, run_probe_session, ConfirmPolicy, ProbeOutcome},
    transport::available_ports,
};
use std::{
    io::{self, BufRead, Write},
    process,
};

// Example:
// RUST_LOG=info cargo run --bin faultprobe -- --recordings data/csv -f H_H S_W B_R

fn read_answer(question: &str) -> Option<String> {
    print!("{}", question);
    io::stdout().flush().ok()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).ok()?;
    Some(line.trim().to_owned())
}

fn confirm(fault: FaultType) -> bool {
    let question = format!(
        "Send {} to the device? Expect the {} LED. (y/n): ",
        fault,
        expected_led(fault.expected_status())
    );
    matches!(read_answer(&question).as_deref(), Some("y" | "Y"))
}

fn acknowledge(outcome: &ProbeOutcome) {
    if let Some(d) = &outcome.diagnosis {
        println!("Raw reply: {}", d.raw);
    }
    read_answer("Check the device LED, then press Enter to continue...");
}

fn main() {
    env_logger::init();
    let args = ProbeArgs::parse();

    let mut config = match BenchConfig::load_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Could not load settings: {}", e);
            process::exit(2);
        }
    };
    args.apply(&mut config);

    if let Ok(ports) = available_ports() {
        println!("Available devices:");
        for port in ports {
            println!("\t{}", port.to_string_lossy());
        }
    }

    let port = match config.probe.session.confirm {
        // nothing is sent, so no device is needed
        ConfirmPolicy::Never => config.port.clone().unwrap_or_default(),
        _ => match resolve_port(config.port.clone()) {
            Ok(Some(port)) => port,
            Ok(None) => {
                info!("No device selected");
                process::exit(1);
            }
            Err(e) => {
                error!("Could not pick a device: {}", e);
                process::exit(1);
            }
        },
    };

    let mut diagnoser = SerialDiagnoser::new(
        &port,
        config.probe.transport.clone(),
        config.probe.session.normalization,
    );
    let interactive = config.probe.session.confirm == ConfirmPolicy::Ask;
    let summary = run_probe_session(
        &config.probe.session,
        &mut diagnoser,
        confirm,
        |outcome| {
            if interactive {
                acknowledge(outcome)
            }
        },
    );

    println!("{}", summary);
}
