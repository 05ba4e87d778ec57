//! Runs the held-out test set through the microcontroller and scores it.

use clap::Parser;
use log::{error, info, warn};
use motorbench::{
    args::{BatchCommand, BenchArgs, BenchTask},
    batch::{run_batch, select_indices, SerialDiagnoser},
    compare::compare_files,
    config::BenchConfig,
    dataset::TestSet,
    gui::resolve_port,
    plot::plot_confusion_matrix,
    transport::available_ports,
};
use rand::{rngs::StdRng, SeedableRng};
use std::{
    io::{self, BufRead, IsTerminal, Write},
    path::PathBuf,
    process,
};

// Example:
// RUST_LOG=info cargo run --bin motorbench -- --port /dev/ttyUSB0 batch -n 20
//                                             --normalization calibrated
//                                             --compare

fn main() {
    env_logger::init();
    let args = BenchArgs::parse();

    let mut config = match BenchConfig::load_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Could not load settings: {}", e);
            process::exit(2);
        }
    };

    let ok = match args.command {
        BenchTask::Ports => list_ports(),
        BenchTask::Batch(cmd) => {
            cmd.apply(&mut config);
            batch_task(&cmd, args.port.or(config.port.clone()), &config)
        }
        BenchTask::Compare(cmd) => {
            cmd.apply(&mut config);
            compare_task(&config)
        }
    };

    if !ok {
        process::exit(1);
    }
}

fn list_ports() -> bool {
    match available_ports() {
        Ok(ports) if ports.is_empty() => {
            println!("No serial devices found");
            true
        }
        Ok(ports) => {
            println!("Available devices:");
            for port in ports {
                println!("\t{}", port.to_string_lossy());
            }
            true
        }
        Err(e) => {
            error!("Could not list serial devices: {}", e);
            false
        }
    }
}

/// Ask how many samples to run. `None` means all of them.
fn prompt_sample_count(available: usize) -> Option<usize> {
    print!(
        "How many samples should be sent? (1-{}, Enter for all): ",
        available
    );
    io::stdout().flush().ok()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).ok()?;
    match line.trim() {
        "" => None,
        text => match text.parse::<usize>() {
            Ok(n) if n > 0 => Some(n),
            _ => {
                warn!("'{}' is not a sample count, using every sample", text);
                None
            }
        },
    }
}

fn batch_task(cmd: &BatchCommand, port: Option<PathBuf>, config: &BenchConfig) -> bool {
    let settings = &config.batch;
    let testset = match TestSet::load(&settings.features, &settings.labels) {
        Ok(set) => set,
        Err(e) => {
            error!("Could not load the test set: {}", e);
            return false;
        }
    };

    let count = if cmd.all {
        None
    } else if cmd.samples.is_some() || !io::stdin().is_terminal() {
        cmd.samples
    } else {
        prompt_sample_count(testset.len())
    };

    let port = match resolve_port(port) {
        Ok(Some(port)) => port,
        Ok(None) => {
            info!("No device selected");
            return false;
        }
        Err(e) => {
            error!("Could not pick a device: {}", e);
            return false;
        }
    };

    let mut rng = match settings.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let indices = select_indices(&testset, count, &mut rng);
    info!(
        "Testing {} of {} samples on {}",
        indices.len(),
        testset.len(),
        port.display()
    );

    let mut diagnoser =
        SerialDiagnoser::new(&port, settings.transport.clone(), settings.normalization);
    let Some(report) = run_batch(&testset, &indices, &mut diagnoser, &settings.run) else {
        println!("Every sample failed, nothing to score");
        return false;
    };

    println!("{}", "=".repeat(60));
    println!("Device test set results");
    println!("{}", "=".repeat(60));
    println!("{}", report);

    let drawn = plot_confusion_matrix(&report.confusion_matrix, report.accuracy, &settings.heatmap);
    if let Err(e) = drawn {
        warn!("Could not draw {}: {}", settings.heatmap.display(), e);
    }

    match report.save(&settings.results) {
        Ok(()) => println!("Results saved to {}", settings.results.display()),
        Err(e) => {
            error!("Could not save {}: {}", settings.results.display(), e);
            return false;
        }
    }

    if cmd.compare {
        compare_task(config);
    }
    true
}

fn compare_task(config: &BenchConfig) -> bool {
    match compare_files(&config.batch.reference, &config.batch.results) {
        Some(comparison) => {
            println!("{}", "=".repeat(60));
            println!("Host vs device");
            println!("{}", "=".repeat(60));
            println!("{}", comparison);
        }
        None => println!("Nothing to compare with, skipping"),
    }
    true
}
