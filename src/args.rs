// Commandline argument parsers using clap for the motorbench and faultprobe
// binaries

use crate::config::BenchConfig;
use crate::fault::FaultType;
use crate::probe::ConfirmPolicy;
use crate::wire::Normalization;

use clap::{Args, Parser, Subcommand};
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
/// Send the held-out test set to the motor fault classifier running on a
/// microcontroller, and score what it answers
pub struct BenchArgs {
    #[command(subcommand, long_about)]
    /// Which task to perform
    pub command: BenchTask,

    /// Settings file in ron format
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Serial device of the microcontroller, picked from a list if absent
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<PathBuf>,
}

/// The tasks of the motorbench binary
#[derive(Debug, Subcommand, Clone)]
pub enum BenchTask {
    /// List the serial devices on this machine
    #[command(about)]
    Ports,

    /// Run test set samples through the device and score the verdicts
    #[command(about)]
    Batch(BatchCommand),

    /// Compare a saved batch report with the host's cross validation results
    #[command(about)]
    Compare(CompareCommand),
}

/// Flags of the batch task
#[derive(Debug, Args, Clone, Default)]
#[command(version, about)]
pub struct BatchCommand {
    /// Number of samples, drawn half healthy and half fault. Asked for if
    /// absent and stdin is a terminal; every sample is used otherwise
    #[arg(short = 'n', long = "samples")]
    pub samples: Option<usize>,

    /// Use every sample without asking
    #[arg(short = 'a', long = "all", conflicts_with = "samples")]
    pub all: bool,

    /// Test set spectrograms, a 3-D npy array
    #[arg(long = "features")]
    pub features: Option<PathBuf>,

    /// Test set labels, a 1-D npy array of 0 and 1
    #[arg(long = "labels")]
    pub labels: Option<PathBuf>,

    /// Where the results are written
    #[arg(short = 'o', long = "out")]
    pub results: Option<PathBuf>,

    /// Where the confusion matrix is drawn
    #[arg(long = "heatmap")]
    pub heatmap: Option<PathBuf>,

    /// per-sample, calibrated, or calibrated:MIN:MAX
    #[arg(long = "normalization")]
    pub normalization: Option<Normalization>,

    /// Seconds to wait for each verdict
    #[arg(short = 't', long = "timeout")]
    pub timeout: Option<u64>,

    /// Milliseconds to idle between samples
    #[arg(long = "pause")]
    pub pause: Option<u64>,

    /// Seed for the subset draw
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Also compare with the host results when done
    #[arg(long = "compare")]
    pub compare: bool,
}

impl BatchCommand {
    /// Write every given flag over the settings.
    pub fn apply(&self, config: &mut BenchConfig) {
        let batch = &mut config.batch;
        if let Some(p) = &self.features {
            batch.features = p.clone();
        }
        if let Some(p) = &self.labels {
            batch.labels = p.clone();
        }
        if let Some(p) = &self.results {
            batch.results = p.clone();
        }
        if let Some(p) = &self.heatmap {
            batch.heatmap = p.clone();
        }
        if let Some(n) = self.normalization {
            batch.normalization = n;
        }
        if let Some(secs) = self.timeout {
            batch.transport.reply_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = self.pause {
            batch.run.pause = Duration::from_millis(ms);
        }
        if self.seed.is_some() {
            batch.seed = self.seed;
        }
    }
}

/// Flags of the compare task
#[derive(Debug, Args, Clone, Default)]
#[command(version, about)]
pub struct CompareCommand {
    /// Host cross validation results
    #[arg(short = 'r', long = "reference")]
    pub reference: Option<PathBuf>,

    /// Batch report written by the batch task
    #[arg(short = 'o', long = "results")]
    pub results: Option<PathBuf>,
}

impl CompareCommand {
    /// Write every given flag over the settings.
    pub fn apply(&self, config: &mut BenchConfig) {
        if let Some(p) = &self.reference {
            config.batch.reference = p.clone();
        }
        if let Some(p) = &self.results {
            config.batch.results = p.clone();
        }
    }
}

#[derive(Debug, Parser, Clone, Default)]
#[clap(version, about)]
/// Send one recording slice per motor fault type to the microcontroller and
/// check each verdict
pub struct ProbeArgs {
    /// Settings file in ron format
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Serial device of the microcontroller, picked from a list if absent
    #[arg(short = 'p', long = "port")]
    pub port: Option<PathBuf>,

    /// Directory holding the {code}_{condition}.csv recordings
    #[arg(short = 'd', long = "recordings")]
    pub recordings: Option<PathBuf>,

    /// Operating condition part of the recording names
    #[arg(long = "condition")]
    pub condition: Option<String>,

    /// Which of the 100 slices of each recording to send
    #[arg(short = 'i', long = "slice")]
    pub slice_index: Option<usize>,

    /// Fault codes to probe, e.g. H_H S_W
    #[arg(short = 'f', long = "faults")]
    #[clap(num_args = 1..)]
    pub faults: Vec<FaultType>,

    /// Send without asking
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,

    /// Prepare and draw the samples, send nothing
    #[arg(long = "dry-run", conflicts_with = "yes")]
    pub dry_run: bool,

    /// per-sample, calibrated, or calibrated:MIN:MAX
    #[arg(long = "normalization")]
    pub normalization: Option<Normalization>,

    /// Directory for the visualizations
    #[arg(long = "plots")]
    pub plots: Option<PathBuf>,

    /// Skip the visualizations
    #[arg(long = "no-plots", conflicts_with = "plots")]
    pub no_plots: bool,

    /// Seconds to wait for each verdict
    #[arg(short = 't', long = "timeout")]
    pub timeout: Option<u64>,
}

impl ProbeArgs {
    /// Write every given flag over the settings.
    pub fn apply(&self, config: &mut BenchConfig) {
        if self.port.is_some() {
            config.port = self.port.clone();
        }
        let session = &mut config.probe.session;
        if let Some(p) = &self.recordings {
            session.recordings = p.clone();
        }
        if let Some(c) = &self.condition {
            session.condition = c.clone();
        }
        if let Some(i) = self.slice_index {
            session.slice_index = i;
        }
        if !self.faults.is_empty() {
            session.faults = self.faults.clone();
        }
        if self.yes {
            session.confirm = ConfirmPolicy::Always;
        }
        if self.dry_run {
            session.confirm = ConfirmPolicy::Never;
        }
        if let Some(n) = self.normalization {
            session.normalization = n;
        }
        if self.plots.is_some() {
            session.visualize_dir = self.plots.clone();
        }
        if self.no_plots {
            session.visualize_dir = None;
        }
        if let Some(secs) = self.timeout {
            config.probe.transport.reply_timeout = Duration::from_secs(secs);
        }
    }
}
