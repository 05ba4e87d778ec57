//! The fault probe session: one recording slice per fault type is sent to
//! the device, and each verdict is judged against what that fault type
//! should produce. The session is interactive, but all interaction goes
//! through callbacks so the session itself never touches stdin.

use crate::batch::Diagnoser;
use crate::diagnosis::{Diagnosis, Status};
use crate::fault::FaultType;
use crate::plot::{plot_sample_visualization, visualization_file_name};
use crate::recording::{
    load_fault_sample, RecordingError, RecordingSpec, DEFAULT_CONDITION, SLICES_PER_RECORDING,
};
use crate::stft::StftParams;
use crate::wire::Normalization;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};

/// Whether a prepared sample is sent without asking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmPolicy {
    /// ask through the confirm callback
    #[default]
    Ask,
    /// send everything
    Always,
    /// prepare and visualize only
    Never,
}

/// Settings of a probe session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// directory holding the recordings
    pub recordings: PathBuf,
    /// operating condition part of the recording names
    pub condition: String,
    /// which slice of each recording is sent
    pub slice_index: usize,
    /// fault types to walk, in order
    pub faults: Vec<FaultType>,
    #[allow(missing_docs)]
    pub confirm: ConfirmPolicy,
    /// how samples are scaled onto the wire
    pub normalization: Normalization,
    /// where visualizations are written, none if `None`
    pub visualize_dir: Option<PathBuf>,
    #[allow(missing_docs)]
    pub stft: StftParams,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            recordings: PathBuf::from("."),
            condition: DEFAULT_CONDITION.to_owned(),
            slice_index: 0,
            faults: FaultType::ALL.to_vec(),
            confirm: ConfirmPolicy::Ask,
            normalization: Normalization::PerSample,
            visualize_dir: Some(PathBuf::from(".")),
            stft: StftParams::default(),
        }
    }
}

impl ProbeConfig {
    fn recording(&self, fault: FaultType) -> RecordingSpec {
        RecordingSpec {
            root: self.recordings.clone(),
            fault,
            condition: self.condition.clone(),
            slice_index: self.slice_index,
            slices: SLICES_PER_RECORDING,
        }
    }
}

/// How a verdict compares with the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// the device named the expected status
    Correct,
    /// the device named some other status
    Wrong,
    /// the device did not answer in time
    TimedOut,
    /// the round trip itself failed
    NoResult,
}

impl Verdict {
    /// Judge a round trip for a sample of `fault`.
    pub fn judge(fault: FaultType, diagnosis: Option<&Diagnosis>) -> Verdict {
        match diagnosis {
            None => Verdict::NoResult,
            Some(d) if d.status == fault.expected_status() => Verdict::Correct,
            Some(d) if d.status == Status::Timeout => Verdict::TimedOut,
            Some(_) => Verdict::Wrong,
        }
    }
}

/// Which LED the firmware should light for a status.
pub fn expected_led(status: Status) -> &'static str {
    match status {
        Status::Fault => "red",
        _ => "green",
    }
}

/// One fault type that was sent.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    #[allow(missing_docs)]
    pub fault: FaultType,
    /// `None` if the round trip failed
    pub diagnosis: Option<Diagnosis>,
    #[allow(missing_docs)]
    pub verdict: Verdict,
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mark = if self.verdict == Verdict::Correct { "ok  " } else { "FAIL" };
        write!(f, "{} {}", mark, self.fault)?;
        if let Some(d) = &self.diagnosis {
            write!(
                f,
                "\n       diagnosis: {}, confidence: {}",
                d.status,
                d.confidence_text()
            )?;
        }
        Ok(())
    }
}

/// Everything a probe session did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeSummary {
    /// fault types that were sent, in order
    pub outcomes: Vec<ProbeOutcome>,
    /// fault types prepared but not sent
    pub skipped: Vec<FaultType>,
    /// fault types whose sample could not be prepared
    pub unavailable: Vec<FaultType>,
}

impl ProbeSummary {
    /// Number of correct verdicts.
    pub fn correct(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.verdict == Verdict::Correct)
            .count()
    }

    /// Number of fault types sent.
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Fraction correct, `None` if nothing was sent.
    pub fn accuracy(&self) -> Option<f64> {
        (self.total() > 0).then(|| self.correct() as f64 / self.total() as f64)
    }
}

impl fmt::Display for ProbeSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(f, "Probe summary")?;
        writeln!(f, "{}", "=".repeat(60))?;
        match self.accuracy() {
            Some(acc) => writeln!(
                f,
                "Overall accuracy: {}/{} ({:.1}%)",
                self.correct(),
                self.total(),
                acc * 100.0
            )?,
            None => writeln!(f, "No fault types were sent")?,
        }
        for (i, outcome) in self.outcomes.iter().enumerate() {
            writeln!(f, "  {:>2}. {}", i + 1, outcome)?;
        }
        if !self.skipped.is_empty() {
            let codes: Vec<_> = self.skipped.iter().map(|t| t.code()).collect();
            writeln!(f, "Skipped: {}", codes.join(", "))?;
        }
        if !self.unavailable.is_empty() {
            let codes: Vec<_> = self.unavailable.iter().map(|t| t.code()).collect();
            writeln!(f, "No recording: {}", codes.join(", "))?;
        }
        Ok(())
    }
}

/// Walk the configured fault types. `confirm` is asked before each send
/// when the policy is [ConfirmPolicy::Ask]; `after_send` sees every outcome
/// as soon as it is judged.
pub fn run_probe_session<D, C, A>(
    config: &ProbeConfig,
    diagnoser: &mut D,
    mut confirm: C,
    mut after_send: A,
) -> ProbeSummary
where
    D: Diagnoser + ?Sized,
    C: FnMut(FaultType) -> bool,
    A: FnMut(&ProbeOutcome),
{
    let mut summary = ProbeSummary::default();

    for &fault in &config.faults {
        info!("Probing {}", fault);
        let sample = match load_fault_sample(&config.recording(fault), &config.stft) {
            Ok(s) => s,
            Err(RecordingError::Missing(path)) => {
                warn!("No recording for {} at {}", fault.code(), path.display());
                summary.unavailable.push(fault);
                continue;
            }
            Err(e) => {
                error!("Could not prepare {}: {}", fault.code(), e);
                summary.unavailable.push(fault);
                continue;
            }
        };

        if let Some(dir) = &config.visualize_dir {
            let path = dir.join(visualization_file_name(fault.code()));
            if let Err(e) =
                plot_sample_visualization(&sample, config.normalization, fault.code(), &path)
            {
                warn!("Could not draw {}: {}", path.display(), e);
            }
        }

        let send = match config.confirm {
            ConfirmPolicy::Always => true,
            ConfirmPolicy::Never => false,
            ConfirmPolicy::Ask => confirm(fault),
        };
        if !send {
            info!("Skipping {}", fault.code());
            summary.skipped.push(fault);
            continue;
        }

        let diagnosis = match diagnoser.diagnose(&sample) {
            Ok(d) => Some(d),
            Err(e) => {
                error!("Round trip for {} failed: {}", fault.code(), e);
                None
            }
        };
        let verdict = Verdict::judge(fault, diagnosis.as_ref());
        let expected = fault.expected_status();
        match (&verdict, &diagnosis) {
            (Verdict::Correct, _) => info!("{}: correct, device said {}", fault.code(), expected),
            (Verdict::TimedOut, _) => warn!("{}: timed out, check the device", fault.code()),
            (Verdict::Wrong, Some(d)) => warn!(
                "{}: wrong, expected {} ({} LED) but got {}",
                fault.code(),
                expected,
                expected_led(expected),
                d.status
            ),
            _ => warn!("{}: no diagnosis", fault.code()),
        }

        let outcome = ProbeOutcome {
            fault,
            diagnosis,
            verdict,
        };
        after_send(&outcome);
        summary.outcomes.push(outcome);
    }

    summary
}
