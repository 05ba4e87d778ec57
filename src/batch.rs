//! Runs a selection of the test set through the device and scores the
//! verdicts against the ground truth.

use crate::dataset::TestSet;
use crate::diagnosis::{Diagnosis, Label};
use crate::metrics::{ClassificationReport, ConfusionMatrix};
use crate::spectrogram::Spectrogram;
use crate::transport::{round_trip, TransportConfig, TransportError};
use crate::wire::Normalization;

use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt, fs, io,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

/// Where a finished batch is saved by default.
pub const DEFAULT_RESULTS: &str = "mcu_testset_results.ron";

/// Pause between samples by default.
pub const SAMPLE_PAUSE: Duration = Duration::from_millis(500);

/// Anything that can turn a spectrogram into a verdict.
pub trait Diagnoser {
    /// Get one verdict. Timeouts are verdicts, not errors.
    fn diagnose(&mut self, sample: &Spectrogram) -> Result<Diagnosis, TransportError>;
}

/// Diagnoses over a serial port, opening it afresh for every sample.
#[derive(Debug, Clone)]
pub struct SerialDiagnoser {
    port: PathBuf,
    transport: TransportConfig,
    normalization: Normalization,
    show_progress: bool,
}

impl SerialDiagnoser {
    /// A diagnoser for the device at `port`.
    pub fn new(
        port: impl Into<PathBuf>,
        transport: TransportConfig,
        normalization: Normalization,
    ) -> Self {
        SerialDiagnoser {
            port: port.into(),
            transport,
            normalization,
            show_progress: true,
        }
    }

    /// Turn the send progress bar on or off.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("Sending {bar:40} {pos}/{len} bytes")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar
    }
}

impl Diagnoser for SerialDiagnoser {
    fn diagnose(&mut self, sample: &Spectrogram) -> Result<Diagnosis, TransportError> {
        let bar = self.progress_bar();
        let result = round_trip(
            &self.port,
            sample,
            self.normalization,
            &self.transport,
            |sent, total| {
                bar.set_length(total as u64);
                bar.set_position(sent as u64);
            },
        );
        bar.finish_and_clear();
        result
    }
}

/// Settings of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// idle time between two samples
    pub pause: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            pause: SAMPLE_PAUSE,
        }
    }
}

/// Pick which samples to run. With no count, or a count covering the whole
/// set, every index is returned in order. Otherwise up to `count / 2` of
/// each class are drawn without replacement and the result is shuffled.
pub fn select_indices<R: Rng + ?Sized>(
    testset: &TestSet,
    count: Option<usize>,
    rng: &mut R,
) -> Vec<usize> {
    let count = match count {
        Some(c) if c < testset.len() => c,
        _ => return (0..testset.len()).collect(),
    };

    let mut selected: Vec<usize> = Label::ALL
        .iter()
        .flat_map(|&label| {
            testset
                .indices_of(label)
                .choose_multiple(rng, count / 2)
                .copied()
                .collect::<Vec<_>>()
        })
        .collect();
    selected.shuffle(rng);
    selected
}

/// Outcome of a batch run with at least one usable verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// samples attempted
    pub total_samples: usize,
    /// samples with a usable verdict
    pub successful_predictions: usize,
    /// samples without one
    pub failed_samples: usize,
    #[allow(missing_docs)]
    pub accuracy: f64,
    /// mean of `confidences`
    pub mean_confidence: f64,
    /// ground truth of scored samples
    pub y_true: Vec<Label>,
    /// verdicts of scored samples
    pub y_pred: Vec<Label>,
    /// confidence of each scored verdict, with the fallback substituted
    pub confidences: Vec<f32>,
    #[allow(missing_docs)]
    pub confusion_matrix: ConfusionMatrix,
    /// the rendered table
    pub classification_report: String,
}

/// Returned when a report can not be saved or loaded.
#[derive(Debug)]
pub enum ReportFileError {
    /// Returned when io fails when reading or writing the file.
    IoError(io::Error),

    /// Returned when the file is not a valid report.
    Parse(ron::error::SpannedError),

    /// Returned when the report can not be serialized.
    Serialize(ron::Error),
}

impl fmt::Display for ReportFileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ReportFileError::IoError(e) => Cow::from(format!("io error: {}", e)),
            ReportFileError::Parse(e) => Cow::from(format!("bad results file: {}", e)),
            ReportFileError::Serialize(e) => Cow::from(format!("serialization failed: {}", e)),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for ReportFileError {}

impl From<io::Error> for ReportFileError {
    fn from(value: io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<ron::error::SpannedError> for ReportFileError {
    fn from(value: ron::error::SpannedError) -> Self {
        Self::Parse(value)
    }
}

impl From<ron::Error> for ReportFileError {
    fn from(value: ron::Error) -> Self {
        Self::Serialize(value)
    }
}

impl BatchReport {
    /// Score the collected verdicts. Returns `None` if there are none.
    pub fn score(
        total_samples: usize,
        y_true: Vec<Label>,
        y_pred: Vec<Label>,
        confidences: Vec<f32>,
    ) -> Option<Self> {
        if y_pred.is_empty() {
            return None;
        }
        let confusion_matrix = ConfusionMatrix::from_labels(&y_true, &y_pred);
        let report = ClassificationReport::from_matrix(&confusion_matrix);
        let mean_confidence =
            confidences.iter().map(|&c| c as f64).sum::<f64>() / confidences.len().max(1) as f64;

        Some(BatchReport {
            total_samples,
            successful_predictions: y_pred.len(),
            failed_samples: total_samples - y_pred.len(),
            accuracy: confusion_matrix.accuracy(),
            mean_confidence,
            y_true,
            y_pred,
            confidences,
            confusion_matrix,
            classification_report: report.to_string(),
        })
    }

    /// Write the report as `ron`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ReportFileError> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Read a report written by [BatchReport::save].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReportFileError> {
        let text = fs::read_to_string(path)?;
        Ok(ron::from_str(&text)?)
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Total samples:          {}", self.total_samples)?;
        writeln!(f, "Successful predictions: {}", self.successful_predictions)?;
        writeln!(f, "Failed samples:         {}", self.failed_samples)?;
        writeln!(
            f,
            "Accuracy:               {:.4} ({:.2}%)",
            self.accuracy,
            self.accuracy * 100.0
        )?;
        writeln!(f, "Mean confidence:        {:.4}", self.mean_confidence)?;
        writeln!(f)?;
        write!(f, "{}", self.classification_report)
    }
}

/// Send every selected sample and score the verdicts. A connection error or
/// a verdict without a class counts as a failed sample. Returns `None` if no
/// sample got a usable verdict.
pub fn run_batch<D: Diagnoser + ?Sized>(
    testset: &TestSet,
    indices: &[usize],
    diagnoser: &mut D,
    config: &BatchConfig,
) -> Option<BatchReport> {
    info!(
        "Running {} samples: {} healthy, {} fault",
        indices.len(),
        indices
            .iter()
            .filter(|&&i| testset.label(i) == Some(Label::Healthy))
            .count(),
        indices
            .iter()
            .filter(|&&i| testset.label(i) == Some(Label::Fault))
            .count()
    );

    let mut y_true = Vec::new();
    let mut y_pred = Vec::new();
    let mut confidences = Vec::new();

    for (n, &idx) in indices.iter().enumerate() {
        if n > 0 && !config.pause.is_zero() {
            thread::sleep(config.pause);
        }

        let (Some(sample), Some(truth)) = (testset.sample(idx), testset.label(idx)) else {
            error!("Sample index {} is outside the test set", idx);
            continue;
        };
        info!(
            "Sample {}/{} (index {}), truth {}",
            n + 1,
            indices.len(),
            idx,
            truth
        );

        let diagnosis = match diagnoser.diagnose(sample) {
            Ok(d) => d,
            Err(e) => {
                error!("Sample {} failed: {}", idx, e);
                continue;
            }
        };

        let Some(predicted) = diagnosis.prediction() else {
            warn!("Sample {}: no usable verdict ({})", idx, diagnosis.status);
            continue;
        };
        let confidence = diagnosis.confidence_or_fallback();
        if !(0.0..=1.0).contains(&confidence) {
            warn!("Sample {}: confidence {} is outside [0, 1]", idx, confidence);
        }
        info!(
            "Device said {} ({}), {}",
            diagnosis.status,
            diagnosis.confidence_text(),
            if predicted == truth { "correct" } else { "wrong" }
        );

        y_true.push(truth);
        y_pred.push(predicted);
        confidences.push(confidence);
    }

    let report = BatchReport::score(indices.len(), y_true, y_pred, confidences);
    match &report {
        Some(r) => info!(
            "Batch done: accuracy {:.4} over {} of {} samples",
            r.accuracy, r.successful_predictions, r.total_samples
        ),
        None => error!("Every sample failed"),
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::Status;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::VecDeque;

    struct Scripted(VecDeque<Result<Diagnosis, TransportError>>);

    impl Diagnoser for Scripted {
        fn diagnose(&mut self, _: &Spectrogram) -> Result<Diagnosis, TransportError> {
            self.0
                .pop_front()
                .unwrap_or_else(|| Ok(Diagnosis::timeout("")))
        }
    }

    fn verdict(status: Status, confidence: Option<f32>) -> Result<Diagnosis, TransportError> {
        Ok(Diagnosis {
            status,
            confidence,
            raw: String::new(),
        })
    }

    fn testset(labels: &[Label]) -> TestSet {
        let samples = labels
            .iter()
            .map(|_| Spectrogram::new(2, 2, vec![0.0; 4]).unwrap())
            .collect();
        TestSet::new(samples, labels.to_vec()).unwrap()
    }

    const NO_PAUSE: BatchConfig = BatchConfig {
        pause: Duration::ZERO,
    };

    #[test]
    fn selects_everything_in_order() {
        let set = testset(&[Label::Healthy, Label::Fault, Label::Fault]);
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(select_indices(&set, None, &mut rng), vec![0, 1, 2]);
        assert_eq!(select_indices(&set, Some(3), &mut rng), vec![0, 1, 2]);
        assert_eq!(select_indices(&set, Some(30), &mut rng), vec![0, 1, 2]);
    }

    #[test]
    fn selects_balanced_subset() {
        let mut labels = vec![Label::Healthy; 10];
        labels.extend([Label::Fault; 20]);
        let set = testset(&labels);
        let mut rng = StdRng::seed_from_u64(1);

        let picked = select_indices(&set, Some(8), &mut rng);
        assert_eq!(picked.len(), 8);
        let healthy = picked.iter().filter(|&&i| i < 10).count();
        assert_eq!(healthy, 4);

        let mut unique = picked.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 8);
    }

    #[test]
    fn short_class_gives_what_it_has() {
        let mut labels = vec![Label::Healthy; 2];
        labels.extend([Label::Fault; 20]);
        let set = testset(&labels);
        let picked = select_indices(&set, Some(10), &mut StdRng::seed_from_u64(3));
        assert_eq!(picked.len(), 7);
    }

    #[test]
    fn scores_usable_verdicts_only() {
        let set = testset(&[Label::Healthy, Label::Fault, Label::Healthy, Label::Fault, Label::Fault]);
        let mut device = Scripted(VecDeque::from(vec![
            verdict(Status::Healthy, Some(0.9)),
            verdict(Status::Fault, None),
            verdict(Status::Fault, Some(0.7)),
            verdict(Status::Timeout, None),
            Err(TransportError::Receive(io::Error::other("gone"))),
        ]));

        let report = run_batch(&set, &[0, 1, 2, 3, 4], &mut device, &NO_PAUSE).unwrap();
        assert_eq!(report.total_samples, 5);
        assert_eq!(report.successful_predictions, 3);
        assert_eq!(report.failed_samples, 2);
        assert_eq!(report.confidences, vec![0.9, 0.5, 0.7]);
        assert_eq!(report.confusion_matrix.counts, [[1, 1], [0, 1]]);
        assert!((report.accuracy - 2.0 / 3.0).abs() < 1e-12);
        assert!((report.mean_confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn all_failures_give_no_report() {
        let set = testset(&[Label::Healthy, Label::Fault]);
        let mut device = Scripted(VecDeque::from(vec![
            verdict(Status::Unknown, None),
            verdict(Status::Timeout, None),
        ]));
        assert!(run_batch(&set, &[0, 1], &mut device, &NO_PAUSE).is_none());
    }

    #[test]
    fn report_persists_as_ron() {
        let report = BatchReport::score(
            3,
            vec![Label::Healthy, Label::Fault],
            vec![Label::Healthy, Label::Healthy],
            vec![0.8, 0.6],
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_RESULTS);

        report.save(&path).unwrap();
        assert_eq!(BatchReport::load(&path).unwrap(), report);
        assert_eq!(report.failed_samples, 1);
    }
}
