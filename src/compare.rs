//! Puts the device's accuracy next to the accuracy the model reached on the
//! host during cross validation.

use crate::batch::{BatchReport, ReportFileError};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path};

/// Where the training pipeline leaves its results by default.
pub const DEFAULT_REFERENCE: &str = "cross_validation_results.ron";

/// Accuracies closer than this count as matching.
pub const CLOSE_THRESHOLD: f64 = 0.05;

/// The part of the host results that is compared. Other fields in the file
/// are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceResults {
    /// accuracy on the held-out test set
    pub test_accuracy: Option<f64>,
}

impl ReferenceResults {
    /// Read a reference file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReportFileError> {
        let text = fs::read_to_string(path)?;
        let options = ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME);
        Ok(options.from_str(&text)?)
    }
}

/// Host and device accuracy side by side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    /// accuracy on the host
    pub reference: f64,
    /// accuracy on the device
    pub device: f64,
}

impl Comparison {
    /// Absolute difference of the two accuracies.
    pub fn difference(&self) -> f64 {
        (self.reference - self.device).abs()
    }

    /// True if the difference is below [CLOSE_THRESHOLD].
    pub fn is_close(&self) -> bool {
        self.difference() < CLOSE_THRESHOLD
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "Host accuracy:   {:.4} ({:.2}%)",
            self.reference,
            self.reference * 100.0
        )?;
        writeln!(
            f,
            "Device accuracy: {:.4} ({:.2}%)",
            self.device,
            self.device * 100.0
        )?;
        writeln!(
            f,
            "Difference:      {:.4} ({:.2}%)",
            self.difference(),
            self.difference() * 100.0
        )?;
        if self.is_close() {
            write!(f, "Device and host perform alike")
        } else {
            write!(f, "Device and host differ noticeably, the deployed model needs work")
        }
    }
}

/// Load both files and compare. Returns `None`, after logging why, if
/// either file is missing or unreadable or the host accuracy is absent.
pub fn compare_files(
    reference_path: impl AsRef<Path>,
    results_path: impl AsRef<Path>,
) -> Option<Comparison> {
    let (reference_path, results_path) = (reference_path.as_ref(), results_path.as_ref());
    for path in [reference_path, results_path] {
        if !path.exists() {
            warn!("{} not found, skipping comparison", path.display());
            return None;
        }
    }

    let reference = match ReferenceResults::load(reference_path) {
        Ok(r) => r,
        Err(e) => {
            warn!("Could not read {}: {}", reference_path.display(), e);
            return None;
        }
    };
    let device = match BatchReport::load(results_path) {
        Ok(r) => r,
        Err(e) => {
            warn!("Could not read {}: {}", results_path.display(), e);
            return None;
        }
    };

    let Some(reference) = reference.test_accuracy else {
        warn!("No host accuracy to compare with");
        return None;
    };
    let comparison = Comparison {
        reference,
        device: device.accuracy,
    };
    info!(
        "Accuracy difference {:.4}, {}",
        comparison.difference(),
        if comparison.is_close() { "close" } else { "not close" }
    );
    Some(comparison)
}
