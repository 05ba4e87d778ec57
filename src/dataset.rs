//! The held-out test set: a stack of precomputed spectrograms and the
//! ground-truth label for each one, as dumped by the training pipeline.

use crate::diagnosis::Label;
use crate::npy::{NpyArray, NpyError};
use crate::spectrogram::{Spectrogram, SpectrogramError};

use log::info;
use std::{
    borrow::Cow,
    fmt,
    path::{Path, PathBuf},
};

/// Where the training pipeline puts the test features by default.
pub const DEFAULT_FEATURES: &str = "X_test_stft.npy";

/// Where the training pipeline puts the test labels by default.
pub const DEFAULT_LABELS: &str = "y_test.npy";

/// Parallel spectrograms and labels.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSet {
    samples: Vec<Spectrogram>,
    labels: Vec<Label>,
}

/// Why a test set could not be loaded.
#[derive(Debug)]
pub enum DatasetError {
    /// One of the two files does not exist.
    Missing(PathBuf),

    /// A file exists but could not be decoded.
    Npy(PathBuf, NpyError),

    /// Features were not `(n, rows, cols)` plus channel axes of one, or
    /// labels were not `(n,)`.
    BadShape(String),

    /// A label other than 0 or 1, at the given index.
    BadLabel(usize, f64),

    /// A sample contained non-finite values.
    BadSample(usize, SpectrogramError),
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use DatasetError as DE;
        let msg = match self {
            DE::Missing(path) => Cow::from(format!("test set file {} not found", path.display())),
            DE::Npy(path, error) => Cow::from(format!("{}: {}", path.display(), error)),
            DE::BadShape(why) => Cow::from(format!("bad test set shape: {}", why)),
            DE::BadLabel(idx, label) => {
                Cow::from(format!("label {} at index {} is not 0 or 1", label, idx))
            }
            DE::BadSample(idx, error) => Cow::from(format!("sample {}: {}", idx, error)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for DatasetError {}

fn read_array(path: &Path) -> Result<NpyArray, DatasetError> {
    if !path.exists() {
        return Err(DatasetError::Missing(path.to_path_buf()));
    }
    NpyArray::from_path(path).map_err(|e| DatasetError::Npy(path.to_path_buf(), e))
}

/// Sample count, rows and cols of a features array. Channel axes of length
/// one, as in `(n, 64, 64, 1)` or `(n, 1, 64, 64)`, are dropped.
fn sample_axes(shape: &[usize]) -> Option<(usize, usize, usize)> {
    let (&n, dims) = shape.split_first()?;
    let mut dims = dims.to_vec();
    while dims.len() > 2 {
        let singleton = dims.iter().position(|&d| d == 1)?;
        dims.remove(singleton);
    }
    match dims[..] {
        [rows, cols] => Some((n, rows, cols)),
        _ => None,
    }
}

impl TestSet {
    /// Build a test set from already loaded samples and labels.
    pub fn new(samples: Vec<Spectrogram>, labels: Vec<Label>) -> Result<Self, DatasetError> {
        if samples.len() != labels.len() {
            return Err(DatasetError::BadShape(format!(
                "{} samples but {} labels",
                samples.len(),
                labels.len()
            )));
        }
        Ok(TestSet { samples, labels })
    }

    /// Load the features and labels arrays from disk.
    pub fn load(
        features_path: impl AsRef<Path>,
        labels_path: impl AsRef<Path>,
    ) -> Result<Self, DatasetError> {
        let features = read_array(features_path.as_ref())?;
        let labels = read_array(labels_path.as_ref())?;

        let (n, rows, cols) = sample_axes(&features.shape).ok_or_else(|| {
            DatasetError::BadShape(format!(
                "features have shape {:?}, expected (n, rows, cols)",
                features.shape
            ))
        })?;
        if labels.shape != [n] {
            return Err(DatasetError::BadShape(format!(
                "labels have shape {:?}, expected ({},)",
                labels.shape, n
            )));
        }

        let per_sample = rows * cols;
        let samples = features
            .data
            .chunks(per_sample.max(1))
            .take(n)
            .enumerate()
            .map(|(i, chunk)| {
                let values = chunk.iter().map(|&v| v as f32).collect();
                Spectrogram::new(rows, cols, values).map_err(|e| DatasetError::BadSample(i, e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let labels = labels
            .data
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                if v.fract() != 0.0 {
                    return Err(DatasetError::BadLabel(i, v));
                }
                Label::from_class(v as i64).ok_or(DatasetError::BadLabel(i, v))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let set = TestSet::new(samples, labels)?;
        info!(
            "Loaded test set: {} samples of {}x{}, {} healthy, {} fault",
            set.len(),
            rows,
            cols,
            set.count(Label::Healthy),
            set.count(Label::Fault)
        );
        Ok(set)
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if there are no samples at all.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample at `idx`.
    pub fn sample(&self, idx: usize) -> Option<&Spectrogram> {
        self.samples.get(idx)
    }

    /// Ground truth at `idx`.
    pub fn label(&self, idx: usize) -> Option<Label> {
        self.labels.get(idx).copied()
    }

    /// All labels, in order.
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Number of samples with the given label.
    pub fn count(&self, label: Label) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }

    /// Indices of samples with the given label, ascending.
    pub fn indices_of(&self, label: Label) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == label)
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pair(dir: &Path, features: NpyArray, labels: NpyArray) -> (PathBuf, PathBuf) {
        let fp = dir.join(DEFAULT_FEATURES);
        let lp = dir.join(DEFAULT_LABELS);
        features.to_path(&fp).unwrap();
        labels.to_path(&lp).unwrap();
        (fp, lp)
    }

    #[test]
    fn loads_stack() {
        let dir = tempfile::tempdir().unwrap();
        let (fp, lp) = write_pair(
            dir.path(),
            NpyArray {
                shape: vec![3, 2, 2],
                data: (0..12).map(|v| v as f64).collect(),
            },
            NpyArray {
                shape: vec![3],
                data: vec![0.0, 1.0, 1.0],
            },
        );

        let set = TestSet::load(fp, lp).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.sample(1).unwrap().values(), &[4.0, 5.0, 6.0, 7.0]);
        assert_eq!(set.label(0), Some(Label::Healthy));
        assert_eq!(set.count(Label::Fault), 2);
        assert_eq!(set.indices_of(Label::Fault), vec![1, 2]);
    }

    #[test]
    fn channel_axes_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (fp, lp) = write_pair(
            dir.path(),
            NpyArray {
                shape: vec![2, 4, 4, 1],
                data: (0..32).map(|v| v as f64).collect(),
            },
            NpyArray {
                shape: vec![2],
                data: vec![1.0, 0.0],
            },
        );

        let set = TestSet::load(fp, lp).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.sample(1).unwrap().shape(), (4, 4));
        assert_eq!(set.sample(1).unwrap().values()[0], 16.0);
        assert_eq!(set.label(0), Some(Label::Fault));

        assert_eq!(sample_axes(&[5, 1, 64, 64]), Some((5, 64, 64)));
        assert_eq!(sample_axes(&[5, 64, 64, 3]), None);
        assert_eq!(sample_axes(&[5, 64]), None);
        assert_eq!(sample_axes(&[]), None);
    }

    #[test]
    fn missing_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = TestSet::load(dir.path().join("nope.npy"), dir.path().join("y.npy")).unwrap_err();
        assert!(matches!(err, DatasetError::Missing(p) if p.ends_with("nope.npy")));
    }

    #[test]
    fn rejects_mismatched_or_bad_labels() {
        let dir = tempfile::tempdir().unwrap();
        let (fp, lp) = write_pair(
            dir.path(),
            NpyArray {
                shape: vec![2, 1, 1],
                data: vec![0.0, 0.0],
            },
            NpyArray {
                shape: vec![3],
                data: vec![0.0, 1.0, 1.0],
            },
        );
        assert!(matches!(
            TestSet::load(&fp, &lp),
            Err(DatasetError::BadShape(_))
        ));

        let (fp, lp) = write_pair(
            dir.path(),
            NpyArray {
                shape: vec![2, 1, 1],
                data: vec![0.0, 0.0],
            },
            NpyArray {
                shape: vec![2],
                data: vec![0.0, 2.0],
            },
        );
        assert!(matches!(
            TestSet::load(&fp, &lp),
            Err(DatasetError::BadLabel(1, _))
        ));
    }
}
