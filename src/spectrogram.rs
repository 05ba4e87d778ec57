//! The unit of input for the harness: a 2-D grid of spectrogram magnitudes,
//! usually in decibels, with frequency bins along the rows and time frames
//! along the columns.

use std::{borrow::Cow, fmt};

/// The shape the classifier on the microcontroller was trained on.
pub const MODEL_SHAPE: (usize, usize) = (64, 64);

/// A row-major, immutable 2-D array of finite magnitudes.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    rows: usize,
    cols: usize,
    values: Vec<f32>,
}

/// Returned when a [Spectrogram] can not be built from the values given.
#[derive(Debug, Clone, PartialEq)]
pub enum SpectrogramError {
    /// One of the dimensions was zero.
    EmptyShape,

    /// `rows * cols` did not match the number of values.
    ShapeMismatch {
        /// rows * cols
        expected: usize,
        /// number of values actually given
        found: usize,
    },

    /// A value was NaN or infinite, at the given flattened index.
    NonFinite(usize),
}

impl fmt::Display for SpectrogramError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use SpectrogramError as SE;
        let msg = match self {
            SE::EmptyShape => Cow::from("spectrogram has an empty dimension"),
            SE::ShapeMismatch { expected, found } => Cow::from(format!(
                "expected {} values for the given shape, found {}",
                expected, found
            )),
            SE::NonFinite(idx) => Cow::from(format!("non-finite value at index {}", idx)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for SpectrogramError {}

impl Spectrogram {
    /// Build a spectrogram from row-major values.
    pub fn new(rows: usize, cols: usize, values: Vec<f32>) -> Result<Self, SpectrogramError> {
        if rows == 0 || cols == 0 {
            return Err(SpectrogramError::EmptyShape);
        }
        if rows * cols != values.len() {
            return Err(SpectrogramError::ShapeMismatch {
                expected: rows * cols,
                found: values.len(),
            });
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(SpectrogramError::NonFinite(idx));
        }

        Ok(Spectrogram { rows, cols, values })
    }

    /// Build a spectrogram from a vector of rows, which must all be the same length.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, SpectrogramError> {
        let n_rows = rows.len();
        let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != n_cols) {
            return Err(SpectrogramError::ShapeMismatch {
                expected: n_rows * n_cols,
                found: rows.iter().map(|r| r.len()).sum(),
            });
        }
        Self::new(n_rows, n_cols, rows.concat())
    }

    /// Number of rows (frequency bins).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns (time frames).
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// The flattened, row-major values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Value at a row and column, if it is in bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row < self.rows && col < self.cols {
            Some(self.values[row * self.cols + col])
        } else {
            None
        }
    }

    /// Smallest value. Always exists since empty spectrograms can't be built.
    pub fn min(&self) -> f32 {
        self.values.iter().cloned().fold(f32::INFINITY, f32::min)
    }

    /// Largest value.
    pub fn max(&self) -> f32 {
        self.values.iter().cloned().fold(f32::NEG_INFINITY, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_indexes() {
        let s = Spectrogram::new(2, 3, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(s.shape(), (2, 3));
        assert_eq!(s.get(1, 0), Some(3.0));
        assert_eq!(s.get(2, 0), None);
        assert_eq!(s.min(), 0.0);
        assert_eq!(s.max(), 5.0);
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            Spectrogram::new(2, 2, vec![0.0; 3]),
            Err(SpectrogramError::ShapeMismatch {
                expected: 4,
                found: 3
            })
        );
        assert_eq!(
            Spectrogram::new(0, 2, vec![]),
            Err(SpectrogramError::EmptyShape)
        );
        assert_eq!(
            Spectrogram::new(1, 2, vec![0.0, f32::NAN]),
            Err(SpectrogramError::NonFinite(1))
        );
    }

    #[test]
    fn from_ragged_rows() {
        let rows = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(Spectrogram::from_rows(&rows).is_err());

        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let s = Spectrogram::from_rows(&rows).unwrap();
        assert_eq!(s.values(), &[1.0, 2.0, 3.0, 4.0]);
    }
}
