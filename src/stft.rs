//! Turns a slice of raw acoustic signal into the 64x64 dB spectrogram the
//! model was trained on.
//!
//! The transform matches what the training pipeline did: a symmetric Hann
//! window, zero padding of half a window at both ends, zero padding at the
//! tail to a whole number of hops, and spectra scaled by the window sum.
//! Only the band up to [StftParams::max_freq] is kept, and the result is
//! resized with an anti-aliasing filter.

use crate::spectrogram::{Spectrogram, SpectrogramError};

use image::{imageops::FilterType, ImageBuffer, Luma};
use log::debug;
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, f64::consts::PI, fmt};

/// Added to magnitudes before taking the log, so silence stays finite.
const DB_FLOOR: f64 = 1e-10;

/// Parameters of the short-time Fourier transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StftParams {
    /// Samples per second of the recording.
    pub sample_rate: f32,
    /// Samples per window.
    pub window_len: usize,
    /// Samples shared by consecutive windows.
    pub overlap: usize,
    /// Highest frequency kept, in Hz.
    pub max_freq: f32,
}

impl Default for StftParams {
    fn default() -> Self {
        StftParams {
            sample_rate: 42000.0,
            window_len: 512,
            overlap: 460,
            max_freq: 2000.0,
        }
    }
}

impl StftParams {
    /// Samples between the starts of consecutive windows.
    pub fn hop(&self) -> usize {
        self.window_len - self.overlap
    }

    /// Width of one frequency bin, in Hz.
    pub fn bin_width(&self) -> f32 {
        self.sample_rate / self.window_len as f32
    }

    /// Number of bins at or below [StftParams::max_freq].
    pub fn kept_bins(&self) -> usize {
        let all_bins = self.window_len / 2 + 1;
        (0..all_bins)
            .take_while(|&k| k as f32 * self.bin_width() <= self.max_freq)
            .count()
    }
}

/// Returned when the transform can not be computed.
#[derive(Debug, Clone, PartialEq)]
pub enum StftError {
    /// The window is empty, or the overlap is not smaller than the window.
    BadParams,

    /// There were no samples to transform.
    EmptySignal,

    /// No bin is at or below the frequency limit.
    NoBins,

    /// The FFT itself failed.
    Fft(String),

    /// The output was not a valid spectrogram.
    Spectrogram(SpectrogramError),
}

impl fmt::Display for StftError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            StftError::BadParams => Cow::from("overlap must be smaller than a non-empty window"),
            StftError::EmptySignal => Cow::from("signal is empty"),
            StftError::NoBins => Cow::from("no frequency bins below the limit"),
            StftError::Fft(e) => Cow::from(format!("fft failed: {}", e)),
            StftError::Spectrogram(e) => Cow::from(format!("{}", e)),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for StftError {}

impl From<SpectrogramError> for StftError {
    fn from(value: SpectrogramError) -> Self {
        Self::Spectrogram(value)
    }
}

/// Symmetric Hann window of `len` samples.
pub fn hann(len: usize) -> Vec<f64> {
    if len == 1 {
        return vec![1.0];
    }
    (0..len)
        .map(|n| 0.5 * (1.0 - (2.0 * PI * n as f64 / (len as f64 - 1.0)).cos()))
        .collect()
}

/// Compute the band-limited dB spectrogram of `signal`. Rows are frequency
/// bins from 0 Hz upward, columns are time frames.
pub fn spectrogram_db(signal: &[f64], params: &StftParams) -> Result<Spectrogram, StftError> {
    if params.window_len == 0 || params.overlap >= params.window_len {
        return Err(StftError::BadParams);
    }
    if signal.is_empty() {
        return Err(StftError::EmptySignal);
    }
    let bins = params.kept_bins();
    if bins == 0 {
        return Err(StftError::NoBins);
    }

    let win_len = params.window_len;
    let hop = params.hop();
    let edge = win_len / 2;

    // half a window of zeros on each side, then enough to fill the last hop
    let mut padded = vec![0.0; edge];
    padded.extend_from_slice(signal);
    padded.resize(padded.len() + edge, 0.0);
    let tail = (hop - (padded.len() - win_len) % hop) % hop;
    padded.resize(padded.len() + tail, 0.0);

    let frames = (padded.len() - win_len) / hop + 1;
    let window = hann(win_len);
    let scale = 1.0 / window.iter().sum::<f64>();

    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(win_len);
    let mut input = r2c.make_input_vec();
    let mut spectrum = r2c.make_output_vec();

    // rows are bins, so fill column by column
    let mut values = vec![0f32; bins * frames];
    for frame in 0..frames {
        let start = frame * hop;
        for ((dst, &x), &w) in input
            .iter_mut()
            .zip(&padded[start..start + win_len])
            .zip(&window)
        {
            *dst = x * w;
        }
        r2c.process(&mut input, &mut spectrum)
            .map_err(|e| StftError::Fft(e.to_string()))?;

        for (bin, c) in spectrum.iter().take(bins).enumerate() {
            let magnitude = c.norm() * scale;
            values[bin * frames + frame] = (20.0 * (magnitude + DB_FLOOR).log10()) as f32;
        }
    }

    debug!(
        "STFT of {} samples: {} bins x {} frames",
        signal.len(),
        bins,
        frames
    );
    Ok(Spectrogram::new(bins, frames, values)?)
}

/// Resize with a triangle filter whose support widens when shrinking, which
/// anti-aliases. The filter works on `[0, 1]` floats, so values are mapped
/// into that range and back.
pub fn resize(
    spectrogram: &Spectrogram,
    rows: usize,
    cols: usize,
) -> Result<Spectrogram, SpectrogramError> {
    if rows == 0 || cols == 0 {
        return Err(SpectrogramError::EmptyShape);
    }

    let lo = spectrogram.min();
    let width = spectrogram.max() - lo;
    let unit: Vec<f32> = spectrogram
        .values()
        .iter()
        .map(|&v| if width > 0.0 { (v - lo) / width } else { 0.0 })
        .collect();

    let expected = spectrogram.rows() * spectrogram.cols();
    let source: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::from_raw(
        spectrogram.cols() as u32,
        spectrogram.rows() as u32,
        unit,
    )
    .ok_or(SpectrogramError::ShapeMismatch {
        expected,
        found: expected,
    })?;

    let resized =
        image::imageops::resize(&source, cols as u32, rows as u32, FilterType::Triangle);
    let values = resized
        .into_raw()
        .into_iter()
        .map(|u| lo + u * width)
        .collect();

    Spectrogram::new(rows, cols, values)
}

/// The whole pipeline: transform, band-limit, and resize to `shape`.
pub fn model_input(
    signal: &[f64],
    params: &StftParams,
    shape: (usize, usize),
) -> Result<Spectrogram, StftError> {
    let full = spectrogram_db(signal, params)?;
    Ok(resize(&full, shape.0, shape.1)?)
}
