//! Loads one slice of a raw motor recording and turns it into a model input.
//!
//! Recordings live in a single directory, one file per fault type and
//! operating condition, named `{code}_{condition}.csv` (e.g. `S_W_4_0.csv`).
//! The CSV has a header row and the acoustic signal in its second column. A
//! `.wav` with the same stem is used instead when present.
//!
//! Each recording is cut into equal slices and one slice is transformed.

use crate::fault::FaultType;
use crate::spectrogram::{Spectrogram, MODEL_SHAPE};
use crate::stft::{model_input, StftError, StftParams};

use hound::WavReader;
use log::{debug, info};
use std::{
    borrow::Cow,
    fmt, fs, io,
    path::{Path, PathBuf},
};

/// How many slices a recording is cut into.
pub const SLICES_PER_RECORDING: usize = 100;

/// Operating condition used when none is given.
pub const DEFAULT_CONDITION: &str = "4_0";

/// Which slice of which recording to load.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSpec {
    /// directory holding the recordings
    pub root: PathBuf,
    /// motor condition
    pub fault: FaultType,
    /// operating condition part of the file name
    pub condition: String,
    /// which slice to take
    pub slice_index: usize,
    /// how many slices the recording is cut into
    pub slices: usize,
}

impl RecordingSpec {
    /// The first slice of the default condition.
    pub fn new(root: impl Into<PathBuf>, fault: FaultType) -> Self {
        RecordingSpec {
            root: root.into(),
            fault,
            condition: DEFAULT_CONDITION.to_owned(),
            slice_index: 0,
            slices: SLICES_PER_RECORDING,
        }
    }

    fn stem(&self) -> String {
        format!("{}_{}", self.fault.code(), self.condition)
    }

    /// The CSV path for this recording.
    pub fn csv_path(&self) -> PathBuf {
        self.root.join(format!("{}.csv", self.stem()))
    }

    /// The WAV path for this recording.
    pub fn wav_path(&self) -> PathBuf {
        self.root.join(format!("{}.wav", self.stem()))
    }
}

/// Why a recording slice could not be produced.
#[derive(Debug)]
pub enum RecordingError {
    /// Neither a CSV nor a WAV exists for the recording.
    Missing(PathBuf),

    /// Returned when io fails when reading files.
    IoError(io::Error),

    /// Returned when the WAV file can not be decoded.
    HoundError(hound::Error),

    /// The slice index is not below the number of slices.
    SliceOutOfRange {
        /// requested slice
        index: usize,
        /// number of slices
        slices: usize,
    },

    /// The recording is too short to give each slice any samples.
    TooShort(usize),

    /// The transform failed.
    Stft(StftError),
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use RecordingError as RE;
        let msg = match self {
            RE::Missing(path) => Cow::from(format!("recording {} not found", path.display())),
            RE::IoError(error) => Cow::from(format!("io error: {}", error)),
            RE::HoundError(error) => Cow::from(format!("wav error: {}", error)),
            RE::SliceOutOfRange { index, slices } => Cow::from(format!(
                "slice {} requested but the recording has {} slices",
                index, slices
            )),
            RE::TooShort(len) => Cow::from(format!("recording of {} samples is too short", len)),
            RE::Stft(error) => Cow::from(format!("stft error: {}", error)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for RecordingError {}

impl From<io::Error> for RecordingError {
    fn from(value: io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<hound::Error> for RecordingError {
    fn from(value: hound::Error) -> Self {
        Self::HoundError(value)
    }
}

impl From<StftError> for RecordingError {
    fn from(value: StftError) -> Self {
        Self::Stft(value)
    }
}

/// Second column of every data row; rows where it isn't a number are skipped.
pub fn parse_signal_csv(text: &str) -> Vec<f64> {
    text.lines()
        .skip(1)
        .enumerate()
        .filter_map(|(row, line)| {
            let field = line.split(',').nth(1).map(str::trim);
            match field.and_then(|f| f.parse::<f64>().ok()) {
                Some(v) if v.is_finite() => Some(v),
                _ => {
                    debug!("Skipping CSV row {}: {:?}", row + 2, line);
                    None
                }
            }
        })
        .collect()
}

/// First channel of a WAV file, as floats.
fn read_wav(path: &Path) -> Result<Vec<f64>, RecordingError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f64> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(f64::from))
            .collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => reader
            .samples::<i32>()
            .map(|s| s.map(f64::from))
            .collect::<Result<_, _>>()?,
    };

    Ok(samples.into_iter().step_by(channels).collect())
}

/// Read the whole signal of a recording.
pub fn read_signal(spec: &RecordingSpec) -> Result<Vec<f64>, RecordingError> {
    let wav = spec.wav_path();
    if wav.exists() {
        return read_wav(&wav);
    }

    let csv = spec.csv_path();
    if !csv.exists() {
        return Err(RecordingError::Missing(csv));
    }
    Ok(parse_signal_csv(&fs::read_to_string(&csv)?))
}

/// The `index`th of `slices` equal, contiguous slices. Samples left over at
/// the end are never part of any slice.
pub fn take_slice(signal: &[f64], index: usize, slices: usize) -> Result<&[f64], RecordingError> {
    if index >= slices {
        return Err(RecordingError::SliceOutOfRange { index, slices });
    }
    let slice_len = signal.len() / slices;
    if slice_len == 0 {
        return Err(RecordingError::TooShort(signal.len()));
    }
    Ok(&signal[index * slice_len..(index + 1) * slice_len])
}

/// Load a recording slice and transform it into a model input.
pub fn load_fault_sample(
    spec: &RecordingSpec,
    params: &StftParams,
) -> Result<Spectrogram, RecordingError> {
    let signal = read_signal(spec)?;
    let slice = take_slice(&signal, spec.slice_index, spec.slices)?;
    info!(
        "Loaded {} samples of {}, transforming slice {} ({} samples)",
        signal.len(),
        spec.fault,
        spec.slice_index,
        slice.len()
    );
    Ok(model_input(slice, params, MODEL_SHAPE)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::f64::consts::PI;

    fn write_csv(dir: &Path, name: &str, samples: usize) {
        let mut text = String::from("Time,Signal\n");
        for n in 0..samples {
            let v = (2.0 * PI * 700.0 * n as f64 / 42000.0).sin();
            text.push_str(&format!("{},{}\n", n as f64 / 42000.0, v));
        }
        fs::write(dir.join(name), text).unwrap();
    }

    #[test]
    fn csv_second_column() {
        let text = "Time,Signal\n0.0,1.5\n0.1, -2\nbad row\n0.2,nan\n0.3,4\n";
        assert_eq!(parse_signal_csv(text), vec![1.5, -2.0, 4.0]);
    }

    #[test]
    fn slices() {
        let signal: Vec<f64> = (0..1005).map(|v| v as f64).collect();
        let s = take_slice(&signal, 3, 100).unwrap();
        assert_eq!(s.len(), 10);
        assert_eq!(s[0], 30.0);
        assert!(matches!(
            take_slice(&signal, 100, 100),
            Err(RecordingError::SliceOutOfRange { .. })
        ));
        assert!(matches!(
            take_slice(&signal[..50], 0, 100),
            Err(RecordingError::TooShort(50))
        ));
    }

    #[test]
    fn missing_recording() {
        let dir = tempfile::tempdir().unwrap();
        let spec = RecordingSpec::new(dir.path(), FaultType::BowedRotor);
        let err = load_fault_sample(&spec, &StftParams::default()).unwrap_err();
        assert!(matches!(err, RecordingError::Missing(p) if p.ends_with("B_R_4_0.csv")));
    }

    #[test]
    fn csv_recording_to_model_input() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "S_W_4_0.csv", 42000);
        let spec = RecordingSpec {
            slice_index: 2,
            ..RecordingSpec::new(dir.path(), FaultType::StatorWinding)
        };
        let s = load_fault_sample(&spec, &StftParams::default()).unwrap();
        assert_eq!(s.shape(), MODEL_SHAPE);
    }

    #[test]
    fn wav_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let spec = RecordingSpec::new(dir.path(), FaultType::Healthy);
        let wav_spec = WavSpec {
            channels: 2,
            sample_rate: 42000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(spec.wav_path(), wav_spec).unwrap();
        for n in 0..1000i16 {
            writer.write_sample(n).unwrap();
            writer.write_sample(-n).unwrap();
        }
        writer.finalize().unwrap();

        let signal = read_signal(&spec).unwrap();
        assert_eq!(signal.len(), 1000);
        assert_eq!(signal[10], 10.0);
    }
}
