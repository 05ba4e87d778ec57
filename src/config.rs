//! Bench settings, read from an optional `ron` file. Every field has a
//! default, so a file only needs the fields it changes, e.g.
//!
//! ```ron
//! (
//!     port: "/dev/ttyUSB0",
//!     batch: (normalization: PerSample, run: (pause: (secs: 1, nanos: 0))),
//!     probe: (session: (recordings: "data/csv", faults: [Healthy, BowedRotor])),
//! )
//! ```

use crate::batch::{BatchConfig, DEFAULT_RESULTS};
use crate::compare::DEFAULT_REFERENCE;
use crate::dataset::{DEFAULT_FEATURES, DEFAULT_LABELS};
use crate::plot::CONFUSION_MATRIX_PNG;
use crate::probe::ProbeConfig;
use crate::transport::{TransportConfig, BATCH_REPLY_TIMEOUT};
use crate::wire::Normalization;

use ron::{extensions::Extensions, Options};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

/// How long the probe lets the device print its banner before sending.
pub const PROBE_SETTLE: Duration = Duration::from_secs(1);

/// Everything the binaries can be told.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// serial device; chosen interactively when absent
    pub port: Option<PathBuf>,
    #[allow(missing_docs)]
    pub batch: BatchSettings,
    #[allow(missing_docs)]
    pub probe: ProbeSettings,
}

/// Settings of the test set run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    #[allow(missing_docs)]
    pub transport: TransportConfig,
    #[allow(missing_docs)]
    pub normalization: Normalization,
    #[allow(missing_docs)]
    pub run: BatchConfig,
    /// precomputed test spectrograms
    pub features: PathBuf,
    /// their labels
    pub labels: PathBuf,
    /// where the batch report is written
    pub results: PathBuf,
    /// where the confusion matrix is drawn
    pub heatmap: PathBuf,
    /// host results to compare against
    pub reference: PathBuf,
    /// seed for subset selection; random when absent
    pub seed: Option<u64>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        BatchSettings {
            transport: TransportConfig {
                reply_timeout: BATCH_REPLY_TIMEOUT,
                ..Default::default()
            },
            normalization: Normalization::default(),
            run: BatchConfig::default(),
            features: PathBuf::from(DEFAULT_FEATURES),
            labels: PathBuf::from(DEFAULT_LABELS),
            results: PathBuf::from(DEFAULT_RESULTS),
            heatmap: PathBuf::from(CONFUSION_MATRIX_PNG),
            reference: PathBuf::from(DEFAULT_REFERENCE),
            seed: None,
        }
    }
}

/// Settings of the fault probe session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    #[allow(missing_docs)]
    pub transport: TransportConfig,
    #[allow(missing_docs)]
    pub session: ProbeConfig,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        ProbeSettings {
            transport: TransportConfig {
                settle: PROBE_SETTLE,
                ..Default::default()
            },
            session: ProbeConfig::default(),
        }
    }
}

/// Returned when the config file can not be used.
#[derive(Debug)]
pub enum ConfigError {
    /// Returned when io fails when reading the file.
    IoError(io::Error),

    /// Returned when the file is not valid `ron` for a [BenchConfig].
    Parse(ron::error::SpannedError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ConfigError::IoError(e) => Cow::from(format!("io error: {}", e)),
            ConfigError::Parse(e) => Cow::from(format!("bad config: {}", e)),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(value: io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<ron::error::SpannedError> for ConfigError {
    fn from(value: ron::error::SpannedError) -> Self {
        Self::Parse(value)
    }
}

impl BenchConfig {
    /// Parse a config from `ron` text. Optional fields may be written
    /// without `Some(..)`.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let options = Options::default().with_default_extension(Extensions::IMPLICIT_SOME);
        Ok(options.from_str(text)?)
    }

    /// Read a config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_ron(&fs::read_to_string(path)?)
    }

    /// The config at `path`, or the defaults when there is no path.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_path(p),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultType;
    use crate::transport::REPLY_TIMEOUT;

    #[test]
    fn defaults_differ_per_path() {
        let config = BenchConfig::default();
        assert_eq!(config.batch.transport.reply_timeout, BATCH_REPLY_TIMEOUT);
        assert_eq!(config.batch.transport.settle, Duration::ZERO);
        assert_eq!(config.probe.transport.reply_timeout, REPLY_TIMEOUT);
        assert_eq!(config.probe.transport.settle, PROBE_SETTLE);
        assert!(matches!(
            config.batch.normalization,
            Normalization::Calibrated { .. }
        ));
        assert_eq!(config.probe.session.normalization, Normalization::PerSample);
    }

    #[test]
    fn partial_file() {
        let text = r#"(
            port: "/dev/ttyUSB0",
            batch: (normalization: PerSample, run: (pause: (secs: 1, nanos: 0)), seed: 7),
            probe: (session: (recordings: "data/csv", faults: [Healthy, BowedRotor])),
        )"#;
        let config = BenchConfig::from_ron(text).unwrap();

        assert_eq!(config.port, Some(PathBuf::from("/dev/ttyUSB0")));
        assert_eq!(config.batch.normalization, Normalization::PerSample);
        assert_eq!(config.batch.run.pause, Duration::from_secs(1));
        assert_eq!(config.batch.seed, Some(7));
        assert_eq!(config.batch.features, PathBuf::from(DEFAULT_FEATURES));
        assert_eq!(
            config.probe.session.faults,
            vec![FaultType::Healthy, FaultType::BowedRotor]
        );
        assert_eq!(config.probe.transport.settle, PROBE_SETTLE);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            BenchConfig::from_ron("(port: 5"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            BenchConfig::load_or_default(Some(Path::new("/nonexistent/bench.ron"))),
            Err(ConfigError::IoError(_))
        ));
    }
}
