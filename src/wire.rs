//! Host to device framing. A transmission is a single start byte, the raw
//! payload, and a single end byte:
//!
//! ```text
//! 0xFF | payload[0] payload[1] ... payload[N-1] | 0xFE
//! ```
//!
//! There is no length prefix, checksum, or acknowledgement. The payload is
//! written in small chunks with a short pause after each one so that the
//! receiver's DMA buffer is not overrun.
//!
//! The payload itself is one byte per spectrogram value, rescaled into
//! `0..=255` according to a [Normalization] policy.

use crate::spectrogram::Spectrogram;
use crate::transport::DeviceLink;

use log::debug;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt, io, str::FromStr, time::Duration};

/// Marks the start of a transmission.
pub const START_BYTE: u8 = 0xFF;

/// Marks the end of a transmission.
pub const END_BYTE: u8 = 0xFE;

/// Default number of payload bytes written before pausing.
pub const CHUNK_SIZE: usize = 32;

/// Default pause between chunks.
pub const CHUNK_DELAY: Duration = Duration::from_millis(1);

/// The fixed dB range the model's training data was calibrated against.
pub const CALIBRATED_MIN: f32 = -115.0041;
/// See [CALIBRATED_MIN].
pub const CALIBRATED_MAX: f32 = 3.395;

/// How spectrogram values are mapped onto `0..=255`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Normalization {
    /// Rescale using the sample's own minimum and maximum.
    PerSample,

    /// Rescale using a fixed range; values outside it saturate.
    Calibrated {
        /// maps to 0
        min: f32,
        /// maps to 255
        max: f32,
    },
}

impl Default for Normalization {
    fn default() -> Self {
        Normalization::Calibrated {
            min: CALIBRATED_MIN,
            max: CALIBRATED_MAX,
        }
    }
}

impl Normalization {
    /// Flatten and rescale a spectrogram into a payload. The payload always
    /// has `rows * cols` bytes. Fractions are truncated, and a range of zero
    /// width encodes every value as 0.
    pub fn encode(&self, spectrogram: &Spectrogram) -> Vec<u8> {
        let (lo, hi) = match *self {
            Normalization::PerSample => (spectrogram.min(), spectrogram.max()),
            Normalization::Calibrated { min, max } => (min, max),
        };
        let width = hi - lo;

        spectrogram
            .values()
            .iter()
            .map(|&v| {
                if width <= 0.0 || !width.is_finite() {
                    return 0;
                }
                let unit = ((v - lo) / width).clamp(0.0, 1.0);
                // `as` saturates, and truncates like the firmware expects
                (unit * 255.0) as u8
            })
            .collect()
    }
}

/// Returned when a [Normalization] can not be parsed from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseNormalizationError(String);

impl fmt::Display for ParseNormalizationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "unknown normalization '{}', expected 'per-sample', 'calibrated' or 'calibrated:MIN:MAX'",
            self.0
        )
    }
}

impl std::error::Error for ParseNormalizationError {}

impl FromStr for Normalization {
    type Err = ParseNormalizationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseNormalizationError(s.to_owned());
        let mut parts = s.trim().split(':');
        match parts.next() {
            Some("per-sample") => Ok(Normalization::PerSample),
            Some("calibrated") => match (parts.next(), parts.next()) {
                (None, _) => Ok(Normalization::default()),
                (Some(min), Some(max)) => {
                    let min = min.parse().map_err(|_| err())?;
                    let max = max.parse().map_err(|_| err())?;
                    Ok(Normalization::Calibrated { min, max })
                }
                _ => Err(err()),
            },
            _ => Err(err()),
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            Normalization::PerSample => Cow::from("per-sample"),
            Normalization::Calibrated { min, max } => {
                Cow::from(format!("calibrated:{}:{}", min, max))
            }
        };
        write!(f, "{}", msg)
    }
}

/// Chunking parameters for [send_frame].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Bytes per write.
    pub chunk_size: usize,
    /// Pause after each write.
    pub chunk_delay: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing {
            chunk_size: CHUNK_SIZE,
            chunk_delay: CHUNK_DELAY,
        }
    }
}

/// Write one framed payload to the link. `progress` is called after every
/// chunk with the number of payload bytes sent so far and the total.
pub fn send_frame<L, F>(
    link: &mut L,
    payload: &[u8],
    pacing: &Pacing,
    mut progress: F,
) -> io::Result<()>
where
    L: DeviceLink + ?Sized,
    F: FnMut(usize, usize),
{
    let total = payload.len();

    link.write_all(&[START_BYTE])?;
    link.flush()?;
    debug!("Sent start byte, {} payload bytes to follow", total);

    let mut sent = 0;
    for chunk in payload.chunks(pacing.chunk_size.max(1)) {
        link.write_all(chunk)?;
        link.flush()?;
        spin_sleep::sleep(pacing.chunk_delay);
        sent += chunk.len();
        progress(sent, total);
    }

    link.write_all(&[END_BYTE])?;
    link.flush()?;
    debug!("Sent end byte");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::MockLink;

    fn ramp(rows: usize, cols: usize) -> Spectrogram {
        let values = (0..rows * cols).map(|v| v as f32 - 40.0).collect();
        Spectrogram::new(rows, cols, values).unwrap()
    }

    #[test]
    fn payload_covers_every_value_in_range() {
        let s = ramp(64, 64);
        for policy in [Normalization::PerSample, Normalization::default()] {
            let payload = policy.encode(&s);
            assert_eq!(payload.len(), 64 * 64);
        }

        let payload = Normalization::PerSample.encode(&s);
        assert_eq!(payload[0], 0);
        assert_eq!(payload[payload.len() - 1], 255);
    }

    #[test]
    fn calibrated_saturates() {
        let s = Spectrogram::new(1, 3, vec![-200.0, CALIBRATED_MIN, 50.0]).unwrap();
        assert_eq!(Normalization::default().encode(&s), vec![0, 0, 255]);
    }

    #[test]
    fn calibrated_truncates() {
        let s = Spectrogram::new(1, 2, vec![0.5, 0.999]).unwrap();
        let policy = Normalization::Calibrated { min: 0.0, max: 1.0 };
        // 127.5 and 254.7 both round down
        assert_eq!(policy.encode(&s), vec![127, 254]);
    }

    #[test]
    fn flat_sample_is_all_zero() {
        let s = Spectrogram::new(2, 2, vec![-7.0; 4]).unwrap();
        assert_eq!(Normalization::PerSample.encode(&s), vec![0; 4]);
    }

    #[test]
    fn parse_policy() {
        assert_eq!("per-sample".parse(), Ok(Normalization::PerSample));
        assert_eq!("calibrated".parse(), Ok(Normalization::default()));
        assert_eq!(
            "calibrated:-100:0".parse(),
            Ok(Normalization::Calibrated {
                min: -100.0,
                max: 0.0
            })
        );
        assert!("calibrated:-100".parse::<Normalization>().is_err());
        assert!("minmax".parse::<Normalization>().is_err());
    }

    #[test]
    fn frame_layout() {
        let mut link = MockLink::default();
        let payload: Vec<u8> = (0..70).collect();
        let pacing = Pacing {
            chunk_size: 32,
            chunk_delay: Duration::ZERO,
        };
        let mut seen = Vec::new();

        send_frame(&mut link, &payload, &pacing, |sent, total| {
            seen.push((sent, total))
        })
        .unwrap();

        assert_eq!(link.written.len(), 72);
        assert_eq!(link.written[0], START_BYTE);
        assert_eq!(&link.written[1..71], payload.as_slice());
        assert_eq!(link.written[71], END_BYTE);
        assert_eq!(seen, vec![(32, 70), (64, 70), (70, 70)]);
        // start, three chunks, end
        assert_eq!(link.writes, 5);
    }
}
