//! What the microcontroller told us about one sample.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Confidence used for scoring when the device named a status but its
/// confidence could not be read.
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

/// Ground truth and predicted classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    /// class 0
    Healthy,
    /// class 1
    Fault,
}

impl Label {
    /// Both classes in matrix order.
    pub const ALL: [Label; 2] = [Label::Healthy, Label::Fault];

    /// Row or column of this class in a confusion matrix.
    pub fn index(self) -> usize {
        match self {
            Label::Healthy => 0,
            Label::Fault => 1,
        }
    }

    /// Human readable class name.
    pub fn name(self) -> &'static str {
        match self {
            Label::Healthy => "Healthy",
            Label::Fault => "Fault",
        }
    }

    /// Maps the integer labels used by the datasets, 0 and 1.
    pub fn from_class(class: i64) -> Option<Label> {
        match class {
            0 => Some(Label::Healthy),
            1 => Some(Label::Fault),
            _ => None,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The status part of a device verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// device reported a healthy motor
    Healthy,
    /// device reported a fault
    Fault,
    /// device answered, but not with a usable verdict
    Unknown,
    /// nothing recognizable arrived before the deadline
    Timeout,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Status::Healthy => "HEALTHY",
            Status::Fault => "FAULT",
            Status::Unknown => "UNKNOWN",
            Status::Timeout => "TIMEOUT",
        };
        write!(f, "{}", s)
    }
}

/// A single verdict, along with the text it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    /// verdict
    pub status: Status,
    /// `None` when the device gave no readable confidence
    pub confidence: Option<f32>,
    /// the line the verdict was read from, or everything received on timeout
    pub raw: String,
}

impl Diagnosis {
    /// The sentinel returned when no verdict arrived in time.
    pub fn timeout(raw: impl Into<String>) -> Self {
        Diagnosis {
            status: Status::Timeout,
            confidence: None,
            raw: raw.into(),
        }
    }

    /// The predicted class, or `None` if this result must not be scored.
    pub fn prediction(&self) -> Option<Label> {
        match self.status {
            Status::Healthy => Some(Label::Healthy),
            Status::Fault => Some(Label::Fault),
            Status::Unknown | Status::Timeout => None,
        }
    }

    /// Integer form of [Diagnosis::prediction]: 0, 1, or -1 for no result.
    pub fn prediction_code(&self) -> i8 {
        self.prediction().map(|l| l.index() as i8).unwrap_or(-1)
    }

    /// Confidence for scoring, substituting [FALLBACK_CONFIDENCE].
    pub fn confidence_or_fallback(&self) -> f32 {
        self.confidence.unwrap_or(FALLBACK_CONFIDENCE)
    }

    /// Confidence for display, `"unknown"` when missing.
    pub fn confidence_text(&self) -> String {
        match self.confidence {
            Some(c) => format!("{:.4}", c),
            None => "unknown".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prediction_codes() {
        let mut d = Diagnosis::timeout("");
        assert_eq!(d.prediction(), None);
        assert_eq!(d.prediction_code(), -1);

        d.status = Status::Fault;
        assert_eq!(d.prediction_code(), 1);
        d.status = Status::Healthy;
        assert_eq!(d.prediction_code(), 0);
        d.status = Status::Unknown;
        assert_eq!(d.prediction_code(), -1);
    }

    #[test]
    fn fallbacks() {
        let d = Diagnosis::timeout("");
        assert_eq!(d.confidence_or_fallback(), FALLBACK_CONFIDENCE);
        assert_eq!(d.confidence_text(), "unknown");
    }
}
