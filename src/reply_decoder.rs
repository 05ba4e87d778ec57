//! Grammar for the lines the firmware prints back over the serial link.
//!
//! The device is chatty: it prints banners, progress, and debugging output
//! alongside its verdicts, so a verdict is located anywhere inside a line
//! rather than anchored at its start. Two verdict formats are recognized,
//! the first taking precedence:
//!
//! ```text
//! DIAGNOSIS: FAULT detected (confidence: 0.8731)
//! RESULT: FAULT_DETECTED,0.8731
//! ```
//!
//! A line also counts as a (negative) answer when the firmware says it
//! could not run inference at all, so the host can stop waiting early.

use crate::diagnosis::{Diagnosis, Status};

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_until},
    character::complete::{char, space0},
    combinator::{all_consuming, cut, opt, value},
    error::{Error, ErrorKind},
    number::complete::float,
    sequence::{delimited, preceded},
    Finish, IResult,
};

use std::str::FromStr;

/// Phrases the firmware prints when it gives up on a transmission.
const REJECTIONS: [&str; 3] = [
    "invalid stft data",
    "inference failed",
    "model not initialized",
];

/// A recognized line from the device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceReply {
    /// `DIAGNOSIS: ... (confidence: x)`
    Diagnosis {
        /// FAULT or HEALTHY
        status: Status,
        /// `None` if the number was missing or garbled
        confidence: Option<f32>,
    },

    /// `RESULT: label, x`
    Result {
        /// FAULT if the label mentions it, HEALTHY otherwise
        status: Status,
        /// `None` if the number was missing or garbled
        confidence: Option<f32>,
    },

    /// The device refused or failed to run inference.
    Rejected,
}

impl DeviceReply {
    /// Turn a reply into a [Diagnosis], keeping the text it came from.
    pub fn into_diagnosis(self, raw: &str) -> Diagnosis {
        let (status, confidence) = match self {
            DeviceReply::Diagnosis { status, confidence } => (status, confidence),
            DeviceReply::Result { status, confidence } => (status, confidence),
            DeviceReply::Rejected => (Status::Unknown, None),
        };
        Diagnosis {
            status,
            confidence,
            raw: raw.to_owned(),
        }
    }
}

/// Find `marker` anywhere in the input and consume through it.
fn locate<'a>(marker: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    preceded(take_until(marker), tag(marker))
}

/// A finite float, optionally padded with spaces, and nothing else.
fn parse_confidence(text: &str) -> Option<f32> {
    all_consuming(delimited(space0, float::<&str, Error<&str>>, space0))(text)
        .ok()
        .map(|(_, v)| v)
        .filter(|v| v.is_finite())
}

/// The text between `confidence:` and the next `)`.
fn confidence_field(s: &str) -> IResult<&str, &str> {
    preceded(locate("confidence:"), take_until(")"))(s)
}

fn diagnosis_body(s: &str) -> IResult<&str, DeviceReply> {
    let (_, status) = alt((
        value(Status::Fault, locate("FAULT")),
        value(Status::Healthy, locate("HEALTHY")),
    ))(s)?;

    let confidence = confidence_field(s)
        .ok()
        .and_then(|(_, text)| parse_confidence(text));

    Ok(("", DeviceReply::Diagnosis { status, confidence }))
}

fn parse_diagnosis(s: &str) -> IResult<&str, DeviceReply> {
    // once the marker is seen, the RESULT format is not considered
    preceded(locate("DIAGNOSIS:"), cut(diagnosis_body))(s)
}

fn result_body(s: &str) -> IResult<&str, DeviceReply> {
    let (s, label) = take_till(|c: char| c == ',')(s)?;
    let (s, confidence) = opt(preceded(char(','), take_till(|c: char| c == ',')))(s)?;

    let label = label.trim();
    let status = if label.contains("FAULT") {
        Status::Fault
    } else {
        Status::Healthy
    };

    Ok((
        s,
        DeviceReply::Result {
            status,
            confidence: confidence.and_then(parse_confidence),
        },
    ))
}

fn parse_result(s: &str) -> IResult<&str, DeviceReply> {
    preceded(locate("RESULT:"), result_body)(s)
}

fn parse_rejected(s: &str) -> IResult<&str, DeviceReply> {
    let lower = s.to_ascii_lowercase();
    if REJECTIONS.iter().any(|r| lower.contains(r)) {
        Ok(("", DeviceReply::Rejected))
    } else {
        Err(nom::Err::Error(Error::new(s, ErrorKind::Tag)))
    }
}

fn parse_reply(s: &str) -> IResult<&str, DeviceReply> {
    alt((parse_diagnosis, parse_result, parse_rejected))(s)
}

impl FromStr for DeviceReply {
    type Err = Error<String>;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_reply(s).finish() {
            Ok((_remaining, reply)) => Ok(reply),
            Err(Error { input, code }) => Err(Error {
                input: input.to_string(),
                code,
            }),
        }
    }
}

/// Scan one line of device output. Returns `None` for anything that is not
/// a verdict; never fails.
pub fn parse_reply_line(line: &str) -> Option<Diagnosis> {
    let line = line.trim();
    DeviceReply::from_str(line)
        .ok()
        .map(|reply| reply.into_diagnosis(line))
}
