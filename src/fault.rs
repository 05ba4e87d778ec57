//! The motor conditions in the acoustic dataset, keyed by the two-letter
//! codes used in its file names.

use crate::diagnosis::{Label, Status};

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// One motor condition.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultType {
    Healthy,
    StatorWinding,
    RotorUnbalance,
    RotorMisalignment,
    VoltageUnbalance,
    BowedRotor,
    BrokenRotorBars,
    FaultyBearings,
    /// The bearing recordings also appear under the `R_B` code.
    FaultyBearingsAlt,
}

impl FaultType {
    /// Every condition, in the order the probe session walks them.
    pub const ALL: [FaultType; 9] = [
        FaultType::Healthy,
        FaultType::StatorWinding,
        FaultType::RotorUnbalance,
        FaultType::RotorMisalignment,
        FaultType::VoltageUnbalance,
        FaultType::BowedRotor,
        FaultType::BrokenRotorBars,
        FaultType::FaultyBearings,
        FaultType::FaultyBearingsAlt,
    ];

    /// The code used in recording file names.
    pub fn code(self) -> &'static str {
        match self {
            FaultType::Healthy => "H_H",
            FaultType::StatorWinding => "S_W",
            FaultType::RotorUnbalance => "R_U",
            FaultType::RotorMisalignment => "R_M",
            FaultType::VoltageUnbalance => "V_U",
            FaultType::BowedRotor => "B_R",
            FaultType::BrokenRotorBars => "K_A",
            FaultType::FaultyBearings => "F_B",
            FaultType::FaultyBearingsAlt => "R_B",
        }
    }

    /// A readable name.
    pub fn description(self) -> &'static str {
        match self {
            FaultType::Healthy => "Healthy",
            FaultType::StatorWinding => "Stator Winding Fault",
            FaultType::RotorUnbalance => "Rotor Unbalance",
            FaultType::RotorMisalignment => "Rotor Misalignment",
            FaultType::VoltageUnbalance => "Voltage Unbalance",
            FaultType::BowedRotor => "Bowed Rotor",
            FaultType::BrokenRotorBars => "Broken Rotor Bars",
            FaultType::FaultyBearings | FaultType::FaultyBearingsAlt => "Faulty Bearings",
        }
    }

    /// The binary class the model should put this condition in.
    pub fn expected_label(self) -> Label {
        match self {
            FaultType::Healthy => Label::Healthy,
            _ => Label::Fault,
        }
    }

    /// The verdict the device should print for this condition.
    pub fn expected_status(self) -> Status {
        match self.expected_label() {
            Label::Healthy => Status::Healthy,
            Label::Fault => Status::Fault,
        }
    }
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}

/// Returned for a code that names no known condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFaultCode(pub String);

impl fmt::Display for UnknownFaultCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown fault code '{}'", self.0)
    }
}

impl std::error::Error for UnknownFaultCode {}

impl FromStr for FaultType {
    type Err = UnknownFaultCode;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        FaultType::ALL
            .iter()
            .copied()
            .find(|f| f.code() == code)
            .ok_or_else(|| UnknownFaultCode(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_parsing() {
        for fault in FaultType::ALL {
            assert_eq!(fault.code().parse::<FaultType>(), Ok(fault));
        }
        assert_eq!("k_a".parse::<FaultType>(), Ok(FaultType::BrokenRotorBars));
        assert!("X_X".parse::<FaultType>().is_err());
    }

    #[test]
    fn only_healthy_is_healthy() {
        let healthy: Vec<_> = FaultType::ALL
            .iter()
            .filter(|f| f.expected_label() == Label::Healthy)
            .collect();
        assert_eq!(healthy, vec![&FaultType::Healthy]);
        assert_eq!(FaultType::FaultyBearingsAlt.expected_status(), Status::Fault);
    }
}
