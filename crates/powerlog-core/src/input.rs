//! Normalization of user-supplied usage readings
//!
//! Readings arrive as floating point kWh values (the form accepts decimals) and
//! are encrypted as `euint32`, so they are rounded to the nearest whole kWh.
//! The period is optional and defaults to 1.

use crate::PowerLogError;

/// Period used when none (or zero) is supplied
pub const DEFAULT_PERIOD: u32 = 1;

/// A validated reading ready for encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageReading {
    /// Whole kWh in the `u32` domain, never zero
    pub kwh: u32,
    pub period: u32,
}

impl UsageReading {
    /// Validate a reading and its optional period
    ///
    /// A missing or zero period becomes [`DEFAULT_PERIOD`]. Negative periods,
    /// non-finite or non-positive values, and values that round to zero or
    /// overflow `u32` are rejected.
    pub fn new(value: f64, period: Option<i64>) -> Result<Self, PowerLogError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(PowerLogError::invalid_input(
                "Please enter a valid power usage value (kWh)",
            ));
        }
        let rounded = value.round();
        if rounded < 1.0 {
            return Err(PowerLogError::invalid_input(format!(
                "Power usage {} kWh rounds to zero",
                value
            )));
        }
        if rounded > u32::MAX as f64 {
            return Err(PowerLogError::invalid_input(format!(
                "Power usage {} kWh exceeds the encrypted 32-bit range",
                value
            )));
        }

        let period = match period.unwrap_or(0) {
            0 => DEFAULT_PERIOD,
            p if p < 0 => {
                return Err(PowerLogError::invalid_input(format!(
                    "Period must be a positive integer, got {}",
                    p
                )))
            }
            p => u32::try_from(p).map_err(|_| {
                PowerLogError::invalid_input(format!("Period {} is out of range", p))
            })?,
        };

        Ok(Self {
            kwh: rounded as u32,
            period,
        })
    }

    /// Parse form-style text fields
    ///
    /// The value must parse as a number. The period follows the form's
    /// lenient rule: blank or unparseable text means "use the default".
    pub fn parse(value: &str, period: &str) -> Result<Self, PowerLogError> {
        let value: f64 = value.trim().parse().map_err(|_| {
            PowerLogError::invalid_input("Please enter a valid power usage value (kWh)")
        })?;
        let period = period.trim().parse::<i64>().ok();
        Self::new(value, period)
    }
}

/// Parse a strictly positive integer command argument
pub fn parse_positive_integer(name: &str, raw: &str) -> Result<u64, PowerLogError> {
    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(PowerLogError::invalid_input(format!(
            "Argument --{} must be a positive integer",
            name
        ))),
    }
}
