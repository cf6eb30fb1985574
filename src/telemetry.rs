//! # Telemetry parsing
//!
//! The Shui firmware answers every command with free-form text: banner lines,
//! `ok` acknowledgements, a temperature report and, for `M27`, an SD status line.
//!
//! ```text
//! ok
//! T0:205.0 /210.0 B:60.2 /60.0 T0@:127 B@:0
//! SD printing byte 1200/4000
//! ```
//!
//! Parsing is best effort. A malformed line is reported in
//! [`TelemetryUpdate::errors`] and skipped; it never poisons the rest of the batch.

// src/telemetry.rs - Best-effort parser for the firmware's status text
use thiserror::Error;

const EXTRUDER_PREFIX: &str = "T0:";
const BED_PREFIX: &str = "B:";
const PRINTING_MARKER: &str = "SD printing byte";
const BUSY_MARKER: &str = "busy";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TelemetryError {
    #[error("invalid {field} value '{token}'")]
    InvalidNumber { field: &'static str, token: String },
    #[error("{field} reading has no target token")]
    MissingTarget { field: &'static str },
    #[error("print progress '{0}' is not of the form done/total")]
    MalformedProgress(String),
    #[error("print progress total is zero")]
    ZeroTotal,
}

/// Current and target temperature of one heater, in °C.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperaturePair {
    pub current: f64,
    pub target: f64,
}

/// Heater readings found on a single line.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TemperatureReading {
    pub extruder: Option<TemperaturePair>,
    pub bed: Option<TemperaturePair>,
}

impl TemperatureReading {
    pub fn is_empty(&self) -> bool {
        self.extruder.is_none() && self.bed.is_none()
    }
}

/// Print activity derived from a whole response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusReading {
    Idle,
    Busy,
    Printing { progress: f64 },
}

/// A line that could not be parsed, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct LineError {
    pub line: String,
    pub error: TelemetryError,
}

/// Everything one response batch says about the printer.
///
/// `None` fields mean "not reported" and must leave the previous value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryUpdate {
    pub extruder: Option<TemperaturePair>,
    pub bed: Option<TemperaturePair>,
    pub status: Option<StatusReading>,
    pub errors: Vec<LineError>,
}

/// Parse a full response batch.
pub fn parse_response<S: AsRef<str>>(lines: &[S]) -> TelemetryUpdate {
    let mut update = TelemetryUpdate::default();

    for line in lines {
        let line = line.as_ref();
        match parse_temperature_line(line) {
            Ok(reading) if reading.is_empty() => {}
            Ok(reading) => {
                // later reports win
                if reading.extruder.is_some() {
                    update.extruder = reading.extruder;
                }
                if reading.bed.is_some() {
                    update.bed = reading.bed;
                }
            }
            Err(error) => {
                tracing::debug!("Skipping temperature line '{}': {}", line, error);
                update.errors.push(LineError { line: line.to_string(), error });
            }
        }
    }

    match parse_print_status(lines) {
        Ok(status) => update.status = Some(status),
        Err((line, error)) => update.errors.push(LineError { line, error }),
    }

    update
}

/// Extract `T0:` and `B:` readings from one line.
///
/// A heater token is followed by its target token, e.g. `T0:205.0 /210.0`; the
/// target is whatever follows the last `/`.
pub fn parse_temperature_line(line: &str) -> Result<TemperatureReading, TelemetryError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let mut reading = TemperatureReading::default();

    for (i, token) in tokens.iter().enumerate() {
        if let Some(current) = token.strip_prefix(EXTRUDER_PREFIX) {
            reading.extruder = Some(parse_pair("extruder", current, tokens.get(i + 1).copied())?);
        } else if let Some(current) = token.strip_prefix(BED_PREFIX) {
            reading.bed = Some(parse_pair("bed", current, tokens.get(i + 1).copied())?);
        }
    }

    Ok(reading)
}

fn parse_pair(
    field: &'static str,
    current: &str,
    target_token: Option<&str>,
) -> Result<TemperaturePair, TelemetryError> {
    let current = parse_number(field, current)?;
    let target_token = target_token.ok_or(TelemetryError::MissingTarget { field })?;
    let target = target_token.rsplit('/').next().unwrap_or(target_token);
    let target = parse_number(field, target)?;
    Ok(TemperaturePair { current, target })
}

fn parse_number(field: &'static str, token: &str) -> Result<f64, TelemetryError> {
    token.parse::<f64>().map_err(|_| TelemetryError::InvalidNumber {
        field,
        token: token.to_string(),
    })
}

/// Scan lines in order; the first printing or busy marker decides.
///
/// On error the offending line is returned alongside the error.
pub fn parse_print_status<S: AsRef<str>>(lines: &[S]) -> Result<StatusReading, (String, TelemetryError)> {
    for line in lines {
        let line = line.as_ref();
        if line.contains(PRINTING_MARKER) {
            return parse_progress(line)
                .map(|progress| StatusReading::Printing { progress })
                .map_err(|e| (line.to_string(), e));
        }
        if line.contains(BUSY_MARKER) {
            return Ok(StatusReading::Busy);
        }
    }
    Ok(StatusReading::Idle)
}

/// Percentage from the trailing `done/total` token of an SD status line.
pub fn parse_progress(line: &str) -> Result<f64, TelemetryError> {
    let last = line.split_whitespace().last().unwrap_or("");
    let (done, total) = last
        .split_once('/')
        .ok_or_else(|| TelemetryError::MalformedProgress(last.to_string()))?;
    let done: f64 = done
        .parse()
        .map_err(|_| TelemetryError::MalformedProgress(last.to_string()))?;
    let total: f64 = total
        .parse()
        .map_err(|_| TelemetryError::MalformedProgress(last.to_string()))?;
    if total == 0.0 {
        return Err(TelemetryError::ZeroTotal);
    }
    Ok(done * 100.0 / total)
}
