// src/gcode.rs - G-code commands understood by the Shui firmware
use std::fmt;

/// Line terminator the firmware expects after every command.
pub const LINE_TERMINATOR: &str = "\n\r";

/// A single G-code command line sent to the printer.
#[derive(Debug, Clone, PartialEq)]
pub enum GCode {
    /// `M27`: report SD print status (also echoes temperatures).
    SdPrintStatus,
    /// `M300`: play a tone so the printer can be located.
    Beep,
    /// `M140 S<celsius>`: set the heated bed target.
    SetBedTarget(f64),
    /// `M104 T<tool> S<celsius>`: set an extruder target.
    SetExtruderTarget { tool: u8, celsius: f64 },
    /// Anything else, passed through verbatim.
    Raw(String),
}

impl GCode {
    /// Target for the first (and on the Bluer, only) extruder.
    pub fn set_extruder0_target(celsius: f64) -> Self {
        GCode::SetExtruderTarget { tool: 0, celsius }
    }

    /// The command mnemonic, e.g. `M140`.
    pub fn mnemonic(&self) -> &str {
        match self {
            GCode::SdPrintStatus => "M27",
            GCode::Beep => "M300",
            GCode::SetBedTarget(_) => "M140",
            GCode::SetExtruderTarget { .. } => "M104",
            GCode::Raw(line) => line.split_whitespace().next().unwrap_or(""),
        }
    }

    /// Full wire line including the terminator.
    pub fn to_wire(&self) -> String {
        format!("{}{}", self, LINE_TERMINATOR)
    }
}

impl fmt::Display for GCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GCode::SdPrintStatus | GCode::Beep => f.write_str(self.mnemonic()),
            GCode::SetBedTarget(celsius) => write!(f, "M140 S{}", celsius),
            GCode::SetExtruderTarget { tool, celsius } => write!(f, "M104 T{} S{}", tool, celsius),
            GCode::Raw(line) => f.write_str(line.trim()),
        }
    }
}

impl From<&str> for GCode {
    fn from(line: &str) -> Self {
        match line.trim() {
            "M27" => GCode::SdPrintStatus,
            "M300" => GCode::Beep,
            other => GCode::Raw(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_degrees_have_no_fraction() {
        assert_eq!(GCode::SetBedTarget(65.0).to_string(), "M140 S65");
        assert_eq!(GCode::set_extruder0_target(210.0).to_string(), "M104 T0 S210");
    }

    #[test]
    fn test_fractional_degrees_are_kept() {
        assert_eq!(GCode::SetBedTarget(60.5).to_string(), "M140 S60.5");
    }

    #[test]
    fn test_wire_line_uses_firmware_terminator() {
        assert_eq!(GCode::SdPrintStatus.to_wire(), "M27\n\r");
        assert_eq!(GCode::Beep.to_wire(), "M300\n\r");
    }

    #[test]
    fn test_raw_commands() {
        let cmd = GCode::from("  M105  ");
        assert_eq!(cmd, GCode::Raw("M105".to_string()));
        assert_eq!(cmd.mnemonic(), "M105");
        assert_eq!(GCode::from("M27"), GCode::SdPrintStatus);
    }
}
