//! OBD-II PID Definitions and Descriptor Table
//!
//! Each Mode 01 PID is described by a small immutable record: how many data
//! bytes the response carries and the linear scaling that turns the packed
//! integer into a physical value. The table is loaded once and shared
//! read-only by every decode call.

use crate::error::PidTableError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Standard OBD-II PIDs for Mode 01 (current data) known out of the box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pid {
    /// PIDs supported 01-20 (0x00)
    SupportedPids = 0x00,
    /// Monitor status since DTCs cleared (0x01)
    MonitorStatus = 0x01,
    /// DTC that caused the freeze frame (0x02)
    FreezeDtc = 0x02,
    /// Fuel system status (0x03)
    FuelSystemStatus = 0x03,
    /// Calculated engine load (0x04)
    EngineLoad = 0x04,
    /// Engine coolant temperature (0x05)
    CoolantTemp = 0x05,
    /// Short-term fuel trim bank 1 (0x06)
    ShortFuelTrimBank1 = 0x06,
    /// Long-term fuel trim bank 1 (0x07)
    LongFuelTrimBank1 = 0x07,
    /// Short-term fuel trim bank 2 (0x08)
    ShortFuelTrimBank2 = 0x08,
    /// Long-term fuel trim bank 2 (0x09)
    LongFuelTrimBank2 = 0x09,
    /// Fuel pressure (0x0A)
    FuelPressure = 0x0A,
    /// Intake manifold absolute pressure (0x0B)
    IntakeManifoldPressure = 0x0B,
    /// Engine RPM (0x0C)
    Rpm = 0x0C,
    /// Vehicle speed (0x0D)
    Speed = 0x0D,
    /// Timing advance (0x0E)
    TimingAdvance = 0x0E,
    /// Intake air temperature (0x0F)
    IntakeAirTemp = 0x0F,
    /// Mass air flow rate (0x10)
    Maf = 0x10,
    /// Throttle position (0x11)
    ThrottlePosition = 0x11,
}

impl Pid {
    /// Every PID with a built-in descriptor
    pub const ALL: [Pid; 18] = [
        Pid::SupportedPids,
        Pid::MonitorStatus,
        Pid::FreezeDtc,
        Pid::FuelSystemStatus,
        Pid::EngineLoad,
        Pid::CoolantTemp,
        Pid::ShortFuelTrimBank1,
        Pid::LongFuelTrimBank1,
        Pid::ShortFuelTrimBank2,
        Pid::LongFuelTrimBank2,
        Pid::FuelPressure,
        Pid::IntakeManifoldPressure,
        Pid::Rpm,
        Pid::Speed,
        Pid::TimingAdvance,
        Pid::IntakeAirTemp,
        Pid::Maf,
        Pid::ThrottlePosition,
    ];

    /// Get the PID hex value
    pub fn as_hex(&self) -> u8 {
        *self as u8
    }

    /// Get the number of response data bytes for this PID
    pub fn response_bytes(&self) -> u8 {
        match self {
            Pid::SupportedPids | Pid::MonitorStatus => 4,
            Pid::FreezeDtc | Pid::FuelSystemStatus | Pid::Rpm | Pid::Maf => 2,
            _ => 1,
        }
    }

    /// Built-in descriptor row for this PID
    pub fn descriptor(&self) -> PidDescriptor {
        let (multiplier, offset, description) = match self {
            Pid::SupportedPids => (1.0, 0.0, "PIDs supported (bits)"),
            Pid::MonitorStatus => (1.0, 0.0, "Status since DTCC (bits)"),
            Pid::FreezeDtc => (1.0, 0.0, "Freeze DTC (bits)"),
            Pid::FuelSystemStatus => (1.0, 0.0, "Fuel System Status (bits)"),
            // A * 100 / 255 (%)
            Pid::EngineLoad => (100.0 / 255.0, 0.0, "Engine Load"),
            // A - 40 (°C)
            Pid::CoolantTemp => (1.0, -40.0, "Coolant Temp"),
            // A * 100 / 128 - 100 (%)
            Pid::ShortFuelTrimBank1 => (100.0 / 128.0, -100.0, "Short Term Fuel Trim Bk 1"),
            Pid::LongFuelTrimBank1 => (100.0 / 128.0, -100.0, "Long Term Fuel Trim Bk 1"),
            Pid::ShortFuelTrimBank2 => (100.0 / 128.0, -100.0, "Short Term Fuel Trim Bk 2"),
            Pid::LongFuelTrimBank2 => (100.0 / 128.0, -100.0, "Long Term Fuel Trim Bk 2"),
            // A * 3 (kPa)
            Pid::FuelPressure => (3.0, 0.0, "Fuel Pressure kPa"),
            Pid::IntakeManifoldPressure => (1.0, 0.0, "Intake Manifold Absolute Pressure kPa"),
            // ((A*256)+B)/4
            Pid::Rpm => (0.25, 0.0, "Engine RPM"),
            Pid::Speed => (1.0, 0.0, "Speed km/h"),
            // A / 2 - 64 (° before TDC)
            Pid::TimingAdvance => (0.5, -64.0, "Timing Advance deg before TDC"),
            Pid::IntakeAirTemp => (1.0, -40.0, "Intake Air Temp"),
            // ((A*256)+B) / 100 (g/s)
            Pid::Maf => (0.01, 0.0, "Mass airflow g/s"),
            Pid::ThrottlePosition => (100.0 / 255.0, 0.0, "Throttle pos"),
        };

        PidDescriptor {
            pid: self.as_hex(),
            byte_width: self.response_bytes(),
            multiplier,
            offset,
            description: description.to_string(),
        }
    }
}

/// Build the Mode 01 request for a PID: "01" followed by two uppercase hex digits
pub fn mode01_request(pid: u8) -> String {
    format!("{:02}{:02X}", crate::mode::CURRENT_DATA, pid)
}

/// One row of the PID descriptor table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidDescriptor {
    /// PID identifier
    pub pid: u8,
    /// Data bytes in the response (1, 2 or 4)
    #[serde(alias = "bytes")]
    pub byte_width: u8,
    /// Scale applied to the packed integer
    pub multiplier: f64,
    /// Added after scaling
    pub offset: f64,
    /// Human readable description
    pub description: String,
}

impl PidDescriptor {
    /// Apply the linear scaling to a packed raw value
    pub fn scale(&self, raw: u32) -> f64 {
        f64::from(raw) * self.multiplier + self.offset
    }
}

/// Read-only lookup table from PID identifier to descriptor
#[derive(Debug, Clone, Default)]
pub struct PidTable {
    rows: HashMap<u8, PidDescriptor>,
}

impl PidTable {
    /// Table with the built-in descriptors for PIDs 0x00-0x11
    pub fn standard() -> Self {
        let rows = Pid::ALL
            .iter()
            .map(|pid| (pid.as_hex(), pid.descriptor()))
            .collect();
        Self { rows }
    }

    /// Build a table from descriptor rows, rejecting bad widths and duplicates
    pub fn from_descriptors<I>(descriptors: I) -> Result<Self, PidTableError>
    where
        I: IntoIterator<Item = PidDescriptor>,
    {
        let mut rows = HashMap::new();
        for row in descriptors {
            if !matches!(row.byte_width, 1 | 2 | 4) {
                return Err(PidTableError::InvalidWidth {
                    pid: row.pid,
                    width: row.byte_width,
                });
            }
            let pid = row.pid;
            if rows.insert(pid, row).is_some() {
                return Err(PidTableError::Duplicate(pid));
            }
        }
        Ok(Self { rows })
    }

    /// Parse a JSON array of descriptor rows
    pub fn from_json_str(json: &str) -> Result<Self, PidTableError> {
        let descriptors: Vec<PidDescriptor> = serde_json::from_str(json)?;
        Self::from_descriptors(descriptors)
    }

    /// Load a JSON descriptor table from disk
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PidTableError> {
        let path = path.as_ref();
        info!("Loading PID table from {}", path.display());
        let json = std::fs::read_to_string(path)?;
        let table = Self::from_json_str(&json)?;
        debug!("Loaded {} PID descriptors", table.len());
        Ok(table)
    }

    /// Look up the descriptor for a PID
    pub fn lookup(&self, pid: u8) -> Option<&PidDescriptor> {
        self.rows.get(&pid)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
