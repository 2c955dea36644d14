use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::cipher;
use crate::protocol::Address;
use crate::EpsonError;

/// Two-byte key gating EEPROM reads, sent as-is on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadKey(pub [u8; 2]);

impl ReadKey {
    /// Key whose numeric value is `value`: first byte high, second byte low.
    pub fn from_u16(value: u16) -> Self {
        Self(value.to_be_bytes())
    }

    /// Numeric value used to order candidates during key recovery.
    pub fn to_u16(self) -> u16 {
        u16::from_be_bytes(self.0)
    }
}

impl fmt::Display for ReadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.0[0], self.0[1])
    }
}

/// Eight-byte key gating EEPROM writes.
///
/// Holds the human-readable label (e.g. `Gossypiu`). The wire form is the
/// label passed through [`cipher::obfuscate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WriteKey([u8; 8]);

impl WriteKey {
    pub const LEN: usize = 8;

    pub fn new(label: [u8; 8]) -> Self {
        Self(label)
    }

    /// Recover the label from a key captured off the wire.
    pub fn from_wire(wire: [u8; 8]) -> Self {
        let mut label = [0u8; 8];
        label.copy_from_slice(&cipher::deobfuscate(&wire));
        Self(label)
    }

    pub fn label(&self) -> &[u8; 8] {
        &self.0
    }

    /// Bytes appended to an EEPROM write request.
    pub fn to_wire(&self) -> [u8; 8] {
        let mut wire = [0u8; 8];
        wire.copy_from_slice(&cipher::obfuscate(&self.0));
        wire
    }
}

impl TryFrom<&[u8]> for WriteKey {
    type Error = EpsonError;

    fn try_from(label: &[u8]) -> Result<Self, EpsonError> {
        let bytes: [u8; 8] = label.try_into().map_err(|_| {
            EpsonError::Registry(format!(
                "write key must be {} bytes, got {}",
                Self::LEN,
                label.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for WriteKey {
    type Error = EpsonError;

    fn try_from(label: String) -> Result<Self, EpsonError> {
        Self::try_from(label.as_bytes())
    }
}

impl From<WriteKey> for String {
    fn from(key: WriteKey) -> String {
        String::from_utf8_lossy(&key.0).into_owned()
    }
}

impl fmt::Display for WriteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// How many EEPROM address bytes a model understands.
///
/// The wire always carries two components (low byte, extension byte); a
/// one-byte model only accepts addresses whose extension byte is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AddressWidth {
    #[default]
    OneByte,
    TwoBytes,
}

impl AddressWidth {
    pub fn max_address(self) -> u16 {
        match self {
            Self::OneByte => 0xFF,
            Self::TwoBytes => 0xFFFF,
        }
    }
}

impl TryFrom<u8> for AddressWidth {
    type Error = String;
    fn try_from(v: u8) -> Result<Self, String> {
        match v {
            1 => Ok(Self::OneByte),
            2 => Ok(Self::TwoBytes),
            _ => Err(format!("address width must be 1 or 2, got {v}")),
        }
    }
}

impl From<AddressWidth> for u8 {
    fn from(w: AddressWidth) -> u8 {
        match w {
            AddressWidth::OneByte => 1,
            AddressWidth::TwoBytes => 2,
        }
    }
}

impl fmt::Display for AddressWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-byte", u8::from(*self))
    }
}

/// Result of an EEPROM write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The device acknowledged the write.
    Written,
    /// Dry-run mode: the request was built and logged but never sent.
    DryRun(Address),
}

/// Waste ink pad fill level.
#[derive(Debug, Clone, PartialEq)]
pub struct WasteLevel {
    /// Counter name from the model record (e.g. `main`, `borderless`).
    pub name: String,
    /// Raw little-endian counter value.
    pub raw: u32,
    /// Fill percentage, rounded to two decimals.
    pub percent: f64,
}

/// One ink replacement counter entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InkReplacementCounter {
    pub colour: String,
    pub counter: String,
    pub value: u8,
}

/// Firmware identifier as reported by the `vi` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVersion {
    /// Six-character firmware code (e.g. `RF16M4`).
    pub code: String,
    /// Build date encoded in the code, when it decodes to a valid date.
    pub date: Option<NaiveDate>,
}

/// Printer state reported by the ST2 status tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterState {
    pub code: u8,
    pub text: String,
    /// Waiting or idle.
    pub ready: bool,
}

/// Ink cartridge level from the ink information tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InkLevel {
    pub colour_code: u8,
    pub name: String,
    pub level: u8,
}

/// Maintenance box fill state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxState {
    NotFull,
    NearFull,
    Full,
    Unknown(u8),
}

impl From<u8> for BoxState {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::NotFull,
            1 => Self::NearFull,
            2 => Self::Full,
            other => Self::Unknown(other),
        }
    }
}

/// One maintenance box entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceBox {
    pub state: BoxState,
    pub level: u8,
}

/// Semantic view of an ST2 status message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrinterStatus {
    pub state: Option<PrinterState>,
    pub error_code: Option<Vec<u8>>,
    pub self_print_code: Option<Vec<u8>>,
    pub warning_code: Option<Vec<u8>>,
    pub paper_path: Option<String>,
    /// Replace-cartridge bitmap rendered as eight binary digits.
    pub replace_cartridge: Option<String>,
    pub loading_path: Option<String>,
    pub cancel_code: Option<String>,
    pub job_name: Option<String>,
    pub serial_number: Option<String>,
    pub inks: Vec<InkLevel>,
    pub maintenance_tanks: Option<(u8, u8)>,
    pub maintenance_boxes: Vec<MaintenanceBox>,
    /// Tags without a known interpretation, in wire order.
    pub unknown: Vec<(u8, Vec<u8>)>,
}
