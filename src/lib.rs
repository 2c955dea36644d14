//! # epson-ctrl
//!
//! Read/write access to Epson printer firmware state through EPSON-CTRL,
//! the vendor command channel tunnelled inside SNMP object identifiers.
//!
//! The crate builds EPSON-CTRL request OIDs, decodes the replies and ST2
//! status messages, recovers unknown access keys and keeps the per-model
//! configuration registry. Sending SNMP datagrams is left to a
//! [`Transport`] implementation supplied by the caller.
//!
//! ## Quick Start
//!
//! ```no_run
//! use epson_ctrl::{Printer, Registry, SessionOptions, Transport};
//!
//! # fn snmp_session() -> Box<dyn Transport> { unimplemented!() }
//! let registry = Registry::builtin()?;
//! let mut printer = Printer::open(&registry, "XP-205", snmp_session(), SessionOptions::default())?;
//!
//! let status = printer.get_printer_status()?;
//! println!("{:?}", status.state);
//!
//! for level in printer.get_waste_ink_levels()? {
//!     println!("{}: {:.2}%", level.name, level.percent);
//! }
//! # Ok::<(), epson_ctrl::EpsonError>(())
//! ```

pub mod cipher;
pub mod device;
pub mod protocol;
pub mod recovery;
pub mod registry;
pub mod status;
pub mod transport;
pub mod types;

pub use device::{Printer, SessionOptions};
pub use protocol::{Address, Reply};
pub use recovery::{KeySpace, Progress, RecoveryOutcome};
pub use registry::{LoadMode, ModelConfig, Registry};
pub use status::{StatusField, StatusTag, StatusTree};
pub use transport::{Transport, TransportError};
pub use types::*;

/// Errors returned by the epson-ctrl crate.
#[derive(Debug, thiserror::Error)]
pub enum EpsonError {
    /// Model name (or alias) not present in the registry.
    #[error("Unknown printer model: {0}")]
    UnknownModel(String),

    /// Command identifier or payload cannot be encoded.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// EEPROM address does not fit the model's address width.
    #[error("EEPROM address {address:#06x} does not fit a {width} address")]
    InvalidAddress { address: u16, width: AddressWidth },

    /// A read round trip timed out after all retries.
    #[error("Timed out waiting for the printer")]
    Timeout,

    /// A write round trip timed out. Writes are never retried automatically.
    #[error("Timed out writing {value:#04x} to EEPROM address {address:#06x}; the write may or may not have been applied")]
    WriteTimeout { address: u16, value: u8 },

    /// A status buffer is inconsistent with its own declared lengths.
    #[error("Malformed status message: {0}")]
    MalformedStatus(String),

    /// The device explicitly refused the request (unsupported command, bad key, oversize).
    #[error("Printer rejected the request: {0}")]
    DeviceRejected(String),

    /// Key recovery exhausted its search space.
    #[error("No read key found in the searched key space")]
    KeyNotFound,

    /// The model record lacks key material or an address table the operation needs.
    #[error("Model configuration has no {0}")]
    MissingKey(&'static str),

    /// The operation needs real writes but the session is in dry-run mode.
    #[error("{0} cannot run in dry-run mode")]
    DryRunRefused(&'static str),

    /// Registry validation or loading failure.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Protocol-level error (unexpected reply, address echo mismatch).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transport failure other than a timeout.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An error raised while running a named facade operation.
    #[error("{operation}: {source}")]
    Operation {
        operation: &'static str,
        #[source]
        source: Box<EpsonError>,
    },
}

impl EpsonError {
    /// Attach the facade operation name. Already-attributed errors are kept as-is.
    pub fn context(self, operation: &'static str) -> Self {
        match self {
            Self::Operation { .. } => self,
            other => Self::Operation {
                operation,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error, with any operation context removed.
    pub fn root(&self) -> &EpsonError {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Name of the facade operation that failed, if attached.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Self::Operation { operation, .. } => Some(operation),
            _ => None,
        }
    }
}

impl From<TransportError> for EpsonError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => Self::Timeout,
            TransportError::TooBig => Self::DeviceRejected("tooBig".into()),
            TransportError::Other(msg) => Self::Transport(msg),
        }
    }
}
