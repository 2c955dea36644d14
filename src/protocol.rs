//! EPSON-CTRL wire protocol: OID layout, request builders, reply parsers.
//!
//! Pure functions with no I/O, usable with any transport.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::bytes::Regex;

use crate::types::{AddressWidth, ReadKey};
use crate::EpsonError;

// --- OID layout ---
pub const OID_ENTERPRISE: [u32; 6] = [1, 3, 6, 1, 4, 1];
pub const EPSON_ENTERPRISE: u32 = 1248;
pub const OID_PRV_CTRL: [u32; 7] = [1, 2, 2, 44, 1, 1, 2];
/// `1.3.6.1.4.1.1248.1.2.2.44.1.1.2.1`, the EPSON-CTRL command channel.
pub const CTRL_HEADER: [u32; 15] = [1, 3, 6, 1, 4, 1, 1248, 1, 2, 2, 44, 1, 1, 2, 1];

// --- Command identifiers ---
pub const CMD_EEPROM: [u8; 2] = *b"||";
pub const CMD_STATUS: [u8; 2] = *b"st";
pub const CMD_FIRMWARE: [u8; 2] = *b"vi";
pub const CMD_CARTRIDGES: [u8; 2] = *b"ia";

// --- EEPROM operation letters ---
pub const OP_READ: u8 = b'A';
pub const OP_WRITE: u8 = b'B';

// --- Reply framing ---
pub const REPLY_PREAMBLE: &[u8] = b"@BDC PS\r\n";
pub const REPLY_TERMINATOR: u8 = 0x0C;
/// Body of a reply that refuses the request (e.g. wrong read key).
pub const REPLY_NOT_AVAILABLE: &[u8] = b"NA";
/// Body of an acknowledged EEPROM write.
pub const REPLY_OK: &[u8] = b"OK";

/// Empirical ceiling on EPSON-CTRL queries per SNMP round trip.
pub const MAX_BATCH: usize = 10;

/// An SNMP object identifier: one request unit for the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(Vec<u32>);

impl Address {
    pub fn new(components: Vec<u32>) -> Self {
        Self(components)
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }

    /// Components following the EPSON-CTRL header, if this is a command address.
    pub fn ctrl_body(&self) -> Option<&[u32]> {
        self.0.strip_prefix(&CTRL_HEADER[..])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for c in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{c}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = EpsonError;

    fn from_str(s: &str) -> Result<Self, EpsonError> {
        s.trim_start_matches('.')
            .split('.')
            .map(|c| {
                c.parse::<u32>()
                    .map_err(|_| EpsonError::Protocol(format!("Malformed OID: {s}")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

/// The read/write marker triple the firmware derives from an operation letter:
/// the letter, its bitwise NOT, and the letter rotated right by one bit.
pub fn operation_marker(op: u8) -> [u8; 3] {
    [op, !op, op.rotate_right(1)]
}

/// Split an EEPROM address into its two wire components (low, extension),
/// rejecting addresses the model cannot represent.
pub fn eeprom_address_bytes(address: u16, width: AddressWidth) -> Result<[u8; 2], EpsonError> {
    if address > width.max_address() {
        return Err(EpsonError::InvalidAddress { address, width });
    }
    Ok(address.to_le_bytes())
}

fn validate_command_id(id: &[u8]) -> Result<[u8; 2], EpsonError> {
    match id {
        [a, b] if a.is_ascii_graphic() && b.is_ascii_graphic() => Ok([*a, *b]),
        _ => Err(EpsonError::InvalidCommand(format!(
            "command identifier must be two printable bytes, got {:02x?}",
            id
        ))),
    }
}

/// Build a generic EPSON-CTRL command address:
/// header, identifier, little-endian payload length, payload.
pub fn encode_command(id: &[u8], payload: &[u8]) -> Result<Address, EpsonError> {
    let id = validate_command_id(id)?;
    let len = u16::try_from(payload.len()).map_err(|_| {
        EpsonError::InvalidCommand(format!("payload of {} bytes is too long", payload.len()))
    })?;

    let mut oid = Vec::with_capacity(CTRL_HEADER.len() + 4 + payload.len());
    oid.extend_from_slice(&CTRL_HEADER);
    oid.extend(id.iter().map(|&b| b as u32));
    oid.extend(len.to_le_bytes().iter().map(|&b| b as u32));
    oid.extend(payload.iter().map(|&b| b as u32));
    Ok(Address(oid))
}

/// Build the address reading one EEPROM byte.
///
/// Body: `124 124 <len> 0 <key0> <key1> 65 190 160 <addr-lo> <addr-ext>`.
pub fn encode_eeprom_read(
    address: u16,
    width: AddressWidth,
    read_key: ReadKey,
) -> Result<Address, EpsonError> {
    let mut payload = Vec::with_capacity(7);
    payload.extend_from_slice(&read_key.0);
    payload.extend_from_slice(&operation_marker(OP_READ));
    payload.extend_from_slice(&eeprom_address_bytes(address, width)?);
    encode_command(&CMD_EEPROM, &payload)
}

/// Build the address writing one EEPROM byte. `write_key` is appended verbatim,
/// so it must already be in wire form.
pub fn encode_eeprom_write(
    address: u16,
    value: u8,
    width: AddressWidth,
    read_key: ReadKey,
    write_key: &[u8; 8],
) -> Result<Address, EpsonError> {
    let mut payload = Vec::with_capacity(16);
    payload.extend_from_slice(&read_key.0);
    payload.extend_from_slice(&operation_marker(OP_WRITE));
    payload.extend_from_slice(&eeprom_address_bytes(address, width)?);
    payload.push(value);
    payload.extend_from_slice(write_key);
    encode_command(&CMD_EEPROM, &payload)
}

/// A generic command decoded back out of an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub id: [u8; 2],
    pub payload: Vec<u8>,
}

/// Inverse of [`encode_command`]. `None` if the address is not a
/// well-formed EPSON-CTRL command.
pub fn decode_command_request(address: &Address) -> Option<CommandRequest> {
    let body = address.ctrl_body()?;
    let bytes = body
        .iter()
        .map(|&c| u8::try_from(c).ok())
        .collect::<Option<Vec<u8>>>()?;
    if bytes.len() < 4 {
        return None;
    }
    let len = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
    let payload = &bytes[4..];
    if payload.len() != len {
        return None;
    }
    Some(CommandRequest {
        id: [bytes[0], bytes[1]],
        payload: payload.to_vec(),
    })
}

/// EEPROM operation decoded from a request address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EepromOp {
    Read,
    Write { value: u8, write_key: [u8; 8] },
}

/// EEPROM request decoded from an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EepromRequest {
    pub address: u16,
    pub read_key: ReadKey,
    pub op: EepromOp,
}

/// Inverse of [`encode_eeprom_read`] / [`encode_eeprom_write`].
pub fn decode_eeprom_request(address: &Address) -> Option<EepromRequest> {
    let cmd = decode_command_request(address)?;
    if cmd.id != CMD_EEPROM {
        return None;
    }
    let p = &cmd.payload;
    if p.len() < 7 {
        return None;
    }
    let read_key = ReadKey([p[0], p[1]]);
    let eeprom = u16::from_le_bytes([p[5], p[6]]);
    let marker = [p[2], p[3], p[4]];

    let op = if marker == operation_marker(OP_READ) && p.len() == 7 {
        EepromOp::Read
    } else if marker == operation_marker(OP_WRITE) && p.len() == 16 {
        let mut write_key = [0u8; 8];
        write_key.copy_from_slice(&p[8..16]);
        EepromOp::Write {
            value: p[7],
            write_key,
        }
    } else {
        return None;
    };

    Some(EepromRequest {
        address: eeprom,
        read_key,
        op,
    })
}

/// Value read back from an EEPROM request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EepromReply {
    pub address: u16,
    pub value: u8,
}

/// Reply to a generic command: the echoed identifier and the reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub id: [u8; 2],
    pub body: Vec<u8>,
}

impl CommandReply {
    /// `<id>:;`: the device does not implement the command.
    pub fn is_unsupported(&self) -> bool {
        self.body.is_empty()
    }

    /// `<id>:NA;`: the device refused the request.
    pub fn is_not_available(&self) -> bool {
        self.body == REPLY_NOT_AVAILABLE
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The raw indication as the device sent it.
    pub fn indication(&self) -> String {
        format!(
            "{}:{};",
            String::from_utf8_lossy(&self.id),
            String::from_utf8_lossy(&self.body)
        )
    }
}

/// Decoded EPSON-CTRL reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Eeprom(EepromReply),
    Command(CommandReply),
}

static EEPROM_REPLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"EE:([0-9A-F]{4})([0-9A-F]{2})").expect("static regex"));

static COMMAND_REPLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s-u)^([\x21-\x7E]{2}):(.*);").expect("static regex"));

/// Strip the optional NUL and `@BDC PS\r\n` preamble from a reply.
pub fn strip_preamble(raw: &[u8]) -> &[u8] {
    let raw = raw.strip_prefix(&[0u8][..]).unwrap_or(raw);
    raw.strip_prefix(REPLY_PREAMBLE).unwrap_or(raw)
}

fn hex_value(digits: &[u8]) -> Option<u16> {
    u16::from_str_radix(std::str::from_utf8(digits).ok()?, 16).ok()
}

/// Decode an EPSON-CTRL reply into an EEPROM value or a command echo.
pub fn decode_response(raw: &[u8]) -> Result<Reply, EpsonError> {
    let body = strip_preamble(raw);

    if let Some(caps) = EEPROM_REPLY.captures(body) {
        let address = hex_value(&caps[1]);
        let value = hex_value(&caps[2]);
        if let (Some(address), Some(value)) = (address, value) {
            return Ok(Reply::Eeprom(EepromReply {
                address,
                value: value as u8,
            }));
        }
    }

    if let Some(caps) = COMMAND_REPLY.captures(body) {
        let id = &caps[1];
        return Ok(Reply::Command(CommandReply {
            id: [id[0], id[1]],
            body: caps[2].to_vec(),
        }));
    }

    Err(EpsonError::Protocol(format!(
        "Unrecognised reply: {}",
        hex::encode(raw)
    )))
}

/// Extract the body of a command reply, checking the echoed identifier.
///
/// Unsupported (`id:;`) and refused (`id:NA;`) replies become
/// [`EpsonError::DeviceRejected`] carrying the raw indication.
pub fn command_body(raw: &[u8], id: [u8; 2]) -> Result<Vec<u8>, EpsonError> {
    match decode_response(raw)? {
        Reply::Command(reply) if reply.id.eq_ignore_ascii_case(&id) => {
            if reply.is_unsupported() || reply.is_not_available() {
                Err(EpsonError::DeviceRejected(reply.indication()))
            } else {
                Ok(reply.body)
            }
        }
        Reply::Command(reply) => Err(EpsonError::Protocol(format!(
            "Reply echoes {:?} instead of {:?}",
            String::from_utf8_lossy(&reply.id),
            String::from_utf8_lossy(&id)
        ))),
        Reply::Eeprom(_) => Err(EpsonError::Protocol(
            "EEPROM reply to a generic command".into(),
        )),
    }
}

/// Parse the `vi` reply body (`00:XXYYZZ...`) into the six-character code.
pub fn parse_firmware_code(body: &[u8]) -> Result<String, EpsonError> {
    let text = String::from_utf8_lossy(body);
    let code = text
        .split(':')
        .nth(1)
        .map(|s| s.trim_end_matches(';'))
        .filter(|s| s.len() >= 6 && s.is_char_boundary(6))
        .map(|s| s[..6].to_string())
        .ok_or_else(|| EpsonError::Protocol(format!("Malformed firmware reply: {text:?}")))?;
    Ok(code)
}

/// Parse the `ia` reply body (`00;a,b,c`) into cartridge names.
pub fn parse_cartridges(body: &[u8]) -> Result<Vec<String>, EpsonError> {
    let text = String::from_utf8_lossy(body);
    let (_, list) = text
        .split_once(';')
        .ok_or_else(|| EpsonError::Protocol(format!("Malformed cartridge reply: {text:?}")))?;
    let list = list.split(';').next().unwrap_or("");
    Ok(list
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}
