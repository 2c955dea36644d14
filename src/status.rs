//! ST2 status message decoding.
//!
//! An ST2 reply is `\0@BDC ST2\r\n`, a little-endian u16 body length, then a
//! run of tag/length/value fields. [`decode`] walks that structure into a
//! [`StatusTree`] without interpreting it beyond the per-tag layouts below;
//! [`interpret`] turns a tree into a [`PrinterStatus`].

use std::collections::BTreeSet;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::types::{InkLevel, MaintenanceBox, PrinterState, PrinterStatus};
use crate::EpsonError;

pub const ST2_SIGNATURE: &[u8] = b"\x00@BDC ST2\r\n";
/// Signature plus the two length bytes.
pub const ST2_HEADER_LEN: usize = ST2_SIGNATURE.len() + 2;

/// Known ST2 field tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum StatusTag {
    Status = 0x01,
    ErrorCode = 0x02,
    SelfPrintCode = 0x03,
    Warning = 0x04,
    PaperPath = 0x06,
    MaintenanceTanks = 0x0D,
    ReplaceCartridge = 0x0E,
    InkInfo = 0x0F,
    LoadingPath = 0x10,
    CancelCode = 0x13,
    JobName = 0x19,
    SerialNumber = 0x1F,
    JamInfo = 0x35,
    PaperCount = 0x36,
    MaintenanceBox = 0x37,
}

impl StatusTag {
    pub const ALL: [StatusTag; 15] = [
        Self::Status,
        Self::ErrorCode,
        Self::SelfPrintCode,
        Self::Warning,
        Self::PaperPath,
        Self::MaintenanceTanks,
        Self::ReplaceCartridge,
        Self::InkInfo,
        Self::LoadingPath,
        Self::CancelCode,
        Self::JobName,
        Self::SerialNumber,
        Self::JamInfo,
        Self::PaperCount,
        Self::MaintenanceBox,
    ];
}

/// How a field's length is encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthPolicy {
    U8,
    U16Le,
}

impl LengthPolicy {
    fn width(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16Le => 2,
        }
    }
}

/// Which tags a model lets the decoder interpret, and which use wide lengths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagTable {
    supported: BTreeSet<u8>,
    wide: BTreeSet<u8>,
}

impl TagTable {
    pub fn new(supported: &[u8], wide: &[u8]) -> Self {
        Self {
            supported: supported.iter().copied().collect(),
            wide: wide.iter().copied().collect(),
        }
    }

    /// Every known tag, all with one-byte lengths.
    pub fn all_known() -> Self {
        let known: Vec<u8> = StatusTag::ALL.iter().map(|&t| u8::from(t)).collect();
        Self::new(&known, &[])
    }

    pub fn is_supported(&self, tag: u8) -> bool {
        self.supported.contains(&tag)
    }

    pub fn length_policy(&self, tag: u8) -> LengthPolicy {
        if self.wide.contains(&tag) {
            LengthPolicy::U16Le
        } else {
            LengthPolicy::U8
        }
    }
}

impl Default for TagTable {
    fn default() -> Self {
        Self::all_known()
    }
}

/// Typed value of a field whose layout is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(u64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<StatusField>),
}

/// A field value: parsed when the tag is supported and its layout known,
/// otherwise the raw bytes verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Parsed(Value),
    Opaque(Vec<u8>),
}

/// One decoded tag/length/value entry.
///
/// Inside composite fields, `tag` is the record code (colour id for ink
/// records, fill state for maintenance boxes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusField {
    pub tag: u8,
    pub length: usize,
    pub value: FieldValue,
}

impl StatusField {
    pub fn known_tag(&self) -> Option<StatusTag> {
        StatusTag::try_from(self.tag).ok()
    }

    pub fn parsed(&self) -> Option<&Value> {
        match &self.value {
            FieldValue::Parsed(v) => Some(v),
            FieldValue::Opaque(_) => None,
        }
    }
}

/// Decoded fields in wire order. Duplicate tags are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusTree {
    pub fields: Vec<StatusField>,
    /// Total bytes of tag/length/value entries, excluding the message header.
    pub body_len: usize,
}

impl StatusTree {
    pub fn iter(&self) -> impl Iterator<Item = &StatusField> {
        self.fields.iter()
    }

    pub fn find(&self, tag: StatusTag) -> Option<&StatusField> {
        let tag = u8::from(tag);
        self.fields.iter().find(|f| f.tag == tag)
    }

    pub fn find_all(&self, tag: StatusTag) -> impl Iterator<Item = &StatusField> {
        let tag = u8::from(tag);
        self.fields.iter().filter(move |f| f.tag == tag)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn malformed(msg: impl Into<String>) -> EpsonError {
    EpsonError::MalformedStatus(msg.into())
}

/// Decode a full ST2 message.
pub fn decode(raw: &[u8], tags: &TagTable) -> Result<StatusTree, EpsonError> {
    let rest = raw
        .strip_prefix(ST2_SIGNATURE)
        .ok_or_else(|| malformed("missing ST2 signature"))?;
    if rest.len() < 2 {
        return Err(malformed("truncated ST2 length"));
    }
    let declared = u16::from_le_bytes([rest[0], rest[1]]) as usize;
    let body = &rest[2..];
    if body.len() != declared {
        return Err(malformed(format!(
            "ST2 declares {declared} body bytes, buffer holds {}",
            body.len()
        )));
    }
    let fields = decode_fields(body, tags)?;
    Ok(StatusTree {
        fields,
        body_len: body.len(),
    })
}

/// Decode a bare run of tag/length/value entries (no ST2 header).
pub fn decode_fields(mut buf: &[u8], tags: &TagTable) -> Result<Vec<StatusField>, EpsonError> {
    let mut fields = Vec::new();
    while !buf.is_empty() {
        let tag = buf[0];
        let policy = tags.length_policy(tag);
        let header = 1 + policy.width();
        if buf.len() < header {
            return Err(malformed(format!("truncated header for tag {tag:#04x}")));
        }
        let length = match policy {
            LengthPolicy::U8 => buf[1] as usize,
            LengthPolicy::U16Le => u16::from_le_bytes([buf[1], buf[2]]) as usize,
        };
        let item = buf
            .get(header..header + length)
            .ok_or_else(|| {
                malformed(format!(
                    "tag {tag:#04x} declares {length} bytes, {} remain",
                    buf.len() - header
                ))
            })?;
        buf = &buf[header + length..];

        let value = if tags.is_supported(tag) {
            match StatusTag::try_from(tag) {
                Ok(known) => FieldValue::Parsed(parse_value(known, item)?),
                Err(_) => FieldValue::Opaque(item.to_vec()),
            }
        } else {
            log::debug!("keeping unsupported tag {tag:#04x} ({length} bytes) opaque");
            FieldValue::Opaque(item.to_vec())
        };
        fields.push(StatusField { tag, length, value });
    }
    Ok(fields)
}

fn parse_value(tag: StatusTag, item: &[u8]) -> Result<Value, EpsonError> {
    Ok(match tag {
        StatusTag::Status => match item {
            [code] => Value::Int(*code as u64),
            _ => Value::Bytes(item.to_vec()),
        },
        StatusTag::JobName | StatusTag::SerialNumber => {
            Value::Text(String::from_utf8_lossy(item).into_owned())
        }
        StatusTag::InkInfo => Value::List(parse_ink_records(item)?),
        StatusTag::MaintenanceBox => Value::List(parse_maintenance_boxes(item)?),
        StatusTag::ErrorCode
        | StatusTag::SelfPrintCode
        | StatusTag::Warning
        | StatusTag::PaperPath
        | StatusTag::MaintenanceTanks
        | StatusTag::ReplaceCartridge
        | StatusTag::LoadingPath
        | StatusTag::CancelCode
        | StatusTag::JamInfo
        | StatusTag::PaperCount => Value::Bytes(item.to_vec()),
    })
}

/// `<record-len> (<colour> <type> <level> ...)*`
fn parse_ink_records(item: &[u8]) -> Result<Vec<StatusField>, EpsonError> {
    let (&record_len, records) = item
        .split_first()
        .ok_or_else(|| malformed("empty ink information"))?;
    let record_len = record_len as usize;
    if record_len < 3 {
        return Err(malformed(format!("ink record length {record_len} is too short")));
    }
    if records.len() % record_len != 0 {
        return Err(malformed(format!(
            "ink records of {record_len} bytes do not divide {} bytes",
            records.len()
        )));
    }
    Ok(records
        .chunks_exact(record_len)
        .map(|r| StatusField {
            tag: r[0],
            length: record_len,
            value: FieldValue::Parsed(Value::Int(r[2] as u64)),
        })
        .collect())
}

/// `<count> (<state> <level>)*`
fn parse_maintenance_boxes(item: &[u8]) -> Result<Vec<StatusField>, EpsonError> {
    let (&count, records) = item
        .split_first()
        .ok_or_else(|| malformed("empty maintenance box information"))?;
    if records.len() != count as usize * 2 {
        return Err(malformed(format!(
            "{count} maintenance boxes need {} bytes, got {}",
            count as usize * 2,
            records.len()
        )));
    }
    Ok(records
        .chunks_exact(2)
        .map(|r| StatusField {
            tag: r[0],
            length: 2,
            value: FieldValue::Parsed(Value::Int(r[1] as u64)),
        })
        .collect())
}

pub fn colour_name(code: u8) -> String {
    match code {
        0x01 => "Black".into(),
        0x03 => "Cyan".into(),
        0x04 => "Magenta".into(),
        0x05 => "Yellow".into(),
        0x06 => "Light Cyan".into(),
        0x07 => "Light Magenta".into(),
        0x0A => "Light Black".into(),
        0x0B => "Matte Black".into(),
        0x0F => "Light Light Black".into(),
        0x10 => "Orange".into(),
        0x11 => "Green".into(),
        other => format!("0x{other:X}"),
    }
}

pub fn state_name(code: u8) -> String {
    match code {
        0 => "Error".into(),
        1 => "Self Printing".into(),
        2 => "Busy".into(),
        3 => "Waiting".into(),
        4 => "Idle".into(),
        5 => "Paused".into(),
        7 => "Cleaning".into(),
        15 => "Nozzle Check".into(),
        other => format!("unknown: {other}"),
    }
}

fn cancel_code_text(item: &[u8]) -> String {
    match item {
        [0x01] => "No request".into(),
        [0x81] => "Request".into(),
        [0xA1] => "The status during received cancel command and initialize the printer".into(),
        other => hex::encode_upper(other),
    }
}

fn int_of(field: &StatusField) -> Option<u8> {
    match field.parsed()? {
        Value::Int(v) => u8::try_from(*v).ok(),
        _ => None,
    }
}

/// Build the semantic status view from a decoded tree.
///
/// Opaque fields and tags with no semantic slot are collected in
/// [`PrinterStatus::unknown`]. For single-valued tags the last occurrence wins.
pub fn interpret(tree: &StatusTree) -> PrinterStatus {
    let mut status = PrinterStatus::default();
    for field in tree.iter() {
        let (known, value) = match (field.known_tag(), &field.value) {
            (Some(known), FieldValue::Parsed(value)) => (known, value),
            (_, FieldValue::Opaque(raw)) => {
                status.unknown.push((field.tag, raw.clone()));
                continue;
            }
            (None, FieldValue::Parsed(_)) => continue,
        };
        match (known, value) {
            (StatusTag::Status, Value::Int(code)) => {
                let code = *code as u8;
                status.state = Some(PrinterState {
                    code,
                    text: state_name(code),
                    ready: code == 3 || code == 4,
                });
            }
            (StatusTag::ErrorCode, Value::Bytes(b)) => status.error_code = Some(b.clone()),
            (StatusTag::SelfPrintCode, Value::Bytes(b)) => status.self_print_code = Some(b.clone()),
            (StatusTag::Warning, Value::Bytes(b)) => status.warning_code = Some(b.clone()),
            (StatusTag::PaperPath, Value::Bytes(b)) => {
                status.paper_path = Some(match b.as_slice() {
                    [0x01, 0xFF] => "Cut sheet (Rear)".into(),
                    other => hex::encode_upper(other),
                });
            }
            (StatusTag::ReplaceCartridge, Value::Bytes(b)) => {
                status.replace_cartridge = b.first().map(|v| format!("{v:08b}"));
            }
            (StatusTag::LoadingPath, Value::Bytes(b)) => {
                let path = hex::encode_upper(b);
                status.loading_path = Some(if path == "01094E" { "fixed".into() } else { path });
            }
            (StatusTag::CancelCode, Value::Bytes(b)) => status.cancel_code = Some(cancel_code_text(b)),
            (StatusTag::JobName, Value::Text(t)) => {
                status.job_name = Some(if t.as_bytes() == b"\0\0\0\0\0unknown" {
                    "Not defined".into()
                } else {
                    t.clone()
                });
            }
            (StatusTag::SerialNumber, Value::Text(t)) => status.serial_number = Some(t.clone()),
            (StatusTag::MaintenanceTanks, Value::Bytes(b)) => {
                if let [t1, t2, ..] = b.as_slice() {
                    status.maintenance_tanks = Some((*t1, *t2));
                }
            }
            (StatusTag::InkInfo, Value::List(records)) => {
                status.inks = records
                    .iter()
                    .filter_map(|r| {
                        Some(InkLevel {
                            colour_code: r.tag,
                            name: colour_name(r.tag),
                            level: int_of(r)?,
                        })
                    })
                    .collect();
            }
            (StatusTag::MaintenanceBox, Value::List(boxes)) => {
                status.maintenance_boxes = boxes
                    .iter()
                    .filter_map(|b| {
                        Some(MaintenanceBox {
                            state: b.tag.into(),
                            level: int_of(b)?,
                        })
                    })
                    .collect();
            }
            (_, Value::Bytes(b)) => status.unknown.push((field.tag, b.clone())),
            _ => {}
        }
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoxState;

    fn st2(body: &[u8]) -> Vec<u8> {
        let mut raw = ST2_SIGNATURE.to_vec();
        raw.extend_from_slice(&(body.len() as u16).to_le_bytes());
        raw.extend_from_slice(body);
        raw
    }

    fn sample_body() -> Vec<u8> {
        let mut body = vec![0x01, 0x01, 0x04]; // idle
        // ink: 3-byte records, black 60%, cyan 25%
        body.extend_from_slice(&[0x0F, 0x07, 0x03, 0x01, 0x00, 60, 0x03, 0x01, 25]);
        body.extend_from_slice(&[0x13, 0x01, 0x01]); // cancel: no request
        body.extend_from_slice(&[0x37, 0x05, 0x02, 0x00, 10, 0x01, 90]); // two boxes
        body.extend_from_slice(&[0x19, 0x0C]);
        body.extend_from_slice(b"\0\0\0\0\0unknown");
        body
    }

    #[test]
    fn decodes_fields_in_wire_order() {
        let tree = decode(&st2(&sample_body()), &TagTable::all_known()).unwrap();
        let tags: Vec<u8> = tree.iter().map(|f| f.tag).collect();
        assert_eq!(tags, vec![0x01, 0x0F, 0x13, 0x37, 0x19]);
        assert_eq!(
            tree.find(StatusTag::Status).unwrap().value,
            FieldValue::Parsed(Value::Int(4))
        );
    }

    #[test]
    fn ink_records_become_sub_fields() {
        let tree = decode(&st2(&sample_body()), &TagTable::all_known()).unwrap();
        let ink = tree.find(StatusTag::InkInfo).unwrap();
        assert_eq!(ink.length, 7);
        match ink.parsed().unwrap() {
            Value::List(records) => {
                assert_eq!(records.len(), 2);
                assert_eq!(records[0].tag, 0x01);
                assert_eq!(records[0].value, FieldValue::Parsed(Value::Int(60)));
                assert_eq!(records[1].tag, 0x03);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn interprets_sample() {
        let tree = decode(&st2(&sample_body()), &TagTable::all_known()).unwrap();
        let status = interpret(&tree);
        let state = status.state.unwrap();
        assert_eq!(state.text, "Idle");
        assert!(state.ready);
        assert_eq!(status.inks.len(), 2);
        assert_eq!(status.inks[0].name, "Black");
        assert_eq!(status.inks[0].level, 60);
        assert_eq!(status.inks[1].name, "Cyan");
        assert_eq!(status.cancel_code.as_deref(), Some("No request"));
        assert_eq!(status.job_name.as_deref(), Some("Not defined"));
        assert_eq!(
            status.maintenance_boxes,
            vec![
                MaintenanceBox { state: BoxState::NotFull, level: 10 },
                MaintenanceBox { state: BoxState::NearFull, level: 90 },
            ]
        );
        assert!(status.unknown.is_empty());
    }

    #[test]
    fn unknown_tag_is_preserved_opaque() {
        let mut body = vec![0x01, 0x01, 0x03];
        body.extend_from_slice(&[0x55, 0x04, 0xDE, 0xAD, 0xBE, 0xEF]);
        let raw = st2(&body);
        let tree = decode(&raw, &TagTable::all_known()).unwrap();
        assert_eq!(tree.len(), 2);
        let unknown = &tree.fields[1];
        assert_eq!(unknown.tag, 0x55);
        assert_eq!(unknown.length, 4);
        assert_eq!(unknown.value, FieldValue::Opaque(vec![0xDE, 0xAD, 0xBE, 0xEF]));

        let consumed: usize = tree.iter().map(|f| 2 + f.length).sum();
        assert_eq!(ST2_HEADER_LEN + consumed, raw.len());
        assert_eq!(tree.body_len, body.len());

        let status = interpret(&tree);
        assert_eq!(status.unknown, vec![(0x55, vec![0xDE, 0xAD, 0xBE, 0xEF])]);
    }

    #[test]
    fn unsupported_known_tag_stays_opaque() {
        let tags = TagTable::new(&[0x01], &[]);
        let tree = decode(&st2(&sample_body()), &tags).unwrap();
        let ink = tree.find(StatusTag::InkInfo).unwrap();
        assert_eq!(
            ink.value,
            FieldValue::Opaque(vec![0x03, 0x01, 0x00, 60, 0x03, 0x01, 25])
        );
        assert_eq!(tree.find(StatusTag::Status).unwrap().value, FieldValue::Parsed(Value::Int(4)));
    }

    #[test]
    fn duplicate_tags_are_kept() {
        let body = [0x04, 0x01, 0x10, 0x04, 0x01, 0x20];
        let tree = decode(&st2(&body), &TagTable::all_known()).unwrap();
        let warnings: Vec<_> = tree.find_all(StatusTag::Warning).collect();
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[1].value, FieldValue::Parsed(Value::Bytes(vec![0x20])));
    }

    #[test]
    fn wide_length_policy() {
        let tags = TagTable::new(&[], &[0x60]);
        let mut body = vec![0x60, 0x03, 0x00, 1, 2, 3];
        body.extend_from_slice(&[0x61, 0x01, 9]);
        let tree = decode(&st2(&body), &tags).unwrap();
        assert_eq!(tree.fields[0].length, 3);
        assert_eq!(tree.fields[0].value, FieldValue::Opaque(vec![1, 2, 3]));
        assert_eq!(tree.fields[1].value, FieldValue::Opaque(vec![9]));
    }

    #[test]
    fn field_overrunning_buffer_is_malformed() {
        let body = [0x01, 0x05, 0x04];
        let err = decode(&st2(&body), &TagTable::all_known()).unwrap_err();
        assert!(matches!(err, EpsonError::MalformedStatus(_)));
    }

    #[test]
    fn truncated_field_header_is_malformed() {
        let body = [0x01, 0x01, 0x04, 0x0F];
        assert!(matches!(
            decode(&st2(&body), &TagTable::all_known()),
            Err(EpsonError::MalformedStatus(_))
        ));
    }

    #[test]
    fn declared_length_mismatch_is_malformed() {
        let mut raw = st2(&[0x01, 0x01, 0x04]);
        raw.push(0x00);
        assert!(matches!(
            decode(&raw, &TagTable::all_known()),
            Err(EpsonError::MalformedStatus(_))
        ));
        raw.truncate(ST2_HEADER_LEN + 1);
        assert!(decode(&raw, &TagTable::all_known()).is_err());
    }

    #[test]
    fn bad_signature_is_malformed() {
        assert!(matches!(
            decode(b"\x00@BDC PS\r\n\x00\x00", &TagTable::all_known()),
            Err(EpsonError::MalformedStatus(_))
        ));
        assert!(decode(&[], &TagTable::all_known()).is_err());
    }

    #[test]
    fn inconsistent_composite_is_malformed() {
        // 3-byte records over 4 bytes
        let body = [0x0F, 0x05, 0x03, 0x01, 0x00, 60, 0x03];
        assert!(matches!(
            decode(&st2(&body), &TagTable::all_known()),
            Err(EpsonError::MalformedStatus(_))
        ));
        // count says 2 boxes, only one present
        let body = [0x37, 0x03, 0x02, 0x00, 10];
        assert!(decode(&st2(&body), &TagTable::all_known()).is_err());
    }

    #[test]
    fn empty_body() {
        let tree = decode(&st2(&[]), &TagTable::all_known()).unwrap();
        assert!(tree.is_empty());
    }

    #[test]
    fn tag_enum_round_trip() {
        for tag in StatusTag::ALL {
            assert_eq!(StatusTag::try_from(u8::from(tag)).ok(), Some(tag));
        }
        assert!(StatusTag::try_from(0x55).is_err());
    }

    #[test]
    fn names() {
        assert_eq!(colour_name(0x0B), "Matte Black");
        assert_eq!(colour_name(0x42), "0x42");
        assert_eq!(state_name(15), "Nozzle Check");
        assert_eq!(state_name(9), "unknown: 9");
    }
}
