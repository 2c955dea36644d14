//! Read key recovery by exhaustive search, and EEPROM dump scanning.
//!
//! The search is split into a candidate iterator ([`KeySpace`]), a pure reply
//! classifier ([`classify`]) and a driver ([`recover_read_key`]) that issues
//! one probe per candidate. The driver checks a cancellation flag between
//! round trips and reports progress after each one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;

use regex::bytes::Regex;

use crate::protocol::{self, Reply};
use crate::transport::{Transport, TransportError};
use crate::types::{AddressWidth, ReadKey};
use crate::EpsonError;

const KEY_SPACE_SIZE: u32 = 1 << 16;

/// A contiguous run of candidate read keys in ascending numeric order,
/// wrapping from `[255, 255]` to `[0, 0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpace {
    start: u16,
    len: u32,
}

impl KeySpace {
    /// Every two-byte key, starting from `[0, 0]`.
    pub fn full() -> Self {
        Self::starting_at(ReadKey([0, 0]))
    }

    /// Every two-byte key, starting from `first` and wrapping around.
    pub fn starting_at(first: ReadKey) -> Self {
        Self {
            start: first.to_u16(),
            len: KEY_SPACE_SIZE,
        }
    }

    /// Keys from `first` to `last` inclusive. Empty if `last < first`.
    pub fn range(first: ReadKey, last: ReadKey) -> Self {
        let (a, b) = (first.to_u16(), last.to_u16());
        Self {
            start: a,
            len: if b >= a { u32::from(b - a) + 1 } else { 0 },
        }
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn first(&self) -> Option<ReadKey> {
        (!self.is_empty()).then(|| ReadKey::from_u16(self.start))
    }

    /// The keys left after the first `n` have been tried.
    pub fn skip(&self, n: u32) -> Self {
        let n = n.min(self.len);
        Self {
            start: self.start.wrapping_add(n as u16),
            len: self.len - n,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = ReadKey> {
        let start = self.start;
        (0..self.len).map(move |i| ReadKey::from_u16(start.wrapping_add(i as u16)))
    }
}

impl IntoIterator for KeySpace {
    type Item = ReadKey;
    type IntoIter = Box<dyn Iterator<Item = ReadKey>>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// How a probe reply answers the question "is this the key?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// An EEPROM reply for the probed address.
    Accepted { value: u8 },
    /// The device answered, but not with the probed byte.
    Rejected,
    /// No reply before the transport gave up.
    NoAnswer,
}

/// Classify the reply to a probe of `probe_address`. `None` means no reply.
pub fn classify(reply: Option<&[u8]>, probe_address: u16) -> ProbeVerdict {
    let Some(raw) = reply else {
        return ProbeVerdict::NoAnswer;
    };
    match protocol::decode_response(raw) {
        Ok(Reply::Eeprom(r)) if r.address == probe_address => {
            ProbeVerdict::Accepted { value: r.value }
        }
        _ => ProbeVerdict::Rejected,
    }
}

/// Search advancement, reported after every candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub tried: u32,
    pub total: u32,
    pub current: ReadKey,
}

/// Terminal state of a key search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Found(ReadKey),
    /// The space was exhausted. The model is likely incompatible.
    NotFound { tried: u32 },
    /// Interrupted between candidates. `remaining` resumes the search.
    Cancelled { tried: u32, remaining: KeySpace },
}

impl RecoveryOutcome {
    pub fn key(&self) -> Option<ReadKey> {
        match self {
            Self::Found(key) => Some(*key),
            _ => None,
        }
    }

    /// Treat anything but a found key as [`EpsonError::KeyNotFound`].
    pub fn into_result(self) -> Result<ReadKey, EpsonError> {
        self.key().ok_or(EpsonError::KeyNotFound)
    }
}

/// Probe every key in `space` with a read of `probe_address` until one
/// yields an EEPROM reply.
///
/// Timeouts and rejected replies count as negatives. Any other transport
/// failure aborts the search. Setting `cancel` stops the search before the
/// next round trip.
pub fn recover_read_key<T, F>(
    transport: &mut T,
    space: KeySpace,
    probe_address: u16,
    width: AddressWidth,
    cancel: &AtomicBool,
    mut progress: F,
) -> Result<RecoveryOutcome, EpsonError>
where
    T: Transport + ?Sized,
    F: FnMut(Progress),
{
    protocol::eeprom_address_bytes(probe_address, width)?;
    log::debug!(
        "searching {} read keys from {:?}, probe address {probe_address:#06x}",
        space.len(),
        space.first()
    );

    let mut tried = 0u32;
    for key in space.iter() {
        if cancel.load(Ordering::Relaxed) {
            log::debug!("key search cancelled after {tried} candidates");
            return Ok(RecoveryOutcome::Cancelled {
                tried,
                remaining: space.skip(tried),
            });
        }

        let address = protocol::encode_eeprom_read(probe_address, width, key)?;
        let reply = match transport.request(&address) {
            Ok(raw) => Some(raw),
            Err(TransportError::Timeout) => None,
            Err(e) => return Err(e.into()),
        };
        let verdict = classify(reply.as_deref(), probe_address);

        tried += 1;
        progress(Progress {
            tried,
            total: space.len(),
            current: key,
        });

        if let ProbeVerdict::Accepted { value } = verdict {
            log::info!("read key {key} accepted (probe value {value:#04x})");
            return Ok(RecoveryOutcome::Found(key));
        }
    }

    Ok(RecoveryOutcome::NotFound { tried })
}

static SERIAL_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)[A-Z0-9]+").expect("static regex"));

/// Scan an EEPROM dump starting at `base` for serial-number-like runs:
/// exactly ten upper-case letters or digits.
///
/// Returns the address of each run with its text.
pub fn find_serial_number(dump: &[u8], base: u16) -> Vec<(u16, String)> {
    SERIAL_RUN
        .find_iter(dump)
        .filter(|m| m.len() == 10)
        .map(|m| {
            (
                base.wrapping_add(m.start() as u16),
                String::from_utf8_lossy(m.as_bytes()).into_owned(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Address, EepromOp};

    /// Answers reads made with `key`, rejects the rest.
    struct KeyLock {
        key: ReadKey,
        requests: u32,
        silent: bool,
    }

    impl KeyLock {
        fn new(key: ReadKey) -> Self {
            Self {
                key,
                requests: 0,
                silent: false,
            }
        }
    }

    impl Transport for KeyLock {
        fn request(&mut self, address: &Address) -> Result<Vec<u8>, TransportError> {
            self.requests += 1;
            let req = protocol::decode_eeprom_request(address)
                .ok_or_else(|| TransportError::Other("not an EEPROM request".into()))?;
            assert_eq!(req.op, EepromOp::Read);
            if req.read_key != self.key {
                return if self.silent {
                    Err(TransportError::Timeout)
                } else {
                    Ok(b"@BDC PS\r\n||:NA;\x0c".to_vec())
                };
            }
            Ok(format!("@BDC PS\r\nEE:{:04X}42;\x0c", req.address).into_bytes())
        }
    }

    // -- Key space --

    #[test]
    fn full_space_is_ascending() {
        let keys: Vec<_> = KeySpace::full().iter().take(3).collect();
        assert_eq!(keys, vec![ReadKey([0, 0]), ReadKey([0, 1]), ReadKey([0, 2])]);
        assert_eq!(KeySpace::full().len(), 65536);
    }

    #[test]
    fn starting_offset_wraps() {
        let space = KeySpace::starting_at(ReadKey([255, 254]));
        let keys: Vec<_> = space.iter().take(4).collect();
        assert_eq!(
            keys,
            vec![
                ReadKey([255, 254]),
                ReadKey([255, 255]),
                ReadKey([0, 0]),
                ReadKey([0, 1])
            ]
        );
        assert_eq!(space.iter().count(), 65536);
    }

    #[test]
    fn inclusive_range() {
        let space = KeySpace::range(ReadKey([1, 254]), ReadKey([2, 1]));
        assert_eq!(space.len(), 4);
        assert_eq!(space.into_iter().last(), Some(ReadKey([2, 1])));
        assert!(KeySpace::range(ReadKey([2, 0]), ReadKey([1, 0])).is_empty());
    }

    #[test]
    fn skip_resumes() {
        let space = KeySpace::range(ReadKey([0, 10]), ReadKey([0, 20]));
        let rest = space.skip(4);
        assert_eq!(rest.first(), Some(ReadKey([0, 14])));
        assert_eq!(rest.len(), 7);
        assert!(space.skip(100).is_empty());
    }

    // -- Classification --

    #[test]
    fn classify_replies() {
        assert_eq!(classify(None, 0), ProbeVerdict::NoAnswer);
        assert_eq!(
            classify(Some(b"@BDC PS\r\nEE:0000AC;\x0c"), 0),
            ProbeVerdict::Accepted { value: 0xAC }
        );
        assert_eq!(
            classify(Some(b"@BDC PS\r\nEE:0001AC;\x0c"), 0),
            ProbeVerdict::Rejected
        );
        assert_eq!(classify(Some(b"@BDC PS\r\n||:NA;\x0c"), 0), ProbeVerdict::Rejected);
        assert_eq!(classify(Some(b"\xff\xff"), 0), ProbeVerdict::Rejected);
    }

    // -- Search --

    #[test]
    fn finds_key_from_any_offset() {
        let truth = ReadKey([0, 7]);
        for start in [0u16, 5, 7, 65530] {
            let mut dev = KeyLock::new(truth);
            let space = KeySpace::starting_at(ReadKey::from_u16(start));
            let outcome = recover_read_key(
                &mut dev,
                space,
                0,
                AddressWidth::OneByte,
                &AtomicBool::new(false),
                |_| {},
            )
            .unwrap();
            assert_eq!(outcome, RecoveryOutcome::Found(truth), "start {start}");
        }
    }

    #[test]
    fn timeouts_are_negative() {
        let mut dev = KeyLock::new(ReadKey([0, 3]));
        dev.silent = true;
        let outcome = recover_read_key(
            &mut dev,
            KeySpace::full(),
            0,
            AddressWidth::OneByte,
            &AtomicBool::new(false),
            |_| {},
        )
        .unwrap();
        assert_eq!(outcome.key(), Some(ReadKey([0, 3])));
        assert_eq!(dev.requests, 4);
    }

    #[test]
    fn exhausted_space_is_not_found() {
        let mut dev = KeyLock::new(ReadKey([9, 9]));
        let space = KeySpace::range(ReadKey([0, 0]), ReadKey([0, 9]));
        let mut last = None;
        let outcome = recover_read_key(
            &mut dev,
            space,
            0,
            AddressWidth::OneByte,
            &AtomicBool::new(false),
            |p| last = Some(p),
        )
        .unwrap();
        assert_eq!(outcome, RecoveryOutcome::NotFound { tried: 10 });
        let last = last.unwrap();
        assert_eq!((last.tried, last.total), (10, 10));
        assert_eq!(last.current, ReadKey([0, 9]));
        assert!(matches!(outcome.into_result(), Err(EpsonError::KeyNotFound)));
    }

    #[test]
    fn cancellation_between_candidates() {
        let mut dev = KeyLock::new(ReadKey([200, 0]));
        let cancel = AtomicBool::new(false);
        let outcome = recover_read_key(
            &mut dev,
            KeySpace::full(),
            0,
            AddressWidth::OneByte,
            &cancel,
            |p| {
                if p.tried == 5 {
                    cancel.store(true, Ordering::Relaxed);
                }
            },
        )
        .unwrap();
        match outcome {
            RecoveryOutcome::Cancelled { tried, remaining } => {
                assert_eq!(tried, 5);
                assert_eq!(remaining.first(), Some(ReadKey([0, 5])));
                assert_eq!(remaining.len(), 65536 - 5);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert_eq!(dev.requests, 5);
    }

    #[test]
    fn probe_address_must_fit_width() {
        let mut dev = KeyLock::new(ReadKey([0, 0]));
        let err = recover_read_key(
            &mut dev,
            KeySpace::full(),
            0x100,
            AddressWidth::OneByte,
            &AtomicBool::new(false),
            |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, EpsonError::InvalidAddress { address: 0x100, .. }));
        assert_eq!(dev.requests, 0);
    }

    // -- Serial scan --

    #[test]
    fn serial_runs() {
        let mut dump = vec![0u8; 4];
        dump.extend_from_slice(b"X5JK012345");
        dump.push(0xFF);
        dump.extend_from_slice(b"0123456789");
        dump.push(0);
        dump.extend_from_slice(b"ABCDEFGHIJK"); // eleven
        dump.push(b'a');
        dump.extend_from_slice(b"XYZ");
        assert_eq!(
            find_serial_number(&dump, 0x100),
            vec![
                (0x104, "X5JK012345".to_string()),
                (0x10F, "0123456789".to_string()),
            ]
        );
    }
}
