//! High-level Epson printer interface over EPSON-CTRL.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveTime};

use crate::protocol::{self, Address, CommandReply, Reply};
use crate::recovery::{self, KeySpace, Progress, RecoveryOutcome};
use crate::registry::{ModelConfig, Registry};
use crate::status::{self, StatusTree};
use crate::transport::{Transport, TransportError};
use crate::types::*;
use crate::EpsonError;

/// Standard MIB-II values reported by [`Printer::get_sys_info`].
const SYS_INFO: [(&str, &str); 7] = [
    ("Model", "1.3.6.1.2.1.25.3.2.1.3.1"),
    ("Model Short", "1.3.6.1.4.1.1248.1.1.3.1.3.8.0"),
    ("EEPS2 Version", "1.3.6.1.2.1.2.2.1.2.1"),
    ("Descr", "1.3.6.1.2.1.1.1.0"),
    ("UpTime", "1.3.6.1.2.1.1.3.0"),
    ("Name", "1.3.6.1.2.1.1.5.0"),
    ("MAC Address", "1.3.6.1.2.1.2.2.1.6.1"),
];

/// Per-session behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Extra attempts after a read round trip times out. Writes never retry.
    pub retries: u32,
    /// EEPROM reads per round trip, clamped to `1..=MAX_BATCH`.
    pub batch_size: usize,
    /// Build and log write requests without sending them.
    pub dry_run: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            retries: 1,
            batch_size: protocol::MAX_BATCH,
            dry_run: false,
        }
    }
}

/// High-level interface to one Epson printer.
///
/// ```no_run
/// use epson_ctrl::{Printer, Registry, SessionOptions, Transport};
///
/// # fn snmp_session() -> Box<dyn Transport> { unimplemented!() }
/// let registry = Registry::builtin()?;
/// let options = SessionOptions { dry_run: true, ..Default::default() };
/// let mut printer = Printer::open(&registry, "XP-205", snmp_session(), options)?;
/// println!("serial: {}", printer.get_serial_number()?);
/// printer.reset_waste_ink()?; // logged, not sent
/// # Ok::<(), epson_ctrl::EpsonError>(())
/// ```
pub struct Printer<T> {
    transport: T,
    config: Arc<ModelConfig>,
    options: SessionOptions,
}

impl<T: Transport> Printer<T> {
    /// Start a session with the registry record for `model` (name or alias).
    pub fn open(
        registry: &Registry,
        model: &str,
        transport: T,
        options: SessionOptions,
    ) -> Result<Self, EpsonError> {
        let config = registry.get(model)?;
        Self::with_config(config, transport, options)
    }

    /// Start a session with a record built outside a [`Registry`]. The record
    /// is validated the same way a registry load validates it.
    pub fn with_config(
        config: Arc<ModelConfig>,
        transport: T,
        options: SessionOptions,
    ) -> Result<Self, EpsonError> {
        config.validate()?;
        let options = SessionOptions {
            batch_size: options.batch_size.clamp(1, protocol::MAX_BATCH),
            ..options
        };
        Ok(Self {
            transport,
            config,
            options,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.options.dry_run = dry_run;
    }

    /// Use `key` for this session, e.g. after [`Printer::detect_read_key`].
    /// The registry record is left untouched.
    pub fn use_read_key(&mut self, key: ReadKey) {
        Arc::make_mut(&mut self.config).read_key = Some(key);
    }

    pub fn use_write_key(&mut self, key: WriteKey) {
        Arc::make_mut(&mut self.config).write_key = Some(key);
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    // --- EEPROM ---

    pub fn read_eeprom(&mut self, address: u16) -> Result<u8, EpsonError> {
        self.op("read_eeprom", |p| p.read_one(address))
    }

    /// Read several bytes in as few round trips as the batch size allows.
    /// Values come back in the order of `addresses`.
    pub fn read_eeprom_many(&mut self, addresses: &[u16]) -> Result<Vec<u8>, EpsonError> {
        self.op("read_eeprom_many", |p| p.read_many(addresses))
    }

    pub fn dump_eeprom(
        &mut self,
        range: RangeInclusive<u16>,
    ) -> Result<BTreeMap<u16, u8>, EpsonError> {
        self.op("dump_eeprom", |p| {
            let addresses: Vec<u16> = range.collect();
            let values = p.read_many(&addresses)?;
            Ok(addresses.into_iter().zip(values).collect())
        })
    }

    /// Write one byte. A timed-out write fails with
    /// [`EpsonError::WriteTimeout`] and is not retried.
    ///
    /// The write counts as done only when the printer echoes `||:OK;`. Any
    /// other echo is reported as [`EpsonError::DeviceRejected`], even if the
    /// device applied the value; confirm with [`Printer::read_eeprom`] when
    /// that matters.
    pub fn write_eeprom(&mut self, address: u16, value: u8) -> Result<WriteOutcome, EpsonError> {
        self.op("write_eeprom", |p| p.write_one(address, value))
    }

    pub fn get_serial_number(&mut self) -> Result<String, EpsonError> {
        self.op("get_serial_number", |p| {
            let addresses = required(&p.config.serial_number, "serial number addresses")?.to_vec();
            let bytes = p.read_many(&addresses)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        })
    }

    /// Named counters, most significant byte first.
    pub fn get_stats(&mut self) -> Result<BTreeMap<String, u64>, EpsonError> {
        self.op("get_stats", |p| {
            let stats = p.config.stats.clone();
            if stats.is_empty() {
                return Err(EpsonError::MissingKey("stats addresses"));
            }
            let addresses: Vec<u16> = stats.values().flatten().copied().collect();
            let mut values = p.read_many(&addresses)?.into_iter();
            Ok(stats
                .into_iter()
                .map(|(name, addrs)| {
                    let n = values
                        .by_ref()
                        .take(addrs.len())
                        .fold(0u64, |acc, b| acc << 8 | u64::from(b));
                    (name, n)
                })
                .collect())
        })
    }

    pub fn get_printer_head_id(&mut self) -> Result<String, EpsonError> {
        self.op("get_printer_head_id", |p| {
            let h = required(&p.config.printer_head_id_h, "printer head id addresses")?;
            let f = required(&p.config.printer_head_id_f, "printer head id addresses")?;
            let split = h.len();
            let addresses = [h, f].concat();
            let values = p.read_many(&addresses)?;
            Ok(format!(
                "{} - {}",
                hex::encode(&values[..split]),
                hex::encode(&values[split..])
            ))
        })
    }

    pub fn get_first_ti_received_time(&mut self) -> Result<NaiveDate, EpsonError> {
        self.op("get_first_ti_received_time", |p| {
            let [hi, lo] = p.ti_received_addresses()?;
            let values = p.read_many(&[hi, lo])?;
            let packed = u16::from_be_bytes([values[0], values[1]]);
            unpack_date(packed).ok_or_else(|| {
                EpsonError::Protocol(format!("{packed:#06x} is not a valid packed date"))
            })
        })
    }

    pub fn write_first_ti_received_time(
        &mut self,
        date: NaiveDate,
    ) -> Result<Vec<WriteOutcome>, EpsonError> {
        self.op("write_first_ti_received_time", |p| {
            let [hi, lo] = p.ti_received_addresses()?;
            let packed = pack_date(date).ok_or_else(|| {
                EpsonError::InvalidCommand(format!("{date} cannot be packed (years 2000 to 2127)"))
            })?;
            let [high, low] = packed.to_be_bytes();
            p.write_all(&[(hi, high), (lo, low)])
        })
    }

    pub fn get_ink_replacement_counters(
        &mut self,
    ) -> Result<Vec<InkReplacementCounter>, EpsonError> {
        self.op("get_ink_replacement_counters", |p| {
            let slots: Vec<(String, String, u16)> = p
                .config
                .ink_replacement_counters
                .iter()
                .flat_map(|(colour, counters)| {
                    counters
                        .iter()
                        .map(move |(counter, &addr)| (colour.clone(), counter.clone(), addr))
                })
                .collect();
            if slots.is_empty() {
                return Err(EpsonError::MissingKey("ink replacement counter addresses"));
            }
            let addresses: Vec<u16> = slots.iter().map(|s| s.2).collect();
            let values = p.read_many(&addresses)?;
            Ok(slots
                .into_iter()
                .zip(values)
                .map(|((colour, counter, _), value)| InkReplacementCounter {
                    colour,
                    counter,
                    value,
                })
                .collect())
        })
    }

    pub fn get_last_printer_fatal_errors(&mut self) -> Result<Vec<u8>, EpsonError> {
        self.op("get_last_printer_fatal_errors", |p| {
            let addresses =
                required(&p.config.last_printer_fatal_errors, "fatal error addresses")?.to_vec();
            p.read_many(&addresses)
        })
    }

    // --- Waste ink ---

    pub fn get_waste_ink_levels(&mut self) -> Result<Vec<WasteLevel>, EpsonError> {
        self.op("get_waste_ink_levels", |p| {
            let counters = required(&p.config.waste_counters, "waste counter addresses")?.to_vec();
            let addresses: Vec<u16> = counters.iter().flat_map(|c| c.addresses.clone()).collect();
            let mut values = p.read_many(&addresses)?.into_iter();
            Ok(counters
                .into_iter()
                .map(|c| {
                    let raw = values
                        .by_ref()
                        .take(c.addresses.len())
                        .enumerate()
                        .fold(0u32, |acc, (i, b)| acc | u32::from(b) << (8 * i));
                    WasteLevel {
                        percent: waste_percent(raw, c.divider),
                        name: c.name,
                        raw,
                    }
                })
                .collect())
        })
    }

    /// Zero every waste ink counter, then apply the model's raw reset table
    /// on top when it has one.
    pub fn reset_waste_ink(&mut self) -> Result<Vec<WriteOutcome>, EpsonError> {
        self.op("reset_waste_ink", |p| {
            let mut writes: Vec<(u16, u8)> = p
                .config
                .waste_counters
                .iter()
                .flat_map(|c| c.addresses.iter().map(|&a| (a, 0)))
                .collect();
            for (&address, &value) in &p.config.raw_waste_reset {
                match writes.iter_mut().find(|(a, _)| *a == address) {
                    Some(write) => write.1 = value,
                    None => writes.push((address, value)),
                }
            }
            if writes.is_empty() {
                return Err(EpsonError::MissingKey("waste counter addresses"));
            }
            p.write_all(&writes)
        })
    }

    // --- Commands ---

    /// Send a generic EPSON-CTRL command and return its reply.
    pub fn command(&mut self, id: &str, payload: &[u8]) -> Result<CommandReply, EpsonError> {
        self.op("command", |p| {
            let body = p.run_command(id, payload)?;
            let id: [u8; 2] = id.as_bytes().try_into().map_err(|_| {
                EpsonError::InvalidCommand(format!("bad command identifier {id:?}"))
            })?;
            Ok(CommandReply { id, body })
        })
    }

    pub fn get_firmware_version(&mut self) -> Result<FirmwareVersion, EpsonError> {
        self.op("get_firmware_version", |p| {
            let body = p.run_named("firmware")?;
            let code = protocol::parse_firmware_code(&body)?;
            Ok(FirmwareVersion {
                date: firmware_date(&code),
                code,
            })
        })
    }

    pub fn get_cartridges(&mut self) -> Result<Vec<String>, EpsonError> {
        self.op("get_cartridges", |p| {
            let body = p.run_named("cartridges")?;
            protocol::parse_cartridges(&body)
        })
    }

    /// Fetch and decode the ST2 status message.
    pub fn get_status_tree(&mut self) -> Result<StatusTree, EpsonError> {
        self.op("get_status_tree", |p| p.status_tree())
    }

    pub fn get_printer_status(&mut self) -> Result<PrinterStatus, EpsonError> {
        self.op("get_printer_status", |p| {
            let tree = p.status_tree()?;
            Ok(status::interpret(&tree))
        })
    }

    /// Standard MIB-II identification values. Values the printer does not
    /// answer, or fails to answer, are left out.
    pub fn get_sys_info(&mut self) -> Result<BTreeMap<String, String>, EpsonError> {
        self.op("get_sys_info", |p| {
            let mut info = BTreeMap::new();
            for (name, oid) in SYS_INFO {
                let address: Address = oid.parse()?;
                let raw = match p.round_trip(&address) {
                    Ok(raw) => raw,
                    Err(
                        e @ (EpsonError::Timeout
                        | EpsonError::Transport(_)
                        | EpsonError::DeviceRejected(_)),
                    ) => {
                        log::debug!("{name} unavailable: {e}");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if raw.is_empty() {
                    continue;
                }
                let text = match name {
                    "MAC Address" => hex_octets(&raw),
                    "UpTime" => match uptime(&raw) {
                        Some(text) => text,
                        None => continue,
                    },
                    _ => String::from_utf8_lossy(&raw).trim_end_matches('\0').to_string(),
                };
                info.insert(name.to_string(), text);
            }
            Ok(info)
        })
    }

    // --- Key detection ---

    /// Search `space` for the read key, probing the model's probe address.
    pub fn detect_read_key(
        &mut self,
        space: KeySpace,
        cancel: &AtomicBool,
        progress: impl FnMut(Progress),
    ) -> Result<RecoveryOutcome, EpsonError> {
        self.op("detect_read_key", |p| {
            recovery::recover_read_key(
                &mut p.transport,
                space,
                p.config.probe_address(),
                p.config.width(),
                cancel,
                progress,
            )
        })
    }

    /// Try each candidate write key at `address`: write the stored value
    /// with its low bit flipped, read it back, and restore it.
    ///
    /// Returns the first key whose write took effect. Refused in dry-run mode.
    pub fn detect_write_key(
        &mut self,
        candidates: &[WriteKey],
        address: u16,
    ) -> Result<Option<WriteKey>, EpsonError> {
        self.op("detect_write_key", |p| {
            if p.options.dry_run {
                return Err(EpsonError::DryRunRefused("detect_write_key"));
            }
            let original = p.read_one(address)?;
            let test = original ^ 1;
            for &key in candidates {
                match p.write_with(address, test, key) {
                    Ok(_) => {}
                    Err(EpsonError::DeviceRejected(reply)) => {
                        log::debug!("write key {key} rejected: {reply}");
                        continue;
                    }
                    Err(e) => return Err(e),
                }
                if p.read_one(address)? == test {
                    p.write_with(address, original, key)?;
                    log::info!("write key {key} accepted");
                    return Ok(Some(key));
                }
            }
            Ok(None)
        })
    }

    // --- Internal protocol handling ---

    fn op<R>(
        &mut self,
        name: &'static str,
        f: impl FnOnce(&mut Self) -> Result<R, EpsonError>,
    ) -> Result<R, EpsonError> {
        f(self).map_err(|e| e.context(name))
    }

    fn read_key(&self) -> Result<ReadKey, EpsonError> {
        self.config.read_key.ok_or(EpsonError::MissingKey("read key"))
    }

    fn ti_received_addresses(&self) -> Result<[u16; 2], EpsonError> {
        self.config
            .first_ti_received_time
            .ok_or(EpsonError::MissingKey("first TI received time addresses"))
    }

    /// Run a transport call, retrying it whole on timeout.
    fn with_retries<R>(
        &mut self,
        mut call: impl FnMut(&mut T) -> Result<R, TransportError>,
    ) -> Result<R, EpsonError> {
        let mut attempt = 0;
        loop {
            match call(&mut self.transport) {
                Err(TransportError::Timeout) if attempt < self.options.retries => {
                    attempt += 1;
                    log::warn!("request timed out, retry {attempt}/{}", self.options.retries);
                }
                other => return other.map_err(EpsonError::from),
            }
        }
    }

    fn round_trip(&mut self, address: &Address) -> Result<Vec<u8>, EpsonError> {
        log::debug!("request {address}");
        let raw = self.with_retries(|t| t.request(address))?;
        log::debug!("reply {}", hex::encode(&raw));
        Ok(raw)
    }

    /// One batched round trip, replies matched back to request order by OID.
    fn batch_round_trip(&mut self, addresses: &[Address]) -> Result<Vec<Vec<u8>>, EpsonError> {
        log::debug!("batch of {} requests", addresses.len());
        let mut replies = self.with_retries(|t| t.request_batch(addresses))?;
        addresses
            .iter()
            .map(|address| {
                let pos = replies
                    .iter()
                    .position(|(oid, _)| oid == address)
                    .ok_or_else(|| EpsonError::Protocol(format!("no reply for {address}")))?;
                let (_, raw) = replies.swap_remove(pos);
                log::debug!("reply {}", hex::encode(&raw));
                Ok(raw)
            })
            .collect()
    }

    fn read_one(&mut self, address: u16) -> Result<u8, EpsonError> {
        self.read_many(&[address])?
            .first()
            .copied()
            .ok_or_else(|| EpsonError::Protocol("empty read".into()))
    }

    fn read_many(&mut self, addresses: &[u16]) -> Result<Vec<u8>, EpsonError> {
        let key = self.read_key()?;
        let width = self.config.width();
        let requests = addresses
            .iter()
            .map(|&a| protocol::encode_eeprom_read(a, width, key))
            .collect::<Result<Vec<_>, _>>()?;

        let mut values = Vec::with_capacity(addresses.len());
        for (chunk, eeprom) in requests
            .chunks(self.options.batch_size)
            .zip(addresses.chunks(self.options.batch_size))
        {
            let replies = match chunk {
                [single] => vec![self.round_trip(single)?],
                _ => self.batch_round_trip(chunk)?,
            };
            for (raw, &address) in replies.iter().zip(eeprom) {
                values.push(eeprom_value(raw, address)?);
            }
        }
        Ok(values)
    }

    fn write_one(&mut self, address: u16, value: u8) -> Result<WriteOutcome, EpsonError> {
        let key = self
            .config
            .write_key
            .ok_or(EpsonError::MissingKey("write key"))?;
        self.write_with(address, value, key)
    }

    fn write_all(&mut self, writes: &[(u16, u8)]) -> Result<Vec<WriteOutcome>, EpsonError> {
        writes
            .iter()
            .map(|&(address, value)| self.write_one(address, value))
            .collect()
    }

    fn write_with(
        &mut self,
        address: u16,
        value: u8,
        write_key: WriteKey,
    ) -> Result<WriteOutcome, EpsonError> {
        let request = protocol::encode_eeprom_write(
            address,
            value,
            self.config.width(),
            self.read_key()?,
            &write_key.to_wire(),
        )?;

        if self.options.dry_run {
            log::info!("dry run: would write {value:#04x} to {address:#06x} ({request})");
            return Ok(WriteOutcome::DryRun(request));
        }

        log::debug!("request {request}");
        let raw = match self.transport.request(&request) {
            Ok(raw) => raw,
            Err(TransportError::Timeout) => {
                return Err(EpsonError::WriteTimeout { address, value })
            }
            Err(e) => return Err(e.into()),
        };
        log::debug!("reply {}", hex::encode(&raw));

        match protocol::decode_response(&raw)? {
            Reply::Command(reply) if reply.body == protocol::REPLY_OK => Ok(WriteOutcome::Written),
            Reply::Command(reply) => Err(EpsonError::DeviceRejected(reply.indication())),
            Reply::Eeprom(_) => Err(EpsonError::Protocol("EEPROM value in reply to a write".into())),
        }
    }

    fn run_command(&mut self, id: &str, payload: &[u8]) -> Result<Vec<u8>, EpsonError> {
        let request = protocol::encode_command(id.as_bytes(), payload)?;
        let raw = self.round_trip(&request)?;
        let id: [u8; 2] = id
            .as_bytes()
            .try_into()
            .map_err(|_| EpsonError::InvalidCommand(format!("bad command identifier {id:?}")))?;
        protocol::command_body(&raw, id)
    }

    fn run_named(&mut self, name: &str) -> Result<Vec<u8>, EpsonError> {
        let template = self
            .config
            .command(name)
            .ok_or_else(|| EpsonError::InvalidCommand(format!("no {name:?} command for this model")))?;
        self.run_command(&template.id, &template.payload)
    }

    fn status_tree(&mut self) -> Result<StatusTree, EpsonError> {
        let template = self
            .config
            .command("status")
            .ok_or_else(|| EpsonError::InvalidCommand("no status command for this model".into()))?;
        let request = protocol::encode_command(template.id.as_bytes(), &template.payload)?;
        let raw = self.round_trip(&request)?;
        status::decode(&raw, &self.config.tag_table())
    }
}

fn required<'a, V>(items: &'a [V], what: &'static str) -> Result<&'a [V], EpsonError> {
    if items.is_empty() {
        Err(EpsonError::MissingKey(what))
    } else {
        Ok(items)
    }
}

/// Value of an EEPROM read reply, checking the echoed address.
fn eeprom_value(raw: &[u8], address: u16) -> Result<u8, EpsonError> {
    match protocol::decode_response(raw)? {
        Reply::Eeprom(reply) if reply.address == address => Ok(reply.value),
        Reply::Eeprom(reply) => Err(EpsonError::Protocol(format!(
            "asked for {address:#06x}, reply is for {:#06x}",
            reply.address
        ))),
        Reply::Command(reply) => Err(EpsonError::DeviceRejected(reply.indication())),
    }
}

/// `64-EB-8C-...` form of a MAC address.
fn hex_octets(raw: &[u8]) -> String {
    raw.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join("-")
}

/// sysUpTime (hundredths of a second) as `HH:MM:SS`, wrapping at a day.
/// Accepts the decimal text form or big-endian integer bytes.
fn uptime(raw: &[u8]) -> Option<String> {
    let ticks = if raw.iter().all(u8::is_ascii_digit) {
        std::str::from_utf8(raw).ok()?.parse::<u64>().ok()?
    } else if raw.len() <= 8 {
        raw.iter().fold(0u64, |acc, &b| acc << 8 | u64::from(b))
    } else {
        return None;
    };
    let secs = u32::try_from(ticks / 100 % 86_400).ok()?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)?;
    Some(time.format("%H:%M:%S").to_string())
}

fn waste_percent(raw: u32, divider: f64) -> f64 {
    (f64::from(raw) / divider * 100.0).round() / 100.0
}

/// `(year - 2000) * 512 + month * 32 + day`.
fn pack_date(date: NaiveDate) -> Option<u16> {
    let years = u16::try_from(date.year() - 2000).ok()?;
    if years > 127 {
        return None;
    }
    Some(years * 512 + date.month() as u16 * 32 + date.day() as u16)
}

fn unpack_date(packed: u16) -> Option<NaiveDate> {
    let year = 2000 + i32::from(packed / 512);
    let month = u32::from(packed % 512 / 32);
    let day = u32::from(packed % 32);
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Build date embedded in a firmware code: day in chars 2..4, year as
/// `char 4 + 1945`, month as a hex digit in char 5.
fn firmware_date(code: &str) -> Option<NaiveDate> {
    let bytes = code.as_bytes();
    if bytes.len() < 6 {
        return None;
    }
    let day = std::str::from_utf8(&bytes[2..4]).ok()?.parse().ok()?;
    let year = i32::from(bytes[4]) + 1945;
    let month = char::from(bytes[5]).to_digit(16)?;
    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_dates() {
        let date = NaiveDate::from_ymd_opt(2019, 3, 14).unwrap();
        let packed = pack_date(date).unwrap();
        assert_eq!(packed, 19 * 512 + 3 * 32 + 14);
        assert_eq!(unpack_date(packed), Some(date));
        assert_eq!(pack_date(NaiveDate::from_ymd_opt(1999, 1, 1).unwrap()), None);
        assert_eq!(pack_date(NaiveDate::from_ymd_opt(2128, 1, 1).unwrap()), None);
        assert_eq!(unpack_date(0), None);
    }

    #[test]
    fn firmware_code_dates() {
        assert_eq!(firmware_date("RF16M4"), NaiveDate::from_ymd_opt(2022, 4, 16));
        assert_eq!(firmware_date("RF16MZ"), None);
        assert_eq!(firmware_date("RF"), None);
    }

    #[test]
    fn waste_rounding() {
        assert_eq!(waste_percent(1000, 73.5), 13.61);
        assert_eq!(waste_percent(0, 34.34), 0.0);
    }

    #[test]
    fn eeprom_reply_checks() {
        assert_eq!(eeprom_value(b"@BDC PS\r\nEE:0032AC;\x0c", 0x32).unwrap(), 0xAC);
        assert!(matches!(
            eeprom_value(b"@BDC PS\r\nEE:0033AC;\x0c", 0x32),
            Err(EpsonError::Protocol(_))
        ));
        assert!(matches!(
            eeprom_value(b"@BDC PS\r\n||:NA;\x0c", 0x32),
            Err(EpsonError::DeviceRejected(ref s)) if s == "||:NA;"
        ));
    }

    #[test]
    fn batch_size_is_clamped() {
        struct Null;
        impl Transport for Null {
            fn request(&mut self, _: &Address) -> Result<Vec<u8>, TransportError> {
                Err(TransportError::Timeout)
            }
        }
        let cfg = Arc::new(ModelConfig::default());
        let opts = |n| SessionOptions { batch_size: n, ..Default::default() };
        let batch = |n| {
            Printer::with_config(cfg.clone(), Null, opts(n))
                .unwrap()
                .options()
                .batch_size
        };
        assert_eq!(batch(0), 1);
        assert_eq!(batch(50), 10);
    }

    #[test]
    fn with_config_validates_the_record() {
        struct Null;
        impl Transport for Null {
            fn request(&mut self, _: &Address) -> Result<Vec<u8>, TransportError> {
                Err(TransportError::Timeout)
            }
        }
        let cfg = ModelConfig {
            read_key: Some(ReadKey([1, 2])),
            waste_counters: vec![crate::registry::WasteCounter {
                name: "main".into(),
                addresses: (1..=5).collect(),
                divider: 69.0,
            }],
            ..Default::default()
        };
        let err = Printer::with_config(Arc::new(cfg), Null, SessionOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, EpsonError::Registry(ref m) if m.contains("1 to 4 addresses")));
    }

    #[test]
    fn sys_info_formats() {
        assert_eq!(hex_octets(&[0x64, 0xEB, 0x8C, 0x01]), "64-EB-8C-01");
        assert_eq!(uptime(b"366100").as_deref(), Some("01:01:01"));
        assert_eq!(uptime(&[0x05, 0x96, 0x14]).as_deref(), Some("01:01:01"));
        // wraps at a day
        assert_eq!(uptime(b"8646100").as_deref(), Some("00:01:01"));
        assert_eq!(uptime(&[1; 9]), None);
    }
}
