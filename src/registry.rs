//! Per-model configuration registry.
//!
//! Model records are plain data (keys, EEPROM address tables, scaling
//! constants). A registry is built once, from the embedded table and/or an
//! externally parsed one, and is read-only afterwards. Inheritance between
//! records (`same_as`) and alias resolution happen at load time, together
//! with validation, so a bad record fails when it is loaded rather than
//! when an operation first touches it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::protocol;
use crate::status::{StatusTag, TagTable};
use crate::types::{AddressWidth, ReadKey, WriteKey};
use crate::EpsonError;

const BUILTIN_MODELS: &str = include_str!("models.json");

/// A waste ink counter: little-endian bytes at `addresses`, scaled to a
/// percentage by `divider`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WasteCounter {
    pub name: String,
    pub addresses: Vec<u16>,
    pub divider: f64,
}

/// A named non-EEPROM command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub id: String,
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl CommandTemplate {
    fn new(id: &[u8; 2], payload: &[u8]) -> Self {
        Self {
            id: String::from_utf8_lossy(id).into_owned(),
            payload: payload.to_vec(),
        }
    }
}

/// Command templates every model gets unless its record overrides them.
pub fn default_command(name: &str) -> Option<CommandTemplate> {
    match name {
        "status" => Some(CommandTemplate::new(&protocol::CMD_STATUS, &[1])),
        "firmware" => Some(CommandTemplate::new(&protocol::CMD_FIRMWARE, &[0])),
        "cartridges" => Some(CommandTemplate::new(&protocol::CMD_CARTRIDGES, &[0])),
        _ => None,
    }
}

/// Capability record for one printer model.
///
/// Multi-byte counters list their addresses in the order the value is
/// assembled: `stats` most significant byte first, `waste_counters` least
/// significant byte first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Canonical name, filled in from the table key at load time.
    #[serde(skip)]
    pub name: String,
    pub alias: Vec<String>,
    /// Inherit every field this record leaves unset from another model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_as: Option<String>,
    pub read_key: Option<ReadKey>,
    pub write_key: Option<WriteKey>,
    pub address_width: Option<AddressWidth>,
    /// Free-form named EEPROM addresses.
    pub addresses: BTreeMap<String, u16>,
    pub serial_number: Vec<u16>,
    pub printer_head_id_h: Vec<u16>,
    pub printer_head_id_f: Vec<u16>,
    pub waste_counters: Vec<WasteCounter>,
    /// Address/value pairs written by a waste ink reset, when the model
    /// needs more than zeroing its counters.
    pub raw_waste_reset: BTreeMap<u16, u8>,
    pub stats: BTreeMap<String, Vec<u16>>,
    /// High byte address, low byte address.
    pub first_ti_received_time: Option<[u16; 2]>,
    pub ink_replacement_counters: BTreeMap<String, BTreeMap<String, u16>>,
    pub last_printer_fatal_errors: Vec<u16>,
    /// ST2 tags to interpret; `None` means every known tag.
    pub status_tags: Option<Vec<u8>>,
    /// ST2 tags whose length is a little-endian u16.
    pub wide_length_tags: Vec<u8>,
    pub commands: BTreeMap<String, CommandTemplate>,
    /// EEPROM address read while probing candidate keys.
    pub probe_address: Option<u16>,
}

impl ModelConfig {
    pub fn width(&self) -> AddressWidth {
        self.address_width.unwrap_or_default()
    }

    pub fn probe_address(&self) -> u16 {
        self.probe_address.unwrap_or(0)
    }

    pub fn tag_table(&self) -> TagTable {
        let known: Vec<u8>;
        let supported = match &self.status_tags {
            Some(tags) => tags.as_slice(),
            None => {
                known = StatusTag::ALL.iter().map(|&t| u8::from(t)).collect();
                &known
            }
        };
        TagTable::new(supported, &self.wide_length_tags)
    }

    /// Command template by name, falling back to [`default_command`].
    pub fn command(&self, name: &str) -> Option<CommandTemplate> {
        self.commands
            .get(name)
            .cloned()
            .or_else(|| default_command(name))
    }

    /// Fill every unset field from `base`. Aliases are never inherited.
    fn inherit(&mut self, base: &ModelConfig) {
        fn fill<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
            if dst.is_none() {
                dst.clone_from(src);
            }
        }
        fn fill_vec<T: Clone>(dst: &mut Vec<T>, src: &[T]) {
            if dst.is_empty() {
                dst.extend_from_slice(src);
            }
        }
        fn fill_map<K: Ord + Clone, V: Clone>(dst: &mut BTreeMap<K, V>, src: &BTreeMap<K, V>) {
            if dst.is_empty() {
                dst.clone_from(src);
            }
        }

        fill(&mut self.read_key, &base.read_key);
        fill(&mut self.write_key, &base.write_key);
        fill(&mut self.address_width, &base.address_width);
        fill(&mut self.first_ti_received_time, &base.first_ti_received_time);
        fill(&mut self.status_tags, &base.status_tags);
        fill(&mut self.probe_address, &base.probe_address);
        fill_map(&mut self.addresses, &base.addresses);
        fill_vec(&mut self.serial_number, &base.serial_number);
        fill_vec(&mut self.printer_head_id_h, &base.printer_head_id_h);
        fill_vec(&mut self.printer_head_id_f, &base.printer_head_id_f);
        fill_vec(&mut self.waste_counters, &base.waste_counters);
        fill_map(&mut self.raw_waste_reset, &base.raw_waste_reset);
        fill_map(&mut self.stats, &base.stats);
        fill_map(&mut self.ink_replacement_counters, &base.ink_replacement_counters);
        fill_vec(&mut self.last_printer_fatal_errors, &base.last_printer_fatal_errors);
        fill_vec(&mut self.wide_length_tags, &base.wide_length_tags);
        fill_map(&mut self.commands, &base.commands);
    }

    fn eeprom_addresses(&self) -> impl Iterator<Item = u16> + '_ {
        self.addresses
            .values()
            .copied()
            .chain(self.serial_number.iter().copied())
            .chain(self.printer_head_id_h.iter().copied())
            .chain(self.printer_head_id_f.iter().copied())
            .chain(self.waste_counters.iter().flat_map(|w| w.addresses.iter().copied()))
            .chain(self.raw_waste_reset.keys().copied())
            .chain(self.stats.values().flatten().copied())
            .chain(self.first_ti_received_time.iter().flatten().copied())
            .chain(
                self.ink_replacement_counters
                    .values()
                    .flat_map(|c| c.values().copied()),
            )
            .chain(self.last_printer_fatal_errors.iter().copied())
            .chain(self.probe_address)
    }

    /// Check addresses against the model's width, divider and counter
    /// sizes, and that every command template encodes.
    pub fn validate(&self) -> Result<(), EpsonError> {
        let invalid = |msg: String| EpsonError::Registry(format!("{}: {msg}", self.name));
        let width = self.width();

        if let Some(bad) = self.eeprom_addresses().find(|&a| a > width.max_address()) {
            return Err(invalid(format!(
                "address {bad:#06x} does not fit a {width} address"
            )));
        }
        for w in &self.waste_counters {
            if !(w.divider.is_finite() && w.divider > 0.0) {
                return Err(invalid(format!("waste counter {} has divider {}", w.name, w.divider)));
            }
            if w.addresses.is_empty() || w.addresses.len() > 4 {
                return Err(invalid(format!(
                    "waste counter {} needs 1 to 4 addresses, has {}",
                    w.name,
                    w.addresses.len()
                )));
            }
        }
        for (name, addrs) in &self.stats {
            if addrs.is_empty() || addrs.len() > 8 {
                return Err(invalid(format!(
                    "counter {name:?} needs 1 to 8 addresses, has {}",
                    addrs.len()
                )));
            }
        }
        for (name, cmd) in &self.commands {
            protocol::encode_command(cmd.id.as_bytes(), &cmd.payload)
                .map_err(|e| invalid(format!("command {name:?}: {e}")))?;
        }
        Ok(())
    }
}

/// How [`Registry::load`] combines an incoming table with the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Incoming models replace same-named records; others are kept.
    Merge,
    /// The registry holds only the incoming models.
    Replace,
}

/// Model name → capability record, with alias resolution.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    source: BTreeMap<String, ModelConfig>,
    models: BTreeMap<String, Arc<ModelConfig>>,
    aliases: BTreeMap<String, String>,
}

/// Parse a capability table (`{ "<model>": { ... }, ... }`) from JSON.
pub fn parse_table(json: &str) -> Result<BTreeMap<String, ModelConfig>, EpsonError> {
    serde_json::from_str(json).map_err(|e| EpsonError::Registry(format!("Invalid model table: {e}")))
}

fn resolve(
    source: &BTreeMap<String, ModelConfig>,
    name: &str,
    chain: &mut Vec<String>,
) -> Result<ModelConfig, EpsonError> {
    let record = source
        .get(name)
        .ok_or_else(|| EpsonError::Registry(format!("{} inherits from unknown model {name}", chain.join(" -> "))))?;
    if chain.iter().any(|n| n == name) {
        return Err(EpsonError::Registry(format!(
            "inheritance cycle: {} -> {name}",
            chain.join(" -> ")
        )));
    }
    chain.push(name.to_string());

    let mut resolved = record.clone();
    if let Some(base) = &record.same_as {
        let base = resolve(source, base, chain)?;
        resolved.inherit(&base);
    }
    chain.pop();
    resolved.name = name.to_string();
    Ok(resolved)
}

impl Registry {
    /// Registry of the models shipped with the crate.
    pub fn builtin() -> Result<Self, EpsonError> {
        Self::from_json(BUILTIN_MODELS)
    }

    pub fn from_json(json: &str) -> Result<Self, EpsonError> {
        Self::from_table(parse_table(json)?)
    }

    /// Build a registry from raw records, resolving inheritance and aliases
    /// and validating every model.
    pub fn from_table(source: BTreeMap<String, ModelConfig>) -> Result<Self, EpsonError> {
        let mut models = BTreeMap::new();
        let mut aliases = BTreeMap::new();

        for name in source.keys() {
            let resolved = resolve(&source, name, &mut Vec::new())?;
            resolved.validate()?;
            for alias in &resolved.alias {
                if source.contains_key(alias) {
                    return Err(EpsonError::Registry(format!(
                        "{name}: alias {alias} is also a model name"
                    )));
                }
                if let Some(other) = aliases.insert(alias.clone(), name.clone()) {
                    return Err(EpsonError::Registry(format!(
                        "alias {alias} claimed by both {other} and {name}"
                    )));
                }
            }
            models.insert(name.clone(), Arc::new(resolved));
        }

        log::debug!("model registry: {} models, {} aliases", models.len(), aliases.len());
        Ok(Self {
            source,
            models,
            aliases,
        })
    }

    /// A new registry combining this one with an externally parsed table.
    pub fn load(
        &self,
        table: BTreeMap<String, ModelConfig>,
        mode: LoadMode,
    ) -> Result<Self, EpsonError> {
        let mut source = match mode {
            LoadMode::Merge => self.source.clone(),
            LoadMode::Replace => BTreeMap::new(),
        };
        source.extend(table);
        Self::from_table(source)
    }

    pub fn load_json(&self, json: &str, mode: LoadMode) -> Result<Self, EpsonError> {
        self.load(parse_table(json)?, mode)
    }

    /// Canonical model name for a model name or alias.
    pub fn canonical_name(&self, name: &str) -> Option<&str> {
        if let Some((canonical, _)) = self.models.get_key_value(name) {
            return Some(canonical);
        }
        self.aliases.get(name).map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Result<Arc<ModelConfig>, EpsonError> {
        self.canonical_name(name)
            .and_then(|n| self.models.get(n))
            .cloned()
            .ok_or_else(|| EpsonError::UnknownModel(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.canonical_name(name).is_some()
    }

    /// Canonical model names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Models whose keys match every key given.
    pub fn models_sharing_keys(
        &self,
        read_key: Option<ReadKey>,
        write_key: Option<WriteKey>,
    ) -> Vec<&str> {
        self.models
            .values()
            .filter(|m| read_key.is_none() || m.read_key == read_key)
            .filter(|m| write_key.is_none() || m.write_key == write_key)
            .map(|m| m.name.as_str())
            .collect()
    }

    /// Distinct known write keys, those of models sharing `read_key` first.
    pub fn known_write_keys(&self, read_key: Option<ReadKey>) -> Vec<WriteKey> {
        let mut seen = BTreeSet::new();
        let (matching, rest): (Vec<_>, Vec<_>) = self
            .models
            .values()
            .partition(|m| read_key.is_some() && m.read_key == read_key);
        matching
            .into_iter()
            .chain(rest)
            .filter_map(|m| m.write_key)
            .filter(|k| seen.insert(*k.label()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_loads() {
        let reg = Registry::builtin().unwrap();
        assert!(reg.len() >= 17);
        let xp205 = reg.get("XP-205").unwrap();
        assert_eq!(xp205.read_key, Some(ReadKey([25, 7])));
        assert_eq!(xp205.write_key.unwrap().label(), b"Wakatobi");
        assert_eq!(xp205.width(), AddressWidth::TwoBytes);
        assert_eq!(xp205.waste_counters.len(), 2);
        assert_eq!(xp205.stats["Total print page counter"], vec![167, 166, 165, 164]);
    }

    #[test]
    fn unknown_model() {
        let reg = Registry::builtin().unwrap();
        assert!(matches!(reg.get("XP-9999"), Err(EpsonError::UnknownModel(ref n)) if n == "XP-9999"));
        assert!(!reg.contains("XP-9999"));
    }

    #[test]
    fn alias_resolves_to_same_record() {
        let reg = Registry::builtin().unwrap();
        let a = reg.get("XP-200").unwrap();
        let b = reg.get("XP-205").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.canonical_name("XP-207"), Some("XP-205"));
    }

    #[test]
    fn same_as_inherits_unset_fields() {
        let reg = Registry::builtin().unwrap();
        let xp830 = reg.get("XP-830").unwrap();
        assert_eq!(xp830.read_key, Some(ReadKey([40, 9])));
        assert_eq!(xp830.write_key.unwrap().label(), b"Irisgarm");
        assert_eq!(xp830.waste_counters.len(), 2);
        assert_eq!(xp830.name, "XP-830");
        // the base keeps its own tables
        assert!(reg.get("XP-530").unwrap().waste_counters.is_empty());
    }

    #[test]
    fn merge_overrides_and_adds() {
        let reg = Registry::builtin().unwrap();
        let before = reg.len();
        let merged = reg
            .load_json(
                r#"{
                    "XP-205": { "read_key": [1, 2] },
                    "ET-2720": { "read_key": [151, 7], "write_key": "Maribaya" }
                }"#,
                LoadMode::Merge,
            )
            .unwrap();
        assert_eq!(merged.len(), before + 1);
        assert_eq!(merged.get("XP-205").unwrap().read_key, Some(ReadKey([1, 2])));
        // merge replaces the whole record
        assert!(merged.get("XP-205").unwrap().waste_counters.is_empty());
        assert!(merged.contains("ET-2720"));
        // the original registry is untouched
        assert_eq!(reg.get("XP-205").unwrap().read_key, Some(ReadKey([25, 7])));
    }

    #[test]
    fn replace_drops_existing_models() {
        let reg = Registry::builtin().unwrap();
        let replaced = reg
            .load_json(r#"{ "ET-2720": { "read_key": [151, 7] } }"#, LoadMode::Replace)
            .unwrap();
        assert_eq!(replaced.names().collect::<Vec<_>>(), vec!["ET-2720"]);
        assert!(!replaced.contains("XP-205"));
    }

    #[test]
    fn rejects_short_write_key() {
        let err = Registry::from_json(r#"{ "X": { "write_key": "short" } }"#).unwrap_err();
        assert!(matches!(err, EpsonError::Registry(_)));
    }

    #[test]
    fn rejects_address_wider_than_model() {
        let err = Registry::from_json(r#"{ "X": { "serial_number": [256] } }"#).unwrap_err();
        assert!(matches!(err, EpsonError::Registry(ref m) if m.contains("0x0100")));
        assert!(Registry::from_json(r#"{ "X": { "address_width": 2, "serial_number": [256] } }"#).is_ok());
    }

    #[test]
    fn rejects_bad_divider() {
        let json = r#"{ "X": { "waste_counters": [ { "name": "main", "addresses": [1], "divider": 0 } ] } }"#;
        assert!(Registry::from_json(json).is_err());
    }

    #[test]
    fn rejects_inheritance_problems() {
        assert!(Registry::from_json(r#"{ "A": { "same_as": "B" } }"#).is_err());
        assert!(Registry::from_json(r#"{ "A": { "same_as": "B" }, "B": { "same_as": "A" } }"#).is_err());
    }

    #[test]
    fn rejects_alias_conflicts() {
        assert!(Registry::from_json(r#"{ "A": { "alias": ["B"] }, "B": {} }"#).is_err());
        assert!(Registry::from_json(r#"{ "A": { "alias": ["C"] }, "B": { "alias": ["C"] } }"#).is_err());
    }

    #[test]
    fn rejects_bad_command_template() {
        let json = r#"{ "X": { "commands": { "status": { "id": "sta", "payload": [1] } } } }"#;
        assert!(Registry::from_json(json).is_err());
    }

    #[test]
    fn default_commands() {
        let reg = Registry::builtin().unwrap();
        let m = reg.get("L355").unwrap();
        let st = m.command("status").unwrap();
        assert_eq!(st.id, "st");
        assert_eq!(st.payload, vec![1]);
        assert!(m.command("nope").is_none());
    }

    #[test]
    fn keys_shared_between_models() {
        let reg = Registry::builtin().unwrap();
        let mut same = reg.models_sharing_keys(Some(ReadKey([40, 9])), None);
        same.sort();
        assert_eq!(same, vec!["XP-530", "XP-630", "XP-830"]);
        let both = reg.models_sharing_keys(Some(ReadKey([121, 4])), WriteKey::try_from(&b"Gossypiu"[..]).ok());
        assert_eq!(both, vec!["XP-510", "XP-610"]);
    }

    #[test]
    fn known_write_keys_prefer_matching_read_key() {
        let reg = Registry::builtin().unwrap();
        let keys = reg.known_write_keys(Some(ReadKey([20, 4])));
        assert_eq!(keys[0].label(), b"Firmiana");
        let labels: BTreeSet<_> = keys.iter().map(|k| *k.label()).collect();
        assert_eq!(labels.len(), keys.len());
        assert!(labels.contains(b"Wakatobi"));
    }

    #[test]
    fn tag_table_follows_record() {
        let cfg = ModelConfig {
            status_tags: Some(vec![0x01]),
            wide_length_tags: vec![0x60],
            ..Default::default()
        };
        let tags = cfg.tag_table();
        assert!(tags.is_supported(0x01));
        assert!(!tags.is_supported(0x0F));
        assert_eq!(tags.length_policy(0x60), crate::status::LengthPolicy::U16Le);
    }
}
