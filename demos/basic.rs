use epson_ctrl::protocol::{self, Address};
use epson_ctrl::{Printer, Registry, SessionOptions, Transport, TransportError, WriteOutcome};

/// Stands in for an SNMP session: every request times out.
struct Offline;

impl Transport for Offline {
    fn request(&mut self, _address: &Address) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::Timeout)
    }
}

fn main() -> Result<(), epson_ctrl::EpsonError> {
    let model = std::env::args().nth(1).unwrap_or_else(|| "XP-205".to_string());
    let registry = Registry::builtin()?;

    println!("Known models: {}", registry.names().collect::<Vec<_>>().join(", "));

    let config = registry.get(&model)?;
    println!("\n{}:", config.name);
    if let Some(key) = config.read_key {
        println!("  read key:  {key}");
    }
    if let Some(key) = config.write_key {
        println!("  write key: {key} (wire {:?})", key.to_wire());
        if let Some(read_key) = config.read_key {
            println!(
                "  read 0x30:  {}",
                protocol::encode_eeprom_read(0x30, config.width(), read_key)?
            );
        }
    }

    // Dry run: requests are built and logged, nothing is sent.
    let options = SessionOptions {
        dry_run: true,
        ..Default::default()
    };
    let mut printer = Printer::open(&registry, &model, Offline, options)?;
    match printer.reset_waste_ink() {
        Ok(outcomes) => {
            println!("\nWaste ink reset would send:");
            for outcome in outcomes {
                if let WriteOutcome::DryRun(address) = outcome {
                    println!("  {address}");
                }
            }
        }
        Err(e) => println!("\nWaste ink reset unavailable: {e}"),
    }

    let status = protocol::encode_command(&protocol::CMD_STATUS, &[1])?;
    println!("\nStatus request: {status}");

    Ok(())
}
