//! XBee Link Monitor
//!
//! Opens an XBee module in API mode 1, prints every received frame and
//! optionally sends one Transmit Request.
//!
//! Usage:
//!   cargo run --example xbee_monitor -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: platform specific)
//!   --baud RATE       Baud rate (default: 57600)
//!   --timeout MS      Header/payload read timeout in ms (default: 1000)
//!   --config FILE     JSON configuration file
//!   --send TEXT       Send TEXT once connected
//!   --to ADDR         64-bit destination in hex (default: broadcast)
//!   --list            List serial ports and exit
//!
//! Set RUST_LOG=xbee_serial=debug to see frame-level logging.

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;
use xbee_serial::protocol::{
    address, list_ports, Frame, HexFormat, SerialXbee, XbeeConfig, XbeeError,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config = XbeeConfig::default();
    let mut send_text: Option<String> = None;
    let mut target = address::BROADCAST_64;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                config.port_name = value(&args, i, "--port")?.to_string();
            }
            "--baud" | "-b" => {
                i += 1;
                config.baud_rate = value(&args, i, "--baud")?
                    .parse()
                    .context("baud rate must be a number")?;
            }
            "--timeout" | "-t" => {
                i += 1;
                config.read_timeout_ms = value(&args, i, "--timeout")?
                    .parse()
                    .context("timeout must be a number of milliseconds")?;
            }
            "--config" | "-c" => {
                i += 1;
                let path = value(&args, i, "--config")?;
                config = XbeeConfig::from_file(path)
                    .with_context(|| format!("loading {}", path))?;
            }
            "--send" | "-s" => {
                i += 1;
                send_text = Some(value(&args, i, "--send")?.to_string());
            }
            "--to" => {
                i += 1;
                target = parse_address(value(&args, i, "--to")?)?;
            }
            "--list" | "-l" => {
                print_ports();
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            arg if !arg.starts_with('-') => {
                config.port_name = arg.to_string();
            }
            other => {
                eprintln!("Unknown option: {}", other);
            }
        }
        i += 1;
    }

    println!("XBee Link Monitor");
    println!("  Port:          {}", config.port_name);
    println!("  Baud rate:     {}", config.baud_rate);
    println!("  Read timeout:  {}ms", config.read_timeout_ms);
    println!();

    let xbee = SerialXbee::new(config);
    xbee.set_read_handler(|frame: &Frame| match frame {
        Frame::Receive(packet) => {
            println!(
                "<- {:016X} / {:04X}: {:?}",
                packet.source_mac_64(),
                packet.source_mac_16(),
                packet.text()
            );
            println!("   {}", packet.to_hex_string(HexFormat::FieldSpacing));
        }
        other => println!("<- {}", other),
    });
    xbee.set_write_handler(
        |frame: &Frame, outcome: std::result::Result<(), &XbeeError>| match outcome {
            Ok(()) => println!("-> {}", frame.to_hex_string(HexFormat::FieldSpacing)),
            Err(e) => eprintln!("-> write failed: {}", e),
        },
    );

    xbee.connect_with_config()
        .context("make sure the port exists and you have permission (dialout group)")?;

    if let Some(text) = send_text {
        xbee.send_data(text, target, None)?;
    }

    println!("Listening, press Ctrl+C to stop");
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(tokio::signal::ctrl_c())?;

    xbee.stop();
    let stats = xbee.stats();
    println!();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    match args.get(i) {
        Some(v) => Ok(v),
        None => bail!("{} needs a value", flag),
    }
}

fn parse_address(text: &str) -> Result<u64> {
    let digits = text.trim_start_matches("0x").replace(['_', ':'], "");
    u64::from_str_radix(&digits, 16).with_context(|| format!("invalid 64-bit address: {}", text))
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        let marker = if port.is_ftdi() { " (FTDI)" } else { "" };
        println!(
            "{}{}  {}",
            port.name,
            marker,
            port.product.as_deref().unwrap_or("")
        );
    }
}

fn print_help() {
    println!("XBee Link Monitor");
    println!();
    println!("Usage: xbee_monitor [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  --port, -p PORT     Serial port");
    println!("  --baud, -b RATE     Baud rate (default: 57600)");
    println!("  --timeout, -t MS    Read timeout, 0 disables (default: 1000)");
    println!("  --config, -c FILE   JSON configuration file");
    println!("  --send, -s TEXT     Send TEXT once connected");
    println!("  --to ADDR           64-bit destination in hex (default: broadcast)");
    println!("  --list, -l          List serial ports and exit");
    println!("  --help, -h          Show this help");
}
