//! Controller Probe Tool
//!
//! Queries one controller on a serial line and prints what it reports.
//! Useful for checking wiring, baud rate and bus address before starting the bridge.
//!
//! Usage:
//!   cargo run --example probe -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: /dev/ttyUSB0)
//!   --baud RATE       Baud rate (default: 115200)
//!   --address N       Bus address 1-254 or * (default: 1)
//!   --timeout MS      Reply timeout in ms (default: 100)
//!   --canonical       Let the line discipline assemble replies
//!   --assign N        Broadcast a new bus address first (one controller only!)

use std::time::Duration;

use steplink_core::prelude::*;
use steplink_core::protocol::LineMode;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut port_name = "/dev/ttyUSB0".to_string();
    let mut config = ChannelConfig::default();
    let mut address = "1".to_string();
    let mut assign: Option<u8> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    port_name = args[i].clone();
                }
            }
            "--baud" | "-b" => {
                i += 1;
                if i < args.len() {
                    config.baud_rate = args[i].parse().unwrap_or(config.baud_rate);
                }
            }
            "--address" | "-a" => {
                i += 1;
                if i < args.len() {
                    address = args[i].clone();
                }
            }
            "--timeout" | "-t" => {
                i += 1;
                if i < args.len() {
                    config.read_timeout_ms = args[i].parse().unwrap_or(config.read_timeout_ms);
                }
            }
            "--canonical" => {
                config.mode = LineMode::Canonical;
            }
            "--assign" => {
                i += 1;
                if i < args.len() {
                    assign = args[i].parse().ok();
                }
            }
            "--help" | "-h" => {
                print_help();
                return;
            }
            arg if !arg.starts_with('-') => {
                port_name = arg.to_string();
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
            }
        }
        i += 1;
    }

    let address: Address = match address.parse() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{}", e);
            return;
        }
    };

    println!("Configuration:");
    println!("  Port:       {}", port_name);
    println!("  Baud rate:  {}", config.baud_rate);
    println!("  Address:    {}", address);
    println!("  Timeout:    {}ms", config.read_timeout_ms);
    println!("  Line mode:  {:?}", config.mode);
    println!();

    let channel = match Channel::open(&port_name, config) {
        Ok(c) => c.into_shared(),
        Err(e) => {
            eprintln!("Failed to open port: {}", e);
            eprintln!("Make sure the port exists and you have permission (dialout group)");
            return;
        }
    };

    let controller = match assign {
        Some(new_address) => match Controller::assign_address(channel, new_address) {
            Ok(c) => {
                println!("Assigned address {}", c.address());
                c
            }
            Err(e) => {
                eprintln!("Address assignment failed: {}", e);
                return;
            }
        },
        None => Controller::new(channel, address),
    };

    report("Firmware", controller.firmware_version());
    report("Status", controller.status());
    report("Position", controller.position());
    report("Position mode", controller.position_mode());
    report("Phase current %", controller.phase_current());
    report("Halt current %", controller.halt_current());

    match controller.current_set() {
        Ok(record) => {
            println!("Current set:");
            for field in record.fields() {
                match field.description {
                    Some(desc) => println!("  {:<18} {:>10}  ({})", field.name, field.value, desc),
                    None => println!("  {:<18} {:>10}", field.name, field.value),
                }
            }
        }
        Err(e) => println!("Current set:      error: {}", e),
    }

    // Exercise the raw engine call with an explicit deadline as well
    match send_command(
        controller.channel(),
        controller.address(),
        Mnemonic::ReadStatus,
        None,
        Duration::from_millis(250),
    ) {
        Ok(value) => println!("Raw status:       {:?}", value),
        Err(e) => println!("Raw status:       error: {}", e),
    }
}

fn report<T: std::fmt::Display>(label: &str, result: Result<T, ProtocolError>) {
    match result {
        Ok(value) => println!("{:<17} {}", format!("{}:", label), value),
        Err(e) if e.is_timeout() => println!("{:<17} no reply (timeout)", format!("{}:", label)),
        Err(e) => println!("{:<17} error: {}", format!("{}:", label), e),
    }
}

fn print_help() {
    println!("Controller Probe Tool");
    println!();
    println!("Usage: probe [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  --port, -p PORT      Serial port (default: /dev/ttyUSB0)");
    println!("  --baud, -b RATE      Baud rate (default: 115200)");
    println!("  --address, -a N      Bus address 1-254 or * (default: 1)");
    println!("  --timeout, -t MS     Reply timeout in ms (default: 100)");
    println!("  --canonical          Let the line discipline assemble replies");
    println!("  --assign N           Broadcast a new bus address first (one controller only)");
    println!("  --help, -h           Show this help");
    println!();
    println!("Set RUST_LOG=steplink_core=trace to see every frame on the wire.");
}
