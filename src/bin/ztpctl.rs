//! `ztpctl`: operator CLI for the Command RPC surface, mirroring the
//! original `cli.py`'s `device`/`opt82` mode split over a request/reply
//! socket — here a newline-delimited-JSON TCP connection instead of a zmq
//! REQ socket (§6 "[ADDED] Transport framing").

use std::io::Write as _;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(name = "ztpctl", about = "Operator CLI for the ztpd command RPC")]
struct Args {
    /// `host:port` of the running ztpd's command RPC.
    #[arg(long, default_value = "127.0.0.1:9001")]
    command_socket: String,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Device inventory and adoption commands.
    Device {
        #[command(subcommand)]
        command: DeviceCommand,
    },
    /// Option-82 relay association commands.
    Opt82 {
        #[command(subcommand)]
        command: Opt82Command,
    },
}

#[derive(Subcommand, Debug)]
enum DeviceCommand {
    /// List known devices.
    List,
    /// Show a device's CDP neighbor dump.
    NeighborInfo { id: i64 },
    /// Delete a device by id.
    Delete { id: i64 },
    /// Adopt a device by id, reading its target configuration from a file.
    AdoptById {
        id: i64,
        #[arg(short, long)]
        identity: String,
        #[arg(short = 'f', long)]
        config_file: std::path::PathBuf,
    },
    /// Adopt the single READY/CONFIGURE_FAILED device matching a (partial) MAC.
    AdoptByMac {
        mac: String,
        #[arg(short, long)]
        identity: String,
        #[arg(short = 'f', long)]
        config_file: std::path::PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum Opt82Command {
    /// List recorded associations.
    List,
    /// Delete an association by id.
    Delete { id: i64 },
    /// Set (upsert) an association's downstream identity.
    Set {
        #[arg(long)]
        upstream_mac: String,
        #[arg(long)]
        upstream_port: String,
        #[arg(long)]
        downstream_name: String,
    },
}

struct RpcClient {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl RpcClient {
    async fn connect(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
        })
    }

    async fn call(&mut self, request: Value) -> std::io::Result<Value> {
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;

        let mut response = String::new();
        self.reader.read_line(&mut response).await?;
        Ok(serde_json::from_str(response.trim()).unwrap_or(json!({"error": "malformed reply"})))
    }
}

fn print_error_or<F: FnOnce(&Value)>(reply: &Value, on_ok: F) {
    if let Some(error) = reply.get("error") {
        println!("{error}");
    } else {
        on_ok(reply);
    }
}

fn print_device_table(devices: &[Value]) {
    for device in devices {
        println!(
            "{:<6} {:<16} {:<12} {:<16} {:<16} {:<18} {:<16}",
            device["id"],
            device["identifier"].as_str().unwrap_or(""),
            device["device_class"].as_str().unwrap_or(""),
            device["device_type"].as_str().unwrap_or(""),
            device["address"].as_str().unwrap_or(""),
            device["mac_address"].as_str().unwrap_or(""),
            device["state"].as_str().unwrap_or(""),
        );
    }
}

fn print_opt82_table(rows: &[Value]) {
    for row in rows {
        println!(
            "{:<6} {:<18} {:<16} {:<18} {:<16}",
            row["id"],
            row["upstream_switch_mac"].as_str().unwrap_or(""),
            row["upstream_port_info"].as_str().unwrap_or(""),
            row["downstream_switch_mac"].as_str().unwrap_or("-"),
            row["downstream_switch_name"].as_str().unwrap_or("-"),
        );
    }
}

async fn adopt(client: &mut RpcClient, id: i64, identity: &str, config_file: &std::path::Path) -> std::io::Result<()> {
    let configuration = std::fs::read_to_string(config_file)?;
    let reply = client
        .call(json!({"cmd": "adopt", "id": id, "identity": identity, "config": configuration}))
        .await?;
    if let Some(error) = reply.get("error") {
        println!("{error}");
        return Ok(());
    }

    print!("adopting");
    let _ = std::io::stdout().flush();
    loop {
        print!(".");
        let _ = std::io::stdout().flush();
        let status = client.call(json!({"cmd": "status", "id": id})).await?;
        if status.get("state").and_then(Value::as_str) != Some("CONFIGURING") {
            println!();
            print_device_table(std::slice::from_ref(&status));
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut client = RpcClient::connect(&args.command_socket).await?;

    match args.mode {
        Mode::Device { command } => match command {
            DeviceCommand::List => {
                let reply = client.call(json!({"cmd": "list"})).await?;
                print_device_table(reply.as_array().map(Vec::as_slice).unwrap_or(&[]));
            }
            DeviceCommand::NeighborInfo { id } => {
                let reply = client.call(json!({"cmd": "neighbor-info", "id": id})).await?;
                print_error_or(&reply, |r| println!("{}", r["info"].as_str().unwrap_or("")));
            }
            DeviceCommand::Delete { id } => {
                let reply = client.call(json!({"cmd": "delete", "id": id})).await?;
                print_error_or(&reply, |r| println!("{}", r["info"].as_str().unwrap_or("")));
            }
            DeviceCommand::AdoptById { id, identity, config_file } => {
                adopt(&mut client, id, &identity, &config_file).await?;
            }
            DeviceCommand::AdoptByMac { mac, identity, config_file } => {
                let reply = client.call(json!({"cmd": "list"})).await?;
                let devices = reply.as_array().cloned().unwrap_or_default();
                let needle = mac.replace(':', "").to_lowercase();
                let matches: Vec<i64> = devices
                    .iter()
                    .filter(|d| matches!(d["state"].as_str(), Some("READY") | Some("CONFIGURE_FAILED")))
                    .filter(|d| {
                        d["mac_address"]
                            .as_str()
                            .map(|m| m.replace(':', "").to_lowercase().contains(&needle))
                            .unwrap_or(false)
                    })
                    .filter_map(|d| d["id"].as_i64())
                    .collect();

                match matches.as_slice() {
                    [id] => adopt(&mut client, *id, &identity, &config_file).await?,
                    [] => println!("error: no mac_address matches"),
                    _ => println!("error: multiple mac_address matches"),
                }
            }
        },
        Mode::Opt82 { command } => match command {
            Opt82Command::List => {
                let reply = client.call(json!({"cmd": "opt82-list"})).await?;
                print_opt82_table(reply.as_array().map(Vec::as_slice).unwrap_or(&[]));
            }
            Opt82Command::Delete { id } => {
                let reply = client.call(json!({"cmd": "opt82-delete", "id": id})).await?;
                print_error_or(&reply, |r| println!("{}", r["info"].as_str().unwrap_or("")));
            }
            Opt82Command::Set {
                upstream_mac,
                upstream_port,
                downstream_name,
            } => {
                let reply = client
                    .call(json!({
                        "cmd": "opt82-info",
                        "upstream_switch_mac": upstream_mac,
                        "upstream_port_info": upstream_port,
                        "downstream_switch_name": downstream_name,
                    }))
                    .await?;
                print_error_or(&reply, |r| print_opt82_table(std::slice::from_ref(r)));
            }
        },
    }

    Ok(())
}
