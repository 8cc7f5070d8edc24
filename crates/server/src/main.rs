mod console;

use std::sync::atomic::Ordering;

use anyhow::{Result, bail};
use clap::Parser;

use aloft::engine::ArenaInit;
use aloft::{HostConfig, PacketLossSimulation, Server, ServerConfig};
use console::Console;

#[derive(Parser)]
#[command(name = "aloft-server")]
#[command(about = "Aloft arena server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = aloft::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(long, default_value = "my arena")]
    name: String,

    #[arg(long, default_value = "")]
    motd: String,

    #[arg(long, default_value = "ocean", help = "Map played when the game starts")]
    map: String,

    #[arg(long, help = "Password for the remote console (closed when unset)")]
    rcon_password: Option<String>,

    #[arg(long, help = "Enable global packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let defaults = ServerConfig::default();
    if defaults.maps.load(&args.map).is_none() {
        bail!(
            "unknown map '{}', expected one of: {}",
            args.map,
            defaults.maps.names().join(", ")
        );
    }

    let packet_loss = args
        .simulate_packet_loss
        .then(|| PacketLossSimulation::new(args.loss_percent));

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        arena: ArenaInit {
            name: args.name,
            motd: args.motd,
            next_map: args.map,
            ..Default::default()
        },
        rcon_password: args.rcon_password,
        host: HostConfig {
            max_peers: args.max_clients,
            packet_loss,
            ..Default::default()
        },
        ..defaults
    };

    let mut server = Server::new(&bind_addr, config)?;
    let running = server.running();
    let console = Console::spawn();

    server.run(|server| {
        for line in console.lines() {
            match line.trim() {
                "quit" | "exit" => running.store(false, Ordering::SeqCst),
                "status" => {
                    let stats = server.stats();
                    log::info!(
                        "uptime {:.0}s, {} players, mode {}, {} bytes in, {} bytes out",
                        stats.uptime,
                        stats.players,
                        stats.mode.as_str(),
                        stats.network.bytes_received,
                        stats.network.bytes_sent
                    );
                }
                command => log::info!("{}", server.exec_console(command)),
            }
        }
    })?;

    log::info!("Server shut down");
    Ok(())
}
