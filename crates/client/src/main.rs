mod input;

use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;

use aloft::{Client, ClientConfig, ClientEvent, ClientState};
use input::Command;

#[derive(Parser)]
#[command(name = "aloft-client")]
#[command(about = "Headless Aloft client")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:4242",
        help = "Server address to connect to"
    )]
    server: String,

    #[arg(short, long, default_value = "")]
    nickname: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut client = Client::new(ClientConfig {
        nickname: args.nickname,
        ..Default::default()
    })?;
    client.connect(args.server.as_str())?;

    let lines = input::spawn_reader();
    let mut last_poll = Instant::now();

    loop {
        let now = Instant::now();
        client.poll((now - last_poll).as_secs_f32())?;
        last_poll = now;

        for event in client.drain_events() {
            report(&event);
        }
        if let ClientState::Closed(_) = client.state() {
            break;
        }

        for line in lines.try_iter() {
            match Command::parse(&line) {
                Ok(command) => execute(&mut client, command)?,
                Err(e) => log::warn!("{}", e),
            }
        }

        std::thread::sleep(Duration::from_millis(5));
    }
    Ok(())
}

fn execute(client: &mut Client, command: Command) -> Result<()> {
    if let Some(delta) = command.player_delta() {
        client.request_player_delta(delta)?;
        return Ok(());
    }
    match command {
        Command::Chat(message) => client.chat(&message)?,
        Command::RCon(command) => client.rcon(&command)?,
        Command::Spawn => client.request_spawn()?,
        Command::Action { action, state } => client.do_action(action, state)?,
        Command::Quit => client.disconnect()?,
        Command::Nick(_) | Command::Team(_) => {}
    }
    Ok(())
}

fn report(event: &ClientEvent) {
    match event {
        ClientEvent::Joined { pid } => log::info!("Joined as player {}", pid),
        ClientEvent::Arena(event) => log::info!("{}", event),
        ClientEvent::Chat {
            pid,
            nickname,
            message,
        } => match nickname {
            Some(nickname) => log::info!("<{}> {}", nickname, message),
            None => log::info!("<player {}> {}", pid, message),
        },
        ClientEvent::Broadcast(message) => log::info!("[server] {}", message),
        ClientEvent::RCon(message) => log::info!("[rcon] {}", message),
        ClientEvent::Closed(kind) => log::info!("Disconnected ({})", kind.as_str()),
    }
}
