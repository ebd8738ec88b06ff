use clap::{Parser, Subcommand};
use log::info;
use peer::master::DEFAULT_FIRE_SPACING;
use peer::{GameMaster, PeerConfig, TcpTransport};
use shared::{PeerId, DEFAULT_DIRECTORY_ADDR, DEFAULT_ROOT_NAME};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Game master for volley players", long_about = None)]
struct Args {
    /// Directory service address
    #[arg(short = 'd', long, default_value = DEFAULT_DIRECTORY_ADDR)]
    directory: String,

    /// Root name players publish under
    #[arg(short = 'r', long, default_value = DEFAULT_ROOT_NAME)]
    root: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the ids of all published players
    List,
    /// Kick every player's balls
    Kick,
    /// Ask one player to leave
    Quit { id: PeerId },
    /// Launch rounds of balls, one per player per round
    Fire {
        #[arg(default_value = "1")]
        count: usize,
        /// Delay between balls in milliseconds
        #[arg(long)]
        spacing_ms: Option<u64>,
    },
    /// Set gravity on every player
    Gravity { value: f32 },
    /// Set the pause duration in seconds on every player
    Pause { seconds: f32 },
    /// Send a named command to every player
    Command { name: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = PeerConfig {
        root_name: args.root,
        directory_addr: args.directory,
        lookup_timeout: Duration::from_secs(5),
        ..PeerConfig::default()
    };

    let transport = Arc::new(TcpTransport::new(&config));
    let master = GameMaster::connect(&config, transport).await?;

    match args.command {
        Command::List => {
            let players = master.players();
            if players.is_empty() {
                println!("No players");
            }
            for id in players {
                println!("{}", id);
            }
        }
        Command::Kick => master.kick().await?,
        Command::Quit { id } => master.quit(id).await?,
        Command::Fire { count, spacing_ms } => {
            let spacing = spacing_ms.map_or(DEFAULT_FIRE_SPACING, Duration::from_millis);
            let fired = master.fire_balls(count, spacing).await?;
            info!("Launched {} balls", fired);
        }
        Command::Gravity { value } => master.set_gravity(value).await?,
        Command::Pause { seconds } => master.set_pause_duration(seconds).await?,
        Command::Command { name } => master.do_master_command(&name).await?,
    }

    Ok(())
}
