use clap::Parser;
use directory::DirectoryServer;
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Name service for volley players", long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "23000")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    let server = DirectoryServer::bind(&address).await?;
    server
        .run_until(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down gracefully...");
            }
        })
        .await?;

    Ok(())
}
