// Thin launcher binary: wires up the engine and exposes three
// subcommands. All real logic lives in orion-core.

use clap::{Parser, Subcommand};
use orion_core::config::Config;
use orion_core::{auth, Orion};

#[derive(Parser)]
#[command(name = "orion", about = "Persistent multi-provider AI companion runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon and block until interrupted.
    Run,
    /// Run the OAuth device-code flow for "openai" or "gemini".
    Login { provider: String },
    /// Print daemon health and provider status as JSON.
    Status,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    match cli.command {
        Command::Run => run(config).await,
        Command::Login { provider } => login(config, &provider).await,
        Command::Status => status(config).await,
    }
}

async fn run(config: Config) {
    let orion = match Orion::build(config) {
        Ok(orion) => orion,
        Err(e) => {
            eprintln!("failed to assemble engine: {e}");
            std::process::exit(1);
        }
    };

    orion.daemon.start();
    log::info!("[cli] daemon started, waiting for ctrl-c");

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("[cli] failed to install ctrl-c handler: {e}");
    }

    log::info!("[cli] shutting down");
    orion.daemon.stop().await;
}

async fn login(config: Config, provider: &str) {
    let broker = auth::AuthBroker::new(&config);
    match auth::login(&broker, provider).await {
        Ok(()) => println!("Logged in to {provider}."),
        Err(e) => {
            eprintln!("login failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn status(config: Config) {
    let orion = match Orion::build(config) {
        Ok(orion) => orion,
        Err(e) => {
            eprintln!("failed to assemble engine: {e}");
            std::process::exit(1);
        }
    };

    let health = orion.daemon.health();
    let providers = orion.auth.get_provider_status().await;
    let output = serde_json::json!({ "daemon": health, "providers": providers });
    println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
}
