use clap::{Parser, Subcommand};
use turnbot::dispatch::TurnProcessor;
use turnbot::telemetry::TelemetrySink;
use turnbot::turn::Turn;

#[derive(Parser)]
#[command(name = "turnbot")]
#[command(about = "Turnbot CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: TURNBOT_CONFIG_PATH or ~/.turnbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the gateway (HTTP turn endpoint plus configured channels such as Telegram).
    Gateway {
        /// Config file path (default: TURNBOT_CONFIG_PATH or ~/.turnbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 3978)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Chat with the bot in this terminal; each line is one turn.
    Chat {
        /// Config file path (default: TURNBOT_CONFIG_PATH or ~/.turnbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Conversation id to use (default: a new random id).
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("turnbot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat {
            config,
            conversation,
        }) => {
            if let Err(e) = run_chat(config, conversation).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(turnbot::config::default_config_path);
    let dir = turnbot::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = turnbot::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{}",
        config.gateway.bind,
        config.gateway.port
    );
    turnbot::gateway::run_gateway(config, path).await
}

async fn run_chat(
    config_path: Option<std::path::PathBuf>,
    conversation: Option<String>,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (config, path) = turnbot::config::load_config(config_path)?;
    let (dispatcher, telemetry) = turnbot::gateway::build_dispatcher(&config, &path).await?;
    let processor: &dyn TurnProcessor = dispatcher.as_ref();
    let telemetry: &dyn TelemetrySink = telemetry.as_ref();

    let conversation_id = conversation.unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));
    let sender = std::env::var("USER").ok().filter(|s| !s.is_empty());
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim_end_matches(['\r', '\n']);
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        let mut turn = Turn::message("cli", conversation_id.as_str(), input);
        if let Some(ref name) = sender {
            turn = turn.with_sender(name.as_str());
        }
        let reply = turnbot::gateway::respond(processor, telemetry, &turn).await;
        println!("< {}", reply.trim_end());
    }

    Ok(())
}
