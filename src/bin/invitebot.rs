use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use invitebot::{config, read_config, CommandEvent, InviteHandler, Reply};

/// Runs one `invite` command against your registration service, the same
/// way the bot would when it's asked in a room.
#[derive(Parser, Debug)]
#[command(version)]
struct Opts {
    /// Path to the config file. Defaults to ~/.invitebot/config.toml
    #[arg(long, env = "INVITEBOT_CONFIG")]
    config: Option<PathBuf>,

    /// The user to act as, e.g. @alice:example.org
    #[arg(long, env = "INVITEBOT_SENDER")]
    sender: Option<String>,

    /// Only check that the config file is valid
    #[arg(long)]
    check: bool,

    /// What follows `invite` in a chat message, e.g. `generate` or `status <token>`
    command: Vec<String>,
}

// Prints replies instead of sending them to a room.
struct ConsoleEvent {
    sender: String,
}

#[async_trait]
impl CommandEvent for ConsoleEvent {
    fn sender(&self) -> &str {
        &self.sender
    }

    async fn respond(&self, reply: Reply) -> Result<()> {
        // Not a debug log, this is the output of this command
        if reply.html {
            println!("[html] {}", reply.body);
        } else {
            println!("{}", reply.body);
        }
        Ok(())
    }

    async fn mark_read(&self) -> Result<()> {
        Ok(())
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let opts: Opts = Opts::parse();

    let path = match opts.config {
        Some(p) => p,
        None => config::default_config_path()?,
    };
    let settings = read_config(&path).context(format!("Failed to load the config file {:?}", path))?;
    info!(path = ?path, dialect = settings.dialect.name(), "loaded config");

    if opts.check {
        println!("{:?} is valid", path);
        return Ok(());
    }

    let sender = opts.sender.ok_or(anyhow!(
        "Tell me who is asking with --sender (or $INVITEBOT_SENDER), e.g. --sender @alice:example.org"
    ))?;

    let mut http = reqwest::Client::builder();
    if let Some(timeout) = settings.request_timeout {
        http = http.timeout(timeout);
    }
    let http = http.build().context("Failed to build the HTTP client")?;

    let handler = InviteHandler::new(settings, http);
    let event = ConsoleEvent { sender };

    handler.handle(&event, &opts.command.join(" ")).await
}
