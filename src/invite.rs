use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Days, Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use crate::{
    api::{RegistrationApi, RegistrationClient},
    auth::authorize,
    config::Settings,
    message::{self, InviteDetails, Reply},
};

/// One chat message addressed to the bot, as handed over by the host.
#[async_trait]
pub trait CommandEvent: Send + Sync {
    /// The user who sent the command, e.g. `@alice:example.org`.
    fn sender(&self) -> &str;

    async fn respond(&self, reply: Reply) -> Result<()>;

    async fn mark_read(&self) -> Result<()>;
}

/// Generate a unique invitation code to this matrix homeserver
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "invite", arg_required_else_help = true)]
pub struct InviteArgs {
    #[command(subcommand)]
    pub command: InviteCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum InviteCommand {
    /// Generate a new invitation token.
    Generate,

    /// Return the status of an invite token.
    Status {
        /// The token to look up
        #[arg(default_value = "", hide_default_value = true)]
        token: String,
    },

    /// Disable an existing invite token.
    Revoke {
        /// The token to disable
        #[arg(default_value = "", hide_default_value = true)]
        token: String,
    },

    /// List all tokens that have been generated.
    List,
}

impl InviteCommand {
    pub fn name(&self) -> &'static str {
        match self {
            InviteCommand::Generate => "generate",
            InviteCommand::Status { .. } => "status",
            InviteCommand::Revoke { .. } => "revoke",
            InviteCommand::List => "list",
        }
    }
}

/// Parses what follows `invite` in a chat message.
///
/// Only the sub-command word goes through clap. The token of `status` and
/// `revoke` is the rest of the message as typed (surrounding whitespace
/// trimmed), so it may start with `-` or contain spaces.
pub fn parse_command(args: &str) -> Result<InviteCommand, clap::Error> {
    let args = args.trim();
    let (word, rest) = match args.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (args, ""),
    };

    let mut argv = vec!["invite"];
    if !word.is_empty() {
        argv.push(word);
    }

    let command = match InviteArgs::try_parse_from(argv)?.command {
        InviteCommand::Status { .. } => InviteCommand::Status {
            token: rest.to_string(),
        },
        InviteCommand::Revoke { .. } => InviteCommand::Revoke {
            token: rest.to_string(),
        },
        other => other,
    };

    Ok(command)
}

pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct InviteHandler {
    settings: RwLock<Arc<Settings>>,
    http: reqwest::Client,
    today: Clock,
}

impl InviteHandler {
    pub fn new(settings: Settings, http: reqwest::Client) -> InviteHandler {
        InviteHandler {
            settings: RwLock::new(Arc::new(settings)),
            http,
            today: Arc::new(|| Local::now().date_naive()),
        }
    }

    pub fn with_clock(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Arc::new(today);
        self
    }

    /// Swaps in new settings. Commands already running keep the ones they
    /// started with.
    pub fn reload(&self, settings: Settings) {
        let mut current = self.settings.write().unwrap_or_else(|e| e.into_inner());
        *current = Arc::new(settings);
        info!(dialect = current.dialect.name(), "reloaded invite settings");
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Entry point for a chat message: `args` is everything after `invite`.
    /// Only a failing `respond` on the host side is returned as an error.
    pub async fn handle(&self, event: &dyn CommandEvent, args: &str) -> Result<()> {
        match parse_command(args) {
            Ok(command) => self.run(event, command).await,
            Err(e) => event.respond(Reply::text(e.to_string())).await,
        }
    }

    pub async fn run(&self, event: &dyn CommandEvent, command: InviteCommand) -> Result<()> {
        if let Err(e) = event.mark_read().await {
            warn!(error = %e, "failed to mark the command as read");
        }

        let settings = self.settings();
        let sender = event.sender();
        info!(sender = %sender, command = command.name(), "handling invite command");

        if authorize(&self.http, &settings, sender).await.is_none() {
            warn!(sender = %sender, command = command.name(), "sender may not manage invitations");
            return event.respond(message::permission_denied()).await;
        }

        let api = RegistrationClient::new(&self.http, &settings);

        let reply = match command {
            InviteCommand::Generate => self.generate(&settings, &api).await,
            InviteCommand::Status { token } => {
                if token.is_empty() {
                    event.respond(message::missing_token("check")).await?;
                }
                match api.token_status(&token).await {
                    Ok(status) => message::token_status(&token, &status),
                    Err(e) => {
                        warn!(error = %e, "token status request failed");
                        message::request_failed(&e)
                    }
                }
            }
            InviteCommand::Revoke { token } => {
                if token.is_empty() {
                    event.respond(message::missing_token("revoke")).await?;
                }
                match api.revoke_token(&token).await {
                    Ok(result) => {
                        info!(sender = %sender, token = %token, "revoked invite token");
                        message::json_block(&result)
                    }
                    Err(e) => {
                        warn!(error = %e, "revoke request failed");
                        message::request_failed(&e)
                    }
                }
            }
            InviteCommand::List => match api.list_tokens().await {
                Ok(tokens) => message::json_block(&tokens),
                Err(e) => {
                    warn!(error = %e, "list request failed");
                    message::request_failed(&e)
                }
            },
        };

        event.respond(reply).await
    }

    async fn generate(&self, settings: &Settings, api: &RegistrationClient<'_>) -> Reply {
        let expires_on = match (self.today)().checked_add_days(Days::new(settings.expiration_days)) {
            Some(d) => d,
            None => {
                error!(days = settings.expiration_days, "expiration is out of range");
                return Reply::text(format!(
                    "The configured expiration of {} days is out of range.",
                    settings.expiration_days
                ));
            }
        };
        let expiration = settings.dialect.format_expiration(expires_on);

        let created = match api.create_token(&expiration).await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "failed to create an invite token");
                return message::generate_failed(&e);
            }
        };
        info!(token = %created.name, expires = %expiration, "created invite token");

        message::invite_created(
            settings.message.as_ref(),
            &InviteDetails {
                token: &created.name,
                reg_url: &settings.reg_url,
                reg_page: &settings.reg_page,
                expiration_days: settings.expiration_days,
            },
        )
    }
}
