//! Clap CLI definitions for the relay.

use clap::{Args, Parser, Subcommand};
use relay_types::message::FormatKind;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  relay channels                                    List configured channel accounts
  relay send -i ops-alerts -b \"disk 95%\"            Send a plain text message
  relay send -i ops-alerts -b \"**down**\" -f markdown --at-all
  relay send -i ops-alerts -b \"deploy done\" --title Deploy --url https://ci/42";

/// Send unified messages through WeChat Work, DingTalk, and webhooks.
#[derive(Parser, Debug)]
#[command(
    name = "relay",
    version,
    about = "Message relay: deliver one message to many chat channels",
    after_help = AFTER_HELP,
)]
pub struct Cli {
    /// Path to config file (default: ~/.relay/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a message through a configured task instance.
    Send(SendArgs),
    /// List configured channel accounts and the formats they accept.
    Channels,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Task instance id from the config file.
    #[arg(long, short = 'i')]
    pub instance: String,

    /// Message body.
    #[arg(long, short = 'b')]
    pub body: String,

    /// Optional title (used for cards, links and markdown headings).
    #[arg(long)]
    pub title: Option<String>,

    /// Optional link URL.
    #[arg(long)]
    pub url: Option<String>,

    /// Native format of the body: text, markdown, or html.
    #[arg(long, short = 'f', default_value = "text")]
    pub format: FormatKind,

    /// Mention everyone in the group.
    #[arg(long)]
    pub at_all: bool,

    /// Mention a user by id (repeatable).
    #[arg(long = "at", value_name = "USER_ID")]
    pub at: Vec<String>,

    /// Print the delivery result as JSON.
    #[arg(long)]
    pub json: bool,
}
