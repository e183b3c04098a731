use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "turnitq")]
#[command(author, version, about = "Telegram bot issuing similarity and AI-writing reports", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the bot (default)
    Run {
        /// Use webhook mode instead of long polling (needs PUBLIC_BASE_URL)
        #[arg(long)]
        webhook: bool,
    },

    /// Zero today's usage counters now
    ResetDaily,

    /// Downgrade subscriptions whose expiry has passed
    ExpireSubscriptions,

    /// Print account and submission counts
    Stats,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
