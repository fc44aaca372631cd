//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use commandlink_auth::DEFAULT_EXPIRY_DELTA;

/// Issue relay tokens and drive remote minions.
#[derive(Parser, Debug)]
#[command(name = "commandlink")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Vault file (overrides REMOTE_VAULT)
    #[arg(long, global = true)]
    pub vault: Option<PathBuf>,

    /// PEM file with the user's RSA private key (overrides REMOTE_USER_KEY)
    #[arg(long, global = true)]
    pub user_key: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one command, e.g. `run -k Keys/Root user check`
    Run(RemoteArgs),
    /// Read commands line by line, keeping relay sessions open between them
    Shell,
}

/// One remote command: `<object> <action> [tokens...]` plus its options.
#[derive(Args, Debug, Clone, Default)]
pub struct RemoteArgs {
    /// Overwrite an existing record with the same title
    #[arg(long)]
    pub force: bool,

    /// Folder for created records
    #[arg(short, long)]
    pub folder: Option<String>,

    /// Root key record used for signing
    #[arg(short = 'k', long)]
    pub root_key: Option<String>,

    /// Token scope; repeat to mint several, replacing the default
    #[arg(short, long = "role")]
    pub roles: Vec<String>,

    /// Acting login (overrides REMOTE_USER)
    #[arg(short, long)]
    pub user_id: Option<String>,

    /// Target minion
    #[arg(short, long)]
    pub minion_id: Option<String>,

    /// Lifetime of minted minion tokens, in seconds
    #[arg(short, long = "expire-token-delta", default_value_t = DEFAULT_EXPIRY_DELTA)]
    pub expire_token_delta: u64,

    /// enterprise add|check, minion add|cmd|exit|ping,
    /// user add|check|connect|disconnect|list|receive|connectSocket
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// A line typed into the shell.
#[derive(Parser, Debug)]
#[command(name = "commandlink", no_binary_name = true)]
pub struct ShellLine {
    #[command(flatten)]
    pub args: RemoteArgs,
}
