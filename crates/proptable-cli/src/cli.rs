use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use proptable_types::SettingsGroup;

#[derive(Parser)]
#[command(
    name = "proptable",
    about = "Inspect and edit property table settings files",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the settings files
    #[arg(short, long, global = true)]
    pub dir: Option<PathBuf>,

    /// Settings id of the project whose local scope to use
    #[arg(short, long, global = true)]
    pub local: Option<String>,

    /// TOML table configuration; --dir and --local override it
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ScopeArg {
    Global,
    Local,
    Best,
}

impl From<ScopeArg> for SettingsGroup {
    fn from(s: ScopeArg) -> Self {
        match s {
            ScopeArg::Global => SettingsGroup::Global,
            ScopeArg::Local => SettingsGroup::Local,
            ScopeArg::Best => SettingsGroup::Best,
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// List the properties visible in a scope
    List(ListArgs),
    /// Print one property value
    Get(GetArgs),
    /// Set a property and save its scope
    Set(SetArgs),
    /// Remove a property and save its scope
    Remove(RemoveArgs),
    /// Run the settings schema migration
    Migrate,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(short, long, default_value = "best")]
    pub scope: ScopeArg,
}

#[derive(Args)]
pub struct GetArgs {
    pub name: String,
    #[arg(short, long, default_value = "best")]
    pub scope: ScopeArg,
}

#[derive(Args)]
pub struct SetArgs {
    pub name: String,
    /// JSON value; anything that is not valid JSON is stored as a string
    pub value: String,
    #[arg(short, long, default_value = "global")]
    pub scope: ScopeArg,
    /// Clear the persist flag, which drops the property from the file
    #[arg(long)]
    pub transient: bool,
}

#[derive(Args)]
pub struct RemoveArgs {
    pub name: String,
    #[arg(short, long, default_value = "global")]
    pub scope: ScopeArg,
}
