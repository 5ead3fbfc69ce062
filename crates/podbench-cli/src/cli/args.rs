use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "podbench",
    version,
    about = "Authorized requests against UMA-protected data pods"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Request a resource, resolving UMA challenges on the way
    Fetch(FetchArgs),
    /// Block until a resource reports readiness on its event stream
    Wait(WaitArgs),
    /// Manage the on-disk authorization cache
    #[command(subcommand)]
    Cache(CacheCmd),
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Resource URL
    pub url: String,

    /// HTTP method
    #[arg(long, short = 'X', default_value = "GET")]
    pub method: String,

    /// Extra request header as `Name: value` (repeatable)
    #[arg(long = "header", short = 'H', value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Request body
    #[arg(long, short = 'd')]
    pub data: Option<String>,

    /// Skip enrollment; only public resources and cached credentials work
    #[arg(long)]
    pub no_enroll: bool,
}

#[derive(Args, Debug, Clone)]
pub struct WaitArgs {
    /// Resource URL
    pub url: String,

    /// Event that signals readiness
    #[arg(long, default_value = "up-to-date")]
    pub event: String,

    /// Stream path appended to the resource URL
    #[arg(long, default_value = "events")]
    pub events_path: String,
}

#[derive(Subcommand, Debug)]
pub enum CacheCmd {
    /// Delete the cache file
    Reset(CacheResetArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CacheResetArgs {
    /// Cache file (default: PODBENCH_CACHE_FILE or .cache)
    #[arg(long)]
    pub file: Option<PathBuf>,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in `{raw}`"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
