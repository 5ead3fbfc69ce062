use super::{cache, fetch, wait};
use crate::cli::args::{Cli, Command};

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Fetch(args) => fetch::run(args).await,
        Command::Wait(args) => wait::run(args).await,
        Command::Cache(cmd) => cache::run(cmd).await,
    }
}
