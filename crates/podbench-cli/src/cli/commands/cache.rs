use podbench_auth::{AuthConfig, PersistentCache};

use super::report;
use crate::cli::args::CacheCmd;
use crate::exit_codes;

pub async fn run(cmd: CacheCmd) -> anyhow::Result<i32> {
    match cmd {
        CacheCmd::Reset(args) => {
            let path = args
                .file
                .unwrap_or_else(|| AuthConfig::from_env().cache_file);
            match PersistentCache::reset(&path).await {
                Ok(()) => {
                    eprintln!("cache reset: {}", path.display());
                    Ok(exit_codes::SUCCESS)
                }
                Err(e) => Ok(report(e)),
            }
        }
    }
}
