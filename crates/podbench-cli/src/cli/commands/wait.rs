use podbench_auth::ReadinessOptions;

use super::{build_client, report};
use crate::cli::args::WaitArgs;
use crate::exit_codes;

pub async fn run(args: WaitArgs) -> anyhow::Result<i32> {
    let client = match build_client(true).await {
        Ok(client) => client,
        Err(code) => return Ok(code),
    };

    let options = ReadinessOptions::default()
        .with_ready_event(&args.event)
        .with_event_path(&args.events_path);

    match client.wait_until_ready(&args.url, &options).await {
        Ok(()) => {
            eprintln!("ready: {}", args.url);
            Ok(exit_codes::SUCCESS)
        }
        Err(e) => Ok(report(e)),
    }
}
