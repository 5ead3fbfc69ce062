pub mod cache;
pub mod dispatch;
pub mod fetch;
pub mod wait;

pub use dispatch::dispatch;

use podbench_auth::{AuthConfig, PodClient};

use crate::exit_codes;

/// Client from the environment, enrolled unless `enroll` is false.
///
/// Failures are reported on stderr and turned into an exit code.
pub(crate) async fn build_client(enroll: bool) -> Result<PodClient, i32> {
    let client = PodClient::new(AuthConfig::from_env())
        .await
        .map_err(report)?;
    if enroll {
        client.init().await.map_err(report)?;
    }
    Ok(client)
}

pub(crate) fn report(err: podbench_auth::AuthError) -> i32 {
    eprintln!("error: {err}");
    exit_codes::for_error(&err)
}
