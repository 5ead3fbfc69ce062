use podbench_auth::{AuthError, RequestInit};
use reqwest::Method;

use super::{build_client, report};
use crate::cli::args::FetchArgs;
use crate::exit_codes;

pub async fn run(args: FetchArgs) -> anyhow::Result<i32> {
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| anyhow::anyhow!("invalid HTTP method `{}`", args.method))?;

    let mut init = RequestInit::new();
    for (name, value) in &args.headers {
        init = match init.with_header(name, value) {
            Ok(init) => init,
            Err(e) => return Ok(report(e)),
        };
    }
    if let Some(data) = args.data {
        init = init.with_body(data);
    }

    let client = match build_client(!args.no_enroll).await {
        Ok(client) => client,
        Err(code) => return Ok(code),
    };

    let response = match client.fetch(method.clone(), &args.url, init).await {
        Ok(response) => response,
        Err(e) => return Ok(report(e)),
    };

    let status = response.status();
    tracing::info!(method = %method, url = %args.url, status = status.as_u16(), "fetched");
    eprintln!("HTTP {status}");

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => return Ok(report(AuthError::from(e))),
    };
    print!("{body}");

    if status.is_success() {
        Ok(exit_codes::SUCCESS)
    } else {
        Ok(exit_codes::REQUEST_FAILED)
    }
}
