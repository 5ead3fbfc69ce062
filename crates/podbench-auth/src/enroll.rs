//! Identity-provider enrollment and the client-credentials grant.
//!
//! Enrollment walks the pod server's account API:
//!
//! 1. `GET {idp}/.account/` → `controls.password.login`
//! 2. `POST` e-mail + password → `authorization`
//! 3. `GET {idp}/.account/` with `CSS-Account-Token` → `controls.account.clientCredentials`
//! 4. `POST {name, webId}` → `{id, secret}`
//!
//! The access token is then requested at `{idp}/.oidc/token` with the client
//! id/secret and a proof for that endpoint.

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use crate::client::helpers::header_value;
use crate::client::http::HttpBackend;
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::proof::ProofSigner;
use crate::types::{AccessToken, ClientIdentity};

#[derive(Debug, Deserialize)]
struct AccountIndex {
    controls: AccountControls,
}

#[derive(Debug, Default, Deserialize)]
struct AccountControls {
    #[serde(default)]
    password: Option<PasswordControls>,

    #[serde(default)]
    account: Option<AccountLinks>,
}

#[derive(Debug, Deserialize)]
struct PasswordControls {
    login: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountLinks {
    client_credentials: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    authorization: String,
}

/// Account login and client-credential creation against one identity provider.
#[derive(Debug)]
pub(crate) struct Enrollment<'a> {
    http: &'a HttpBackend,
    config: &'a AuthConfig,
}

impl<'a> Enrollment<'a> {
    pub(crate) fn new(http: &'a HttpBackend, config: &'a AuthConfig) -> Self {
        Self { http, config }
    }

    fn idp_base(&self) -> &str {
        self.config.idp_url.trim_end_matches('/')
    }

    /// Log in and create client credentials for the configured WebID.
    pub(crate) async fn enroll(&self) -> AuthResult<ClientIdentity> {
        let email = self.config.email.as_deref().ok_or_else(|| AuthError::Config {
            message: "account e-mail is not set".to_string(),
        })?;
        let web_id = self.config.web_id.as_deref().ok_or_else(|| AuthError::Config {
            message: "WebID is not set".to_string(),
        })?;
        let account_url = format!("{}/.account/", self.idp_base());

        let index: AccountIndex = self.get_step(&account_url, None).await?;
        let login_url = index
            .controls
            .password
            .map(|p| p.login)
            .ok_or_else(|| enrollment_error("account index has no password login control"))?;

        let response = self
            .http
            .post_json(
                &login_url,
                &serde_json::json!({ "email": email, "password": self.config.password }),
                HeaderMap::new(),
            )
            .await?;
        let login: LoginResponse = read_step(response, "login").await?;
        let account_token = format!("CSS-Account-Token {}", login.authorization);
        debug!(email = %email, "logged in to identity provider");

        let index: AccountIndex = self.get_step(&account_url, Some(&account_token)).await?;
        let credentials_url = index
            .controls
            .account
            .map(|a| a.client_credentials)
            .ok_or_else(|| enrollment_error("account index has no client credentials control"))?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(&account_token)?);
        let response = self
            .http
            .post_json(
                &credentials_url,
                &serde_json::json!({ "name": self.config.credential_name, "webId": web_id }),
                headers,
            )
            .await?;
        let identity: ClientIdentity = read_step(response, "client credentials request").await?;

        info!(web_id = %web_id, "client credentials issued");
        Ok(identity)
    }

    /// Client-credentials grant bound to the signer's key.
    pub(crate) async fn request_access_token(
        &self,
        identity: &ClientIdentity,
        signer: &dyn ProofSigner,
    ) -> AuthResult<AccessToken> {
        let token_url = format!("{}/.oidc/token", self.idp_base());
        let basic = STANDARD.encode(format!(
            "{}:{}",
            uri_component(&identity.id),
            uri_component(&identity.secret)
        ));
        let proof = signer.sign(&token_url, Method::POST.as_str())?;

        let request = self
            .http
            .request(Method::POST, &token_url)
            .header(AUTHORIZATION, header_value(&format!("Basic {}", basic))?)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header("dpop", header_value(&proof)?)
            .body("grant_type=client_credentials&scope=webid");
        let response = self.http.send(request).await?;
        let token: AccessToken = read_step(response, "access token request").await?;

        debug!(token_type = %token.token_type, "access token obtained");
        Ok(token)
    }

    async fn get_step<T: DeserializeOwned>(
        &self,
        url: &str,
        authorization: Option<&str>,
    ) -> AuthResult<T> {
        let mut request = self.http.request(Method::GET, url);
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, header_value(authorization)?);
        }
        let response = self.http.send(request).await?;
        read_step(response, "account index").await
    }
}

async fn read_step<T: DeserializeOwned>(response: Response, step: &str) -> AuthResult<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(enrollment_error(&format!(
            "{} failed (HTTP {}): {}",
            step,
            status.as_u16(),
            text
        )));
    }
    response
        .json()
        .await
        .map_err(|e| enrollment_error(&format!("{} returned an unexpected body: {}", step, e)))
}

fn enrollment_error(message: &str) -> AuthError {
    AuthError::Enrollment {
        message: message.to_string(),
    }
}

/// Percent-encode like a URI component (spaces as `%20`).
fn uri_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
