use super::tree::{parse_management_tree, EquipmentNode};
use crate::error::{AuthError, FetchError};
use reqwest::{Client, StatusCode};
use serde::Serialize;

const LOGIN_PATH: &str = "rest/v1/login/verify";
const MANAGEMENT_TREE_PATH: &str = "rest/v1/equipment/management_tree";

#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "userName")]
    user_name: &'a str,
    password: &'a str,
}

/// HTTP client for a CyberPower PowerPanel management appliance.
///
/// Credentials are the already-hashed values the PowerPanel web UI sends; the
/// client never sees plaintext passwords.
#[derive(Clone)]
pub struct PowerPanelClient {
    http: Client,
    base_url: String,
    hashed_username: String,
    hashed_password: String,
}

impl PowerPanelClient {
    pub fn new(
        http: Client,
        base_url: &str,
        hashed_username: impl Into<String>,
        hashed_password: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            hashed_username: hashed_username.into(),
            hashed_password: hashed_password.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Runs the login exchange and returns the bearer token.
    pub async fn login(&self) -> Result<String, AuthError> {
        let payload = LoginRequest {
            user_name: &self.hashed_username,
            password: &self.hashed_password,
        };
        let response = self
            .http
            .post(self.url(LOGIN_PATH))
            .json(&payload)
            .send()
            .await
            .map_err(AuthError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status(status));
        }
        let body = response.text().await.map_err(AuthError::Transport)?;
        parse_login_token(&body)
    }

    pub async fn fetch_management_tree(
        &self,
        token: &str,
    ) -> Result<Vec<EquipmentNode>, FetchError> {
        let response = self
            .http
            .get(self.url(MANAGEMENT_TREE_PATH))
            .bearer_auth(token)
            .send()
            .await
            .map_err(FetchError::Transport)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Unauthorized(status));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        let body = response.bytes().await.map_err(FetchError::Transport)?;
        let tree = parse_management_tree(&body).map_err(FetchError::Decode)?;
        Ok(tree.children)
    }
}

/// Extracts the token from a `"<scheme> <token>"` login response body.
pub fn parse_login_token(body: &str) -> Result<String, AuthError> {
    let header = body.trim().trim_matches('"');
    let parts: Vec<&str> = header.split_whitespace().collect();
    match parts.as_slice() {
        [_scheme, token] => Ok((*token).to_string()),
        _ => Err(AuthError::MalformedToken { parts: parts.len() }),
    }
}
