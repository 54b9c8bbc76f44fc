//! HTTP login: trades email + password for a session token.

use std::time::Duration;

use banter_core::AuthToken;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

const LOGIN_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("login rejected: {0}")]
    Rejected(String),

    #[error("login response carried no token")]
    MissingToken,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<LoginData>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginData {
    pub token: Option<String>,
}

impl LoginResponse {
    pub fn into_token(self) -> Result<AuthToken, AuthError> {
        if !self.success {
            return Err(AuthError::Rejected(
                self.message.unwrap_or_else(|| "no reason given".into()),
            ));
        }
        self.data
            .and_then(|d| d.token)
            .filter(|t| !t.trim().is_empty())
            .map(AuthToken::new)
            .ok_or(AuthError::MissingToken)
    }
}

/// POST `{email, password}` to `login_url` and extract the token.
pub async fn login(login_url: &str, email: &str, password: &str) -> Result<AuthToken, AuthError> {
    let client = reqwest::Client::builder().timeout(LOGIN_TIMEOUT).build()?;
    let response: LoginResponse = client
        .post(login_url)
        .json(&LoginRequest { email, password })
        .send()
        .await?
        .json()
        .await?;

    match response.into_token() {
        Ok(token) => {
            info!(email, "login succeeded");
            Ok(token)
        }
        Err(e) => {
            warn!(email, error = %e, "login failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> LoginResponse {
        serde_json::from_str(json).expect("valid login response")
    }

    #[test]
    fn successful_response_yields_token() {
        let token = parse(r#"{"success":true,"data":{"token":"abc123"}}"#)
            .into_token()
            .unwrap();
        assert_eq!(token.as_str(), "abc123");
    }

    #[test]
    fn rejected_response_carries_message() {
        let err = parse(r#"{"success":false,"message":"Invalid credentials"}"#)
            .into_token()
            .unwrap_err();
        assert!(matches!(err, AuthError::Rejected(ref m) if m == "Invalid credentials"));
    }

    #[test]
    fn success_without_token_is_an_error() {
        for json in [
            r#"{"success":true}"#,
            r#"{"success":true,"data":{}}"#,
            r#"{"success":true,"data":{"token":"  "}}"#,
        ] {
            assert!(matches!(parse(json).into_token(), Err(AuthError::MissingToken)));
        }
    }

    #[test]
    fn request_body_uses_email_and_password_fields() {
        let body = serde_json::to_value(LoginRequest {
            email: "a@b.c",
            password: "pw",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"email": "a@b.c", "password": "pw"}));
    }
}
