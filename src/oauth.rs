use chrono::{DateTime, Duration, Utc};
use log::debug;
use reqwest::Url;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Access to files created or opened by the app.
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// OAuth client secrets, as downloaded from the Google Cloud console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// The console wraps the secrets in an object named after the client type.
#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum SecretsFile {
    Installed(ClientSecrets),
    Web(ClientSecrets),
}

impl ClientSecrets {
    /// Parse a client secrets document (`{"installed": {...}}` or `{"web": {...}}`).
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        Ok(match serde_json::from_str(json)? {
            SecretsFile::Installed(secrets) | SecretsFile::Web(secrets) => secrets,
        })
    }
}

/// Tokens obtained from a completed authorization.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
}

impl Credentials {
    /// Whether the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        self.expires_at - Duration::seconds(60) <= Utc::now()
    }
}

/// Response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    refresh_token: Option<String>,
    scope: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

impl TokenResponse {
    fn into_credentials(self, previous_refresh: Option<&str>) -> Credentials {
        Credentials {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous_refresh.map(|s| s.to_string())),
            expires_at: Utc::now() + Duration::seconds(self.expires_in),
            scopes: self
                .scope
                .map(|scope| scope.split(' ').map(|s| s.to_string()).collect())
                .unwrap_or_default(),
        }
    }
}

/// Client for the authorization-code flow of a single OAuth application.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    secrets: ClientSecrets,
    redirect_url: String,
    scopes: Vec<String>,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client, secrets: ClientSecrets, redirect_url: String) -> Self {
        Self {
            http,
            secrets,
            redirect_url,
            scopes: vec![DRIVE_FILE_SCOPE.to_string()],
        }
    }

    /// Build the URL the user has to visit to grant access.
    ///
    /// Offline access and forced consent make sure a refresh token is
    /// issued every time, even if the user authorized the app before.
    pub fn authorization_url(&self, state: &str) -> Result<Url> {
        let scope = self.scopes.join(" ");
        Url::parse_with_params(
            &self.secrets.auth_uri,
            &[
                ("response_type", "code"),
                ("client_id", self.secrets.client_id.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("scope", scope.as_str()),
                ("state", state),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|err| Error::ExchangeFailed(format!("invalid auth_uri: {}", err)))
    }

    /// Exchange an authorization code for credentials.
    pub async fn exchange_code(&self, code: &str) -> Result<Credentials> {
        let token = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_url.as_str()),
            ])
            .await?;
        Ok(token.into_credentials(None))
    }

    /// Obtain a new access token using the refresh token.
    pub async fn refresh(&self, credentials: &Credentials) -> Result<Credentials> {
        let refresh_token = credentials
            .refresh_token
            .as_deref()
            .ok_or_else(|| Error::ExchangeFailed("no refresh token issued".to_string()))?;
        let token = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await?;
        Ok(token.into_credentials(Some(refresh_token)))
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let mut form = vec![
            ("client_id", self.secrets.client_id.as_str()),
            ("client_secret", self.secrets.client_secret.as_str()),
        ];
        form.extend_from_slice(params);

        debug!("Requesting token from {}", self.secrets.token_uri);
        let response = self
            .http
            .post(&self.secrets.token_uri)
            .form(&form)
            .send()
            .await
            .map_err(|err| Error::ExchangeFailed(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ExchangeFailed(format!("{}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|err| Error::ExchangeFailed(err.to_string()))
    }
}
