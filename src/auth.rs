use std::{sync::Arc, time::Duration};

use log::{info, warn};
use rand::{distributions::Alphanumeric, Rng};
use reqwest::Url;

use crate::{
    error::{Error, Result},
    oauth::{Credentials, OAuthClient},
    session::{FlowReceiver, SessionStore, UserId},
};

/// Drives per-user authorizations between the chat and the callback server.
#[derive(Debug)]
pub struct Authorizer {
    oauth: OAuthClient,
    sessions: Arc<SessionStore>,
    timeout: Duration,
}

/// An authorization waiting for the user to visit the URL.
#[derive(Debug)]
pub struct PendingAuthorization {
    url: Url,
    user_id: UserId,
    state: String,
    receiver: FlowReceiver,
    sessions: Arc<SessionStore>,
    timeout: Duration,
}

impl Authorizer {
    pub fn new(oauth: OAuthClient, sessions: Arc<SessionStore>, timeout: Duration) -> Self {
        Self {
            oauth,
            sessions,
            timeout,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Start a new authorization for the user.
    ///
    /// Supersedes any authorization the user already has in progress.
    pub fn begin(&self, user_id: UserId) -> Result<PendingAuthorization> {
        let state: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let url = self.oauth.authorization_url(&state)?;
        let receiver = self.sessions.begin(user_id, state.clone());
        info!("Started authorization for user {}", user_id);

        Ok(PendingAuthorization {
            url,
            user_id,
            state,
            receiver,
            sessions: self.sessions.clone(),
            timeout: self.timeout,
        })
    }

    /// Finish the authorization identified by `state` with the code from the redirect.
    ///
    /// Returns the user the credentials were issued for.
    pub async fn complete(&self, state: &str, code: &str) -> Result<UserId> {
        let flow = self.sessions.take_pending(state).ok_or(Error::AuthExpired)?;
        let user_id = flow.user_id;

        match self.oauth.exchange_code(code).await {
            Ok(credentials) => {
                if flow.resolve(Ok(credentials)) {
                    Ok(user_id)
                } else {
                    warn!("User {} stopped waiting before the exchange finished", user_id);
                    Err(Error::AuthExpired)
                }
            }
            Err(err) => {
                let reason = match &err {
                    Error::ExchangeFailed(reason) => reason.clone(),
                    other => other.to_string(),
                };
                flow.resolve(Err(Error::ExchangeFailed(reason)));
                Err(err)
            }
        }
    }

    /// Fail the authorization identified by `state`, e.g. when the user declined.
    pub fn deny(&self, state: &str, reason: &str) -> Result<UserId> {
        let flow = self.sessions.take_pending(state).ok_or(Error::AuthExpired)?;
        let user_id = flow.user_id;
        flow.resolve(Err(Error::ExchangeFailed(reason.to_string())));
        Ok(user_id)
    }

    /// Credentials for the user, refreshed first if they have expired.
    pub async fn credentials(&self, user_id: UserId) -> Result<Credentials> {
        let credentials = self
            .sessions
            .credentials(user_id)
            .ok_or(Error::AuthPending)?;
        if !credentials.is_expired() {
            return Ok(credentials);
        }

        info!("Refreshing access token for user {}", user_id);
        let refreshed = self.oauth.refresh(&credentials).await?;
        self.sessions.authorize(user_id, refreshed.clone());
        Ok(refreshed)
    }
}

impl PendingAuthorization {
    /// The URL the user has to open.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Wait for the callback, caching the credentials on success.
    ///
    /// Only this task waits; the rest of the bot keeps handling updates.
    pub async fn wait(self) -> Result<Credentials> {
        let PendingAuthorization {
            user_id,
            state,
            receiver,
            sessions,
            timeout,
            ..
        } = self;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(Ok(credentials))) => {
                sessions.authorize(user_id, credentials.clone());
                info!(
                    "User {} authorized for {}",
                    user_id,
                    credentials.scopes.join(" ")
                );
                Ok(credentials)
            }
            Ok(Ok(Err(err))) => Err(err),
            // The flow was superseded by a newer /start
            Ok(Err(_)) => Err(Error::AuthExpired),
            Err(_) => {
                sessions.cancel(&state);
                Err(Error::AuthExpired)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::oauth::ClientSecrets;

    fn authorizer(token_uri: String, timeout: Duration) -> Authorizer {
        let oauth = OAuthClient::new(
            reqwest::Client::new(),
            ClientSecrets {
                client_id: "client-id".to_string(),
                client_secret: "client-secret".to_string(),
                auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
                token_uri,
            },
            "http://localhost:8080/oauth2callback".to_string(),
        );
        Authorizer::new(oauth, Arc::new(SessionStore::new(timeout)), timeout)
    }

    fn state_of(pending: &PendingAuthorization) -> String {
        pending
            .url()
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    async fn token_endpoint() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("code=good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "refresh_token": "refresh",
                "expires_in": 3599
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("code=bad"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn callback_within_timeout_caches_credentials() {
        let server = token_endpoint().await;
        let auth = Arc::new(authorizer(
            format!("{}/token", server.uri()),
            Duration::from_secs(5),
        ));

        let pending = auth.begin(42).unwrap();
        let state = state_of(&pending);
        let waiter = tokio::spawn(pending.wait());

        assert_eq!(auth.complete(&state, "good").await.unwrap(), 42);
        let credentials = waiter.await.unwrap().unwrap();
        assert_eq!(credentials.access_token, "access");
        assert_eq!(auth.sessions().credentials(42), Some(credentials));
    }

    #[tokio::test]
    async fn no_callback_times_out_without_caching() {
        let auth = authorizer(
            "http://127.0.0.1:9/token".to_string(),
            Duration::from_millis(50),
        );

        let pending = auth.begin(7).unwrap();
        let err = pending.wait().await.unwrap_err();
        assert!(matches!(err, Error::AuthExpired));
        assert!(auth.sessions().credentials(7).is_none());
        assert!(!auth.sessions().is_pending(7));
    }

    #[tokio::test]
    async fn failed_exchange_is_reported_to_both_sides() {
        let server = token_endpoint().await;
        let auth = Arc::new(authorizer(
            format!("{}/token", server.uri()),
            Duration::from_secs(5),
        ));

        let pending = auth.begin(1).unwrap();
        let state = state_of(&pending);
        let waiter = tokio::spawn(pending.wait());

        let err = auth.complete(&state, "bad").await.unwrap_err();
        assert!(matches!(err, Error::ExchangeFailed(_)));
        assert!(matches!(
            waiter.await.unwrap().unwrap_err(),
            Error::ExchangeFailed(_)
        ));
        assert!(auth.sessions().credentials(1).is_none());
    }

    #[tokio::test]
    async fn unknown_state_is_expired() {
        let auth = authorizer(
            "http://127.0.0.1:9/token".to_string(),
            Duration::from_secs(5),
        );
        assert!(matches!(
            auth.complete("forged", "good").await.unwrap_err(),
            Error::AuthExpired
        ));
    }

    #[tokio::test]
    async fn superseded_authorization_expires() {
        let auth = authorizer(
            "http://127.0.0.1:9/token".to_string(),
            Duration::from_secs(5),
        );

        let first = auth.begin(1).unwrap();
        let second = auth.begin(1).unwrap();
        assert_ne!(state_of(&first), state_of(&second));
        assert!(matches!(first.wait().await.unwrap_err(), Error::AuthExpired));
    }

    #[tokio::test]
    async fn denied_authorization_wakes_the_waiter() {
        let auth = authorizer(
            "http://127.0.0.1:9/token".to_string(),
            Duration::from_secs(5),
        );

        let pending = auth.begin(3).unwrap();
        let state = state_of(&pending);
        assert_eq!(auth.deny(&state, "access_denied").unwrap(), 3);
        assert!(matches!(
            pending.wait().await.unwrap_err(),
            Error::ExchangeFailed(ref reason) if reason == "access_denied"
        ));
    }

    #[tokio::test]
    async fn credentials_require_authorization() {
        let auth = authorizer(
            "http://127.0.0.1:9/token".to_string(),
            Duration::from_secs(5),
        );
        assert!(matches!(
            auth.credentials(5).await.unwrap_err(),
            Error::AuthPending
        ));
    }

    #[tokio::test]
    async fn expired_credentials_are_refreshed_and_stored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;
        let auth = authorizer(format!("{}/token", server.uri()), Duration::from_secs(5));

        auth.sessions().authorize(
            9,
            Credentials {
                access_token: "stale".to_string(),
                refresh_token: Some("refresh".to_string()),
                expires_at: Utc::now(),
                scopes: vec![],
            },
        );

        let credentials = auth.credentials(9).await.unwrap();
        assert_eq!(credentials.access_token, "fresh");
        assert_eq!(
            auth.sessions().credentials(9).unwrap().access_token,
            "fresh"
        );
    }
}
