use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::debug;
use tokio::sync::oneshot;

use crate::{error::Result, oauth::Credentials};

/// Telegram user identifier.
pub type UserId = i64;

/// Receiving half of a pending flow, resolved by the callback.
pub type FlowReceiver = oneshot::Receiver<Result<Credentials>>;

/// An authorization started with /start and not yet completed.
#[derive(Debug)]
pub struct PendingFlow {
    pub user_id: UserId,
    created_at: Instant,
    signal: oneshot::Sender<Result<Credentials>>,
}

impl PendingFlow {
    /// Hand the outcome to the chat side.
    ///
    /// Returns `false` if nobody is waiting anymore.
    pub fn resolve(self, outcome: Result<Credentials>) -> bool {
        self.signal.send(outcome).is_ok()
    }
}

/// In-memory per-user state shared by the bot and the callback server.
///
/// Pending flows are keyed by the OAuth `state` value, credentials by user.
#[derive(Debug)]
pub struct SessionStore {
    pending: DashMap<String, PendingFlow>,
    credentials: DashMap<UserId, Credentials>,
    ttl: Duration,
}

impl SessionStore {
    /// Create an empty store whose pending flows expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            credentials: DashMap::new(),
            ttl,
        }
    }

    /// Register a pending flow for the user under the given state.
    ///
    /// Any earlier flow of the same user is dropped, which wakes its waiter
    /// with a closed channel. Expired flows of other users are reaped too.
    pub fn begin(&self, user_id: UserId, state: String) -> FlowReceiver {
        let ttl = self.ttl;
        self.pending
            .retain(|_, flow| flow.user_id != user_id && flow.created_at.elapsed() < ttl);

        let (signal, receiver) = oneshot::channel();
        self.pending.insert(
            state,
            PendingFlow {
                user_id,
                created_at: Instant::now(),
                signal,
            },
        );
        debug!("Pending flows: {}", self.pending.len());
        receiver
    }

    /// Remove and return the pending flow for the state.
    ///
    /// Returns `None` if the state is unknown, was already consumed, or has
    /// expired (even if not yet reaped).
    pub fn take_pending(&self, state: &str) -> Option<PendingFlow> {
        let (_, flow) = self.pending.remove(state)?;
        if flow.created_at.elapsed() >= self.ttl {
            None
        } else {
            Some(flow)
        }
    }

    /// Forget a pending flow without resolving it.
    pub fn cancel(&self, state: &str) {
        self.pending.remove(state);
    }

    /// Whether the user has an authorization in progress.
    pub fn is_pending(&self, user_id: UserId) -> bool {
        self.pending.iter().any(|flow| flow.user_id == user_id)
    }

    /// Cache credentials for the user, replacing older ones.
    pub fn authorize(&self, user_id: UserId, credentials: Credentials) {
        self.credentials.insert(user_id, credentials);
    }

    pub fn credentials(&self, user_id: UserId) -> Option<Credentials> {
        self.credentials.get(&user_id).map(|c| c.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::error::Error;

    fn credentials(token: &str) -> Credentials {
        Credentials {
            access_token: token.to_string(),
            refresh_token: None,
            expires_at: Utc::now() + chrono::Duration::hours(1),
            scopes: vec![],
        }
    }

    #[tokio::test]
    async fn resolve_wakes_the_waiter() {
        let store = SessionStore::new(Duration::from_secs(60));
        let receiver = store.begin(1, "s1".to_string());

        let flow = store.take_pending("s1").unwrap();
        assert_eq!(flow.user_id, 1);
        assert!(flow.resolve(Ok(credentials("a"))));

        let outcome = receiver.await.unwrap().unwrap();
        assert_eq!(outcome.access_token, "a");
    }

    #[test]
    fn take_pending_consumes_the_flow() {
        let store = SessionStore::new(Duration::from_secs(60));
        let _receiver = store.begin(1, "s1".to_string());

        assert!(store.take_pending("s1").is_some());
        assert!(store.take_pending("s1").is_none());
        assert!(!store.is_pending(1));
    }

    #[test]
    fn unknown_state_has_no_flow() {
        let store = SessionStore::new(Duration::from_secs(60));
        assert!(store.take_pending("nope").is_none());
    }

    #[tokio::test]
    async fn second_begin_supersedes_the_first() {
        let store = SessionStore::new(Duration::from_secs(60));
        let first = store.begin(1, "s1".to_string());
        let _second = store.begin(1, "s2".to_string());

        assert!(store.take_pending("s1").is_none());
        assert!(first.await.is_err());
        assert!(store.is_pending(1));
    }

    #[test]
    fn flows_of_different_users_are_independent() {
        let store = SessionStore::new(Duration::from_secs(60));
        let _a = store.begin(1, "s1".to_string());
        let _b = store.begin(2, "s2".to_string());

        assert_eq!(store.take_pending("s1").unwrap().user_id, 1);
        assert_eq!(store.take_pending("s2").unwrap().user_id, 2);
    }

    #[tokio::test]
    async fn expired_flow_is_not_returned() {
        let store = SessionStore::new(Duration::from_millis(1));
        let _receiver = store.begin(1, "s1".to_string());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.take_pending("s1").is_none());
    }

    #[tokio::test]
    async fn begin_reaps_expired_flows() {
        let store = SessionStore::new(Duration::from_millis(1));
        let _old = store.begin(1, "old".to_string());

        tokio::time::sleep(Duration::from_millis(10)).await;
        let _new = store.begin(2, "new".to_string());
        assert!(!store.is_pending(1));
    }

    #[test]
    fn resolve_without_waiter_reports_false() {
        let store = SessionStore::new(Duration::from_secs(60));
        drop(store.begin(1, "s1".to_string()));

        let flow = store.take_pending("s1").unwrap();
        assert!(!flow.resolve(Err(Error::AuthExpired)));
    }

    #[test]
    fn credentials_are_cached_per_user() {
        let store = SessionStore::new(Duration::from_secs(60));
        assert!(store.credentials(1).is_none());

        store.authorize(1, credentials("a"));
        store.authorize(1, credentials("b"));
        assert_eq!(store.credentials(1).unwrap().access_token, "b");
        assert!(store.credentials(2).is_none());
    }
}
