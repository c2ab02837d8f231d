//! HTTP endpoint the OAuth provider redirects the browser to.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Router,
};
use log::{error, info, warn};
use serde::Deserialize;
use tokio::net::TcpListener;

use crate::{auth::Authorizer, error::Error};

pub const CALLBACK_PATH: &str = "/oauth2callback";

const SUCCESS: &str = "✅ Authorization successful. You may close this tab.";
const FAILED: &str = "❌ Authorization failed. Please try again.";
const FLOW_NOT_FOUND: &str = "❌ User flow not found. Please restart /start in Telegram.";

/// Query parameters of the redirect.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

pub fn router(auth: Arc<Authorizer>) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(oauth_callback))
        .route("/health", get(health))
        .with_state(auth)
}

/// Serve the callback endpoint until the task is aborted.
pub async fn serve(listener: TcpListener, auth: Arc<Authorizer>) -> anyhow::Result<()> {
    info!(
        "Callback server listening on http://{}{}",
        listener.local_addr()?,
        CALLBACK_PATH
    );
    axum::serve(listener, router(auth)).await?;
    Ok(())
}

async fn oauth_callback(
    State(auth): State<Arc<Authorizer>>,
    Query(params): Query<CallbackParams>,
) -> &'static str {
    let Some(state) = params.state else {
        warn!("Callback without state");
        return FLOW_NOT_FOUND;
    };

    // The user declined, or the provider rejected the request
    if let Some(reason) = params.error {
        warn!("Authorization denied: {}", reason);
        return match auth.deny(&state, &reason) {
            Ok(_) => FAILED,
            Err(_) => FLOW_NOT_FOUND,
        };
    }

    let Some(code) = params.code else {
        warn!("Callback without code");
        return match auth.deny(&state, "missing authorization code") {
            Ok(_) => FAILED,
            Err(_) => FLOW_NOT_FOUND,
        };
    };

    match auth.complete(&state, &code).await {
        Ok(user_id) => {
            info!("Token exchange completed for user {}", user_id);
            SUCCESS
        }
        Err(Error::AuthExpired) => FLOW_NOT_FOUND,
        Err(err) => {
            error!("[OAuth Error] {}", err);
            FAILED
        }
    }
}

async fn health() -> &'static str {
    "ok"
}
