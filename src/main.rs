use std::{sync::Arc, time::Duration};

use anyhow::Result;
use auth::Authorizer;
use bot::Bot;
use config::Config;
use dotenv::dotenv;
use drive::DriveClient;
use grammers_client::{Client, Config as ClientConfig};
use grammers_session::Session;
use log::{error, info};
use oauth::OAuthClient;
use relay::UploadRelay;
use session::SessionStore;
use simplelog::TermLogger;
use tokio::net::TcpListener;

mod auth;
mod bot;
mod callback;
mod command;
mod config;
mod drive;
mod error;
mod oauth;
mod relay;
mod session;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenv().ok();
    let config = Config::from_env()?;

    // Initialize logging
    TermLogger::init(
        config.log_level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    // Fill in the configuration and connect to Telegram
    let client = Client::connect(ClientConfig {
        api_id: config.api_id,
        api_hash: config.api_hash.clone(),
        session: Session::load_file_or_create(&config.session_file)?,
        params: Default::default(),
    })
    .await?;

    // Authorize as a bot if needed
    if !client.is_authorized().await? {
        info!("Not authorized, signing in");
        client
            .bot_sign_in(&config.bot_token)
            .await?;
    }

    // Save the session to a file
    client.session().save_to_file(&config.session_file)?;

    // Google APIs share one HTTP client
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let sessions = Arc::new(SessionStore::new(config.auth_timeout));
    let oauth = OAuthClient::new(
        http.clone(),
        config.secrets.clone(),
        config.redirect_url.clone(),
    );
    let auth = Arc::new(Authorizer::new(oauth, sessions, config.auth_timeout));
    let relay = UploadRelay::new(
        DriveClient::new(http),
        auth.clone(),
        config.folder_name.clone(),
        config.staging_dir.clone(),
    );

    // Bind here so a taken port fails startup instead of the first callback
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    let server = tokio::spawn({
        let auth = auth.clone();
        async move {
            if let Err(err) = callback::serve(listener, auth).await {
                error!("Callback server stopped: {}", err);
            }
        }
    });

    // Create the bot and run it
    let bot = Bot::new(client, auth, relay).await?;
    let result = bot.run().await;

    server.abort();
    result
}
