use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use grammers_client::{
    types::{Chat, Downloadable, Media, Message, User},
    Client, InputMessage, Update,
};
use log::{error, info, warn};

use crate::{
    auth::Authorizer,
    command::{parse_command, Command},
    drive::DriveClient,
    error::Error,
    relay::{Document, UploadRelay},
    session::UserId,
};

/// What an incoming message asks the bot to do.
#[derive(Debug, PartialEq)]
enum Request<'a> {
    Upload,
    Command(Command<'a>),
    Ignore,
}

impl<'a> Request<'a> {
    /// Documents are uploaded even when their caption looks like a command.
    fn classify(text: &'a str, has_document: bool) -> Self {
        if has_document {
            return Request::Upload;
        }
        parse_command(text).map_or(Request::Ignore, Request::Command)
    }
}

/// Bot is the main struct of the bot.
/// It routes Telegram updates to the authorization and upload flows.
#[derive(Debug)]
pub struct Bot {
    client: Client,
    me: User,
    auth: Arc<Authorizer>,
    relay: UploadRelay<DriveClient>,
}

impl Bot {
    /// Create a new bot instance.
    pub async fn new(
        client: Client,
        auth: Arc<Authorizer>,
        relay: UploadRelay<DriveClient>,
    ) -> Result<Arc<Self>> {
        let me = client.get_me().await?;
        info!("Logged in as @{}", me.username().unwrap_or_default());
        Ok(Arc::new(Self {
            client,
            me,
            auth,
            relay,
        }))
    }

    /// Run the bot.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        while let Some(update) = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, exiting");
                Ok(None)
            }
            update = self.client.next_update() => update.map(Some)
        }? {
            let self_ = self.clone();

            // Each update gets its own task, so a user waiting for
            // authorization never holds up anyone else
            tokio::spawn(async move {
                if let Err(err) = self_.handle_update(update).await {
                    error!("Error handling update: {}", err);
                }
            });
        }

        Ok(())
    }

    /// Update handler.
    async fn handle_update(&self, update: Update) -> Result<()> {
        match update {
            Update::NewMessage(msg) if !msg.outgoing() => self.handle_message(msg).await,
            _ => Ok(()),
        }
    }

    /// Message handler.
    ///
    /// Ensures the message is from a user in a private chat or a group,
    /// then dispatches commands and documents.
    async fn handle_message(&self, msg: Message) -> Result<()> {
        // Ensure the message chat is a user or a group
        let in_group = match msg.chat() {
            Chat::User(_) => false,
            Chat::Group(_) => true,
            _ => return Ok(()),
        };

        // Credentials belong to the sender, not to the chat
        let user_id = match msg.sender() {
            Some(Chat::User(user)) => user.id(),
            _ => return Ok(()),
        };

        let has_document = matches!(msg.media(), Some(Media::Document(_)));
        match Request::classify(msg.text(), has_document) {
            Request::Upload => {
                let Some(Media::Document(doc)) = msg.media() else {
                    return Ok(());
                };
                let document = Document {
                    name: doc.name().to_string(),
                    mime_type: doc.mime_type().map(|mime| mime.to_string()),
                };
                self.handle_document(msg, user_id, document, Media::Document(doc))
                    .await
            }
            Request::Command(command) => {
                // There is a chance that there are multiple bots listening
                // to /start commands in a group, so we handle those
                // only if they are sent explicitly to this bot.
                if !command.is_for(self.me.username(), in_group) {
                    return Ok(());
                }

                info!("Received command from {}: {:?}", user_id, command);
                match command.name {
                    "start" => self.handle_start(msg, user_id).await,
                    "help" => self.handle_help(msg, user_id).await,
                    _ => Ok(()),
                }
            }
            Request::Ignore => Ok(()),
        }
    }

    /// Handle the /start command.
    /// Sends the authorization link and waits for the callback.
    async fn handle_start(&self, msg: Message, user_id: UserId) -> Result<()> {
        let pending = match self.auth.begin(user_id) {
            Ok(pending) => pending,
            Err(err) => {
                error!("[Start Error] {}", err);
                msg.reply(err.user_message()).await?;
                return Ok(());
            }
        };

        msg.reply(format!(
            "🔐 Authorize the bot to access your Google Drive:\n{}\n\nReturn after authorizing.",
            pending.url()
        ))
        .await?;
        msg.reply("⏳ Waiting for authorization...").await?;

        match pending.wait().await {
            Ok(_) => {
                msg.reply("✅ Authorized successfully! Now send me a file.").await?;
            }
            Err(err) => {
                match err {
                    Error::AuthExpired => warn!("Authorization for {} expired", user_id),
                    _ => error!("[Start Error] {}", err),
                }
                msg.reply(err.user_message()).await?;
            }
        }

        Ok(())
    }

    /// Handle the /help command.
    /// Explains the bot and shows whether the user is connected.
    async fn handle_help(&self, msg: Message, user_id: UserId) -> Result<()> {
        let sessions = self.auth.sessions();
        let status = if sessions.credentials(user_id).is_some() {
            "🟢 Your Google Drive is connected."
        } else if sessions.is_pending(user_id) {
            "🟡 Waiting for you to finish authorizing."
        } else {
            "⚪ Not connected yet, send /start."
        };

        msg.reply(InputMessage::html(format!(
            "📁 <b>Send me a document and I'll save it to your Google Drive.</b>\n\
            \n\
            \u{2022} /start connects your Google account\n\
            \u{2022} Files land in a dedicated folder\n\
            \u{2022} Authorization lasts until the bot restarts\n\
            \n\
            {}",
            status
        )))
        .await?;
        Ok(())
    }

    /// Handle a document.
    /// Downloads it from Telegram and uploads it to the user's Drive.
    async fn handle_document(
        &self,
        msg: Message,
        user_id: UserId,
        document: Document,
        media: Media,
    ) -> Result<()> {
        info!("Received document {} from {}", document.name, user_id);
        let client = &self.client;
        let download = |path: PathBuf| async move {
            client
                .download_media(&Downloadable::Media(media), &path)
                .await
        };

        match self.relay.upload(user_id, &document, download).await {
            Ok(file) => {
                info!(
                    "Uploaded {} ({}) as {}",
                    file.name,
                    bytesize::to_string(file.size, true),
                    file.id
                );
                msg.reply("✅ File uploaded successfully to Google Drive.").await?;
            }
            Err(Error::AuthPending) => {
                msg.reply(Error::AuthPending.user_message()).await?;
            }
            Err(err) => {
                error!("[Upload Error] {}", err);
                msg.reply(err.user_message()).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_with_command_caption_is_uploaded() {
        assert_eq!(Request::classify("/start", true), Request::Upload);
        assert_eq!(Request::classify("", true), Request::Upload);
    }

    #[test]
    fn text_commands_are_parsed() {
        assert_eq!(
            Request::classify("/help@DriveBot", false),
            Request::Command(Command {
                name: "help",
                via: Some("DriveBot")
            })
        );
        assert_eq!(Request::classify("hello", false), Request::Ignore);
    }
}
