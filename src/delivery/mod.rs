use crate::convert::EncodedFile;
use crate::voice::Speaker;
use async_trait::async_trait;
use serenity::builder::{CreateAttachment, CreateMessage};
use serenity::http::Http;
use serenity::model::id::ChannelId;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("file exceeds the upload size limit")]
    TooLarge,
    #[error("delivery failed: {0}")]
    Transport(String),
}

/// Hands finished files to whatever presents them to users. The target
/// channel is bound into the notifier instance.
#[async_trait]
pub trait DeliveryNotifier: Send + Sync {
    async fn deliver(&self, file: &EncodedFile) -> Result<(), DeliveryError>;
}

/// Sends encoded files as attachments to a Discord text channel.
pub struct DiscordNotifier {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

fn caption(speaker: Speaker) -> String {
    match speaker {
        Speaker::Known(user_id) => format!("Voice recording from <@{}>", user_id),
        Speaker::Unknown => "Could not tie this recording to a user.".to_string(),
    }
}

fn oversize_notice(speaker: Speaker) -> String {
    match speaker {
        Speaker::Known(user_id) => {
            format!("Voice recording from <@{}> is too large to send.", user_id)
        }
        Speaker::Unknown => "Voice recording from an unknown user is too large to send.".to_string(),
    }
}

// Discord rejects oversized uploads with 413 / JSON error code 40005.
fn is_too_large(error: &serenity::Error) -> bool {
    match error {
        serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(response)) => {
            response.status_code.as_u16() == 413 || response.error.code == 40005
        }
        _ => false,
    }
}

#[async_trait]
impl DeliveryNotifier for DiscordNotifier {
    async fn deliver(&self, file: &EncodedFile) -> Result<(), DeliveryError> {
        let attachment = CreateAttachment::path(&file.path)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let message = CreateMessage::new()
            .content(caption(file.speaker))
            .add_file(attachment);

        match self.channel_id.send_message(&self.http, message).await {
            Ok(_) => Ok(()),
            Err(err) if is_too_large(&err) => {
                if let Err(err) = self.channel_id.say(&self.http, oversize_notice(file.speaker)).await
                {
                    error!("Failed to report oversized file: {:?}", err);
                }
                Err(DeliveryError::TooLarge)
            }
            Err(err) => Err(DeliveryError::Transport(err.to_string())),
        }
    }
}
