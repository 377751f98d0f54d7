use crate::convert::OutputFormat;
use crate::session::StartError;
use crate::voice::Receiver;
use crate::Context;
use crate::Error;
use poise::serenity_prelude as serenity;
use songbird::CoreEvent;
use std::sync::Arc;
use tracing::{error, info};

async fn get_voice_channel(
    ctx: Context<'_>,
    guild_id: serenity::model::id::GuildId,
    user_id: serenity::model::id::UserId,
    channel: Option<serenity::model::channel::Channel>,
) -> Result<Option<serenity::model::id::ChannelId>, Error> {
    match channel {
        Some(ch) => {
            match ch {
                serenity::model::channel::Channel::Guild(ch) => {
                    if ch.kind == serenity::model::channel::ChannelType::Voice {
                        Ok(Some(ch.id))
                    } else {
                        ctx.say("The specified channel is not a voice channel!")
                            .await?;
                        Ok(None)
                    }
                }
                _ => {
                    ctx.say("Invalid channel type!").await?;
                    Ok(None)
                }
            }
        }
        None => {
            let cache = &ctx.serenity_context().cache;
            let channel_id = cache.guild(guild_id).and_then(|guild| {
                guild
                    .voice_states
                    .get(&user_id)
                    .and_then(|vs| vs.channel_id)
            });
            match channel_id {
                Some(id) => Ok(Some(id)),
                None => {
                    ctx.say("You're not in a voice channel. Please join one or specify a channel: `/start-recording channel:#your-voice-channel`").await?;
                    Ok(None)
                }
            }
        }
    }
}

#[poise::command(prefix_command, slash_command, rename = "start-recording", guild_only)]
pub async fn start_recording(
    ctx: Context<'_>,
    #[description = "File format for the recording (default: mp3)"] format: Option<String>,
    #[description = "Voice channel to record (leave empty to auto-detect)"] channel: Option<
        serenity::model::channel::Channel,
    >,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command must be used in a guild")?;
    let guild_id_u64 = guild_id.get();
    let user_id = ctx.author().id;
    let user_id_u64 = user_id.get();

    let format = match format.as_deref().unwrap_or("mp3").parse::<OutputFormat>() {
        Ok(format) => format,
        Err(_) => {
            ctx.say(format!(
                "Not a valid file format. Valid file formats: {}",
                OutputFormat::valid_list()
            ))
            .await?;
            return Ok(());
        }
    };

    let voice_channel_id = match get_voice_channel(ctx, guild_id, user_id, channel).await? {
        Some(id) => id,
        None => return Ok(()),
    };

    // Reserve the guild before joining; check-and-insert is atomic, so a
    // racing start on the same guild loses here rather than after the join.
    let started = match ctx.data().registry.try_start(
        guild_id_u64,
        user_id_u64,
        format,
        &ctx.data().config.recording_dir,
    ) {
        Ok(started) => started,
        Err(StartError::AlreadyRecording) => {
            ctx.say("A recording is already active on this guild.")
                .await?;
            return Ok(());
        }
        Err(StartError::Cleaning) => {
            ctx.say("Cleanup from the previous recording is still running. Try again in a moment.")
                .await?;
            return Ok(());
        }
    };

    let manager = songbird::get(ctx.serenity_context())
        .await
        .ok_or("Songbird voice client not initialized")?
        .clone();

    let handler_lock = match manager.join(guild_id, voice_channel_id).await {
        Ok(handler) => handler,
        Err(e) => {
            error!("Failed to join voice channel: {:?}", e);
            ctx.data().registry.remove(guild_id_u64);
            ctx.say(format!("Failed to join voice channel: {:?}", e))
                .await?;
            return Ok(());
        }
    };

    info!(
        "Joined voice channel {} in guild {}",
        voice_channel_id, guild_id
    );

    {
        let mut handler = handler_lock.lock().await;

        handler.add_global_event(
            CoreEvent::SpeakingStateUpdate.into(),
            Receiver::new(Arc::clone(&started.state)),
        );

        handler.add_global_event(
            CoreEvent::VoiceTick.into(),
            Receiver::new(Arc::clone(&started.state)),
        );
    }

    ctx.say(format!(
        "🎙️ **Recording started!**\n\
        📁 Session: `{}`\n\
        🎵 Format: `{}`",
        started.session_id, format
    ))
    .await?;

    Ok(())
}
