use crate::delivery::DiscordNotifier;
use crate::session::StopError;
use crate::Context;
use crate::Error;
use tracing::{error, info};

fn format_duration(duration: chrono::Duration) -> String {
    let total_secs = duration.num_seconds();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[poise::command(prefix_command, slash_command, rename = "stop-recording", guild_only)]
pub async fn stop_recording(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command must be used in a guild")?;
    let guild_id_u64 = guild_id.get();

    let session = match ctx.data().registry.try_stop(guild_id_u64) {
        Ok(session) => session,
        Err(StopError::NotRecording) => {
            ctx.say("No recording is active on this guild.").await?;
            return Ok(());
        }
        Err(StopError::CleaningInProgress) => {
            ctx.say("Cleanup is already in progress. The files are on their way.")
                .await?;
            return Ok(());
        }
    };

    let duration_str = format_duration(session.duration());

    ctx.say(format!(
        "🎙️ **Recording stopped!**\n\
        📁 Session: `{}`\n\
        ⏱️ Duration: {}\n\
        Files will be sent once processing finishes.",
        session.session_id, duration_str
    ))
    .await?;

    let manager = songbird::get(ctx.serenity_context())
        .await
        .ok_or("Songbird voice client not initialized")?
        .clone();

    if let Err(e) = manager.remove(guild_id).await {
        error!("Failed to leave voice channel: {:?}", e);
    }

    info!("Left voice channel in guild {}", guild_id);

    let notifier = DiscordNotifier::new(ctx.serenity_context().http.clone(), ctx.channel_id());

    let report = session
        .finalize(&ctx.data().pool, &notifier, &ctx.data().registry)
        .await;

    if report.has_failures() {
        ctx.say(format!(
            "⚠️ {} stream(s) could not be processed or delivered.",
            report.failure_count()
        ))
        .await?;
    }

    Ok(())
}
