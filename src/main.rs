use anyhow::Context as _;
use dotenvy::dotenv;
use poise::serenity_prelude as serenity;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{driver::DecodeMode, Config as SongbirdConfig, SerenityInit};
use std::sync::Arc;
use tracing::{error, info};

mod command;
mod config;
mod convert;
mod delivery;
mod session;
mod voice;

use command::{start_recording, stop_recording};
use config::Config;
use convert::{ConversionWorkerPool, Transcoder};
use session::SessionRegistry;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

pub struct Data {
    pub registry: SessionRegistry,
    pub pool: Arc<ConversionWorkerPool>,
    pub config: Config,
}

async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Setup { error, .. } => panic!("Failed to start bot: {:?}", error),
        poise::FrameworkError::Command { error, ctx, .. } => {
            error!("Error in command `{}`: {:?}", ctx.command().name, error);
        }
        error => {
            if let Err(e) = poise::builtins::on_error(error).await {
                error!("Error while handling error: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    std::fs::create_dir_all(&config.recording_dir).with_context(|| {
        format!(
            "Failed to create recording directory {:?}",
            config.recording_dir
        )
    })?;

    let encoder = Arc::new(Transcoder::new(config.ffmpeg_path.clone()));
    let pool = Arc::new(ConversionWorkerPool::new(
        config.conversion_workers,
        config.conversion_queue_capacity,
        encoder,
    ));

    let options = poise::FrameworkOptions {
        commands: vec![start_recording(), stop_recording()],
        prefix_options: poise::PrefixFrameworkOptions {
            prefix: Some("/".into()),
            ..Default::default()
        },
        on_error: |error| Box::pin(on_error(error)),
        ..Default::default()
    };

    let token = std::env::var("DISCORD_TOKEN")
        .context("Set DISCORD_TOKEN environment variable")?;

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_VOICE_STATES;

    let framework = poise::Framework::builder()
        .setup({
            let pool = Arc::clone(&pool);
            let config = config.clone();
            move |ctx, ready, framework| {
                Box::pin(async move {
                    info!("Logged in as {}", ready.user.name);
                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                    if let Ok(guild_id_str) = std::env::var("GUILD_ID") {
                        if let Ok(guild_id) = guild_id_str.parse::<u64>() {
                            let guild_id = serenity::model::id::GuildId::new(guild_id);
                            poise::builtins::register_in_guild(
                                ctx,
                                &framework.options().commands,
                                guild_id,
                            )
                            .await?;
                            info!("Registered commands for guild {}", guild_id);
                        } else {
                            error!("Invalid GUILD_ID format: {}", guild_id_str);
                        }
                    }

                    Ok(Data {
                        registry: SessionRegistry::new(),
                        pool,
                        config,
                    })
                })
            }
        })
        .options(options)
        .build();

    let songbird_config = SongbirdConfig::default().decode_mode(DecodeMode::Decode);

    let mut client = Client::builder(token, intents)
        .framework(framework)
        .register_songbird_from_config(songbird_config)
        .await?;

    tokio::select! {
        result = client.start() => {
            if let Err(e) = result {
                error!("Client error: {:?}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    // Releases the workers; skipping this would leak them along with any
    // queued conversions.
    pool.shutdown(Some(config.shutdown_timeout)).await;

    Ok(())
}
