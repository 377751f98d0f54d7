use super::registry::SessionRegistry;
use crate::convert::{ConversionWorkerPool, ConvertError, EncodedFile, OutputFormat};
use crate::delivery::{DeliveryError, DeliveryNotifier};
use crate::voice::{RecordingState, SharedRecordingState, Speaker};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Per-guild recording in progress. Created by the registry on start, moved
/// out on stop, destroyed once finalize completes.
#[derive(Debug)]
pub struct RecordingSession {
    pub guild_id: u64,
    pub started_by: u64,
    pub session_id: String,
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    pub state: SharedRecordingState,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl RecordingSession {
    pub fn new(guild_id: u64, started_by: u64, format: OutputFormat, base_dir: &Path) -> Self {
        let timestamp = chrono::Utc::now();
        let session_id = format!("{}_{}", guild_id, timestamp.format("%Y%m%d_%H%M%S"));
        let output_dir = base_dir.join(&session_id);

        Self {
            guild_id,
            started_by,
            session_id,
            output_dir,
            format,
            state: Arc::new(Mutex::new(RecordingState::armed())),
            started_at: timestamp,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Utc::now() - self.started_at
    }

    /// Drains the sink, converts every speaker's buffer through the pool,
    /// delivers what succeeded, and unregisters the guild. One speaker's
    /// failure never blocks another's delivery, and the registry entry is
    /// removed exactly once regardless of outcome.
    pub async fn finalize(
        self,
        pool: &ConversionWorkerPool,
        notifier: &dyn DeliveryNotifier,
        registry: &SessionRegistry,
    ) -> FinalizeReport {
        let sink = self.state.lock().await.stop();
        let buffers = match sink {
            Some(sink) => sink.flush(),
            None => Vec::new(),
        };

        info!(
            "Session {} (started by {}): converting {} speaker buffer(s)",
            self.session_id,
            self.started_by,
            buffers.len()
        );

        let mut report = FinalizeReport::default();
        let mut tickets = Vec::new();

        // Queue everything before awaiting anything, so this session's
        // conversions can spread across the pool's workers.
        for (speaker, buffer) in buffers {
            debug!(
                "Session {}: {} buffered {:.1}s of audio",
                self.session_id,
                speaker,
                buffer.duration_secs()
            );
            match pool
                .submit(buffer, self.format, self.output_dir.clone(), speaker)
                .await
            {
                Ok(ticket) => tickets.push((speaker, ticket)),
                Err(err) => {
                    error!(
                        "Session {}: failed to queue conversion for {}: {}",
                        self.session_id, speaker, err
                    );
                    report.conversion_failures.push((speaker, err));
                }
            }
        }

        for (speaker, ticket) in tickets {
            match ticket.wait().await {
                Ok(file) => match notifier.deliver(&file).await {
                    Ok(()) => report.delivered.push(file),
                    Err(err) => {
                        warn!(
                            "Session {}: delivery for {} failed: {}",
                            self.session_id, speaker, err
                        );
                        report.delivery_failures.push((speaker, err));
                    }
                },
                // The worker already logged the failure itself.
                Err(err) => report.conversion_failures.push((speaker, err)),
            }
        }

        registry.remove(self.guild_id);
        info!(
            "Session {} finished: {} file(s) delivered, {} failure(s)",
            self.session_id,
            report.delivered.len(),
            report.failure_count()
        );
        report
    }
}

/// Typed outcome of a finalized session, one slot per speaker stream.
#[derive(Default)]
pub struct FinalizeReport {
    pub delivered: Vec<EncodedFile>,
    pub conversion_failures: Vec<(Speaker, ConvertError)>,
    pub delivery_failures: Vec<(Speaker, DeliveryError)>,
}

impl FinalizeReport {
    pub fn failure_count(&self) -> usize {
        self.conversion_failures.len() + self.delivery_failures.len()
    }

    pub fn has_failures(&self) -> bool {
        self.failure_count() > 0
    }
}
