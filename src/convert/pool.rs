use super::encoder::{EncodeError, EncodedFile, Encoder, OutputFormat};
use crate::voice::{RawAudioBuffer, Speaker};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("conversion pool is closed")]
    PoolClosed,
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("conversion task crashed")]
    Crashed,
}

struct ConversionJob {
    buffer: RawAudioBuffer,
    format: OutputFormat,
    dest_dir: PathBuf,
    speaker: Speaker,
    reply: oneshot::Sender<Result<EncodedFile, ConvertError>>,
}

/// Receipt for a queued conversion; resolves when a worker finishes the job.
pub struct ConversionTicket {
    rx: oneshot::Receiver<Result<EncodedFile, ConvertError>>,
}

impl ConversionTicket {
    pub async fn wait(self) -> Result<EncodedFile, ConvertError> {
        self.rx.await.unwrap_or(Err(ConvertError::Crashed))
    }
}

/// Fixed-size pool of conversion workers sharing one bounded queue.
///
/// Caps concurrent encodes process-wide no matter how many sessions finish
/// at once. Once a job is queued it runs to completion or failure; the only
/// cancellation surface is rejecting new work during shutdown.
pub struct ConversionWorkerPool {
    tx: Mutex<Option<mpsc::Sender<ConversionJob>>>,
    workers: Mutex<Option<JoinSet<()>>>,
}

impl ConversionWorkerPool {
    pub fn new(workers: usize, queue_capacity: usize, encoder: Arc<dyn Encoder>) -> Self {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);

        let (tx, rx) = mpsc::channel(queue_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            set.spawn(worker_loop(worker_id, Arc::clone(&rx), Arc::clone(&encoder)));
        }
        info!("Conversion pool started with {} workers", workers);

        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(Some(set)),
        }
    }

    /// Queues a conversion. Suspends while the queue is full; fails with
    /// PoolClosed once shutdown has begun.
    pub async fn submit(
        &self,
        buffer: RawAudioBuffer,
        format: OutputFormat,
        dest_dir: PathBuf,
        speaker: Speaker,
    ) -> Result<ConversionTicket, ConvertError> {
        let tx = match self.tx.lock().await.as_ref() {
            Some(tx) => tx.clone(),
            None => return Err(ConvertError::PoolClosed),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let job = ConversionJob {
            buffer,
            format,
            dest_dir,
            speaker,
            reply: reply_tx,
        };

        tx.send(job).await.map_err(|_| ConvertError::PoolClosed)?;
        Ok(ConversionTicket { rx: reply_rx })
    }

    /// Stops accepting submissions and drains in-flight work. Workers still
    /// busy when the optional deadline expires are aborted. Call once during
    /// process teardown; skipping it leaks the worker tasks.
    pub async fn shutdown(&self, timeout: Option<Duration>) {
        if self.tx.lock().await.take().is_none() {
            warn!("Conversion pool shutdown called more than once");
            return;
        }

        let set = self.workers.lock().await.take();
        let Some(mut set) = set else { return };

        info!("Conversion pool draining {} workers", set.len());
        match timeout {
            Some(limit) => {
                let deadline = tokio::time::Instant::now() + limit;
                loop {
                    match tokio::time::timeout_at(deadline, set.join_next()).await {
                        Ok(Some(_)) => continue,
                        Ok(None) => break,
                        Err(_) => {
                            warn!(
                                "Conversion pool shutdown timed out, aborting {} workers",
                                set.len()
                            );
                            set.abort_all();
                            while set.join_next().await.is_some() {}
                            break;
                        }
                    }
                }
            }
            None => while set.join_next().await.is_some() {},
        }
        info!("Conversion pool shut down");
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<ConversionJob>>>,
    encoder: Arc<dyn Encoder>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else { break };

        let ConversionJob {
            buffer,
            format,
            dest_dir,
            speaker,
            reply,
        } = job;

        // One spawned task per job: a panicking encoder fails this job's
        // ticket, the worker takes the next job.
        let task_encoder = Arc::clone(&encoder);
        let task = tokio::spawn(async move {
            run_conversion(task_encoder, buffer, format, dest_dir, speaker).await
        });

        let result = match task.await {
            Ok(result) => result,
            Err(join_error) => {
                error!(
                    "Worker {}: conversion task for {} crashed: {}",
                    worker_id, speaker, join_error
                );
                Err(ConvertError::Crashed)
            }
        };

        if let Err(error) = &result {
            error!("Worker {}: conversion for {} failed: {}", worker_id, speaker, error);
        }

        // Ticket may have been dropped; nothing to do then.
        let _ = reply.send(result);
    }
}

async fn run_conversion(
    encoder: Arc<dyn Encoder>,
    buffer: RawAudioBuffer,
    format: OutputFormat,
    dest_dir: PathBuf,
    speaker: Speaker,
) -> Result<EncodedFile, ConvertError> {
    tokio::fs::create_dir_all(&dest_dir)
        .await
        .map_err(EncodeError::Io)?;

    let path = dest_dir.join(format!("{}.{}", speaker.file_stem(), format.extension()));
    encoder.encode(&buffer, format, &path).await?;

    Ok(EncodedFile {
        path,
        speaker,
        format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::encoder::Transcoder;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn tone(len: usize) -> RawAudioBuffer {
        RawAudioBuffer::capture((0..len).map(|i| (i % 100) as i16).collect())
    }

    struct GaugeEncoder {
        running: AtomicUsize,
        peak: AtomicUsize,
        completed: AtomicUsize,
    }

    impl GaugeEncoder {
        fn new() -> Self {
            Self {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl Encoder for GaugeEncoder {
        async fn encode(
            &self,
            _buffer: &RawAudioBuffer,
            _format: OutputFormat,
            _dest: &Path,
        ) -> Result<(), EncodeError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailOnStem(&'static str);

    #[async_trait::async_trait]
    impl Encoder for FailOnStem {
        async fn encode(
            &self,
            _buffer: &RawAudioBuffer,
            _format: OutputFormat,
            dest: &Path,
        ) -> Result<(), EncodeError> {
            if dest.file_stem().is_some_and(|stem| stem == self.0) {
                return Err(EncodeError::Ffmpeg {
                    status: "exit status: 1".to_string(),
                    stderr: "forced failure".to_string(),
                });
            }
            tokio::fs::write(dest, b"encoded").await?;
            Ok(())
        }
    }

    struct PanicOnce {
        fired: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Encoder for PanicOnce {
        async fn encode(
            &self,
            _buffer: &RawAudioBuffer,
            _format: OutputFormat,
            _dest: &Path,
        ) -> Result<(), EncodeError> {
            if !self.fired.swap(true, Ordering::SeqCst) {
                panic!("encoder exploded");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn two_workers_bound_five_simultaneous_conversions() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(GaugeEncoder::new());
        let pool = ConversionWorkerPool::new(2, 16, Arc::clone(&encoder) as Arc<dyn Encoder>);

        let mut tickets = Vec::new();
        for user_id in 0..5 {
            let ticket = pool
                .submit(
                    tone(64),
                    OutputFormat::Mp3,
                    dir.path().to_path_buf(),
                    Speaker::Known(user_id),
                )
                .await
                .unwrap();
            tickets.push(ticket);
        }

        for ticket in tickets {
            ticket.wait().await.unwrap();
        }

        assert_eq!(encoder.completed.load(Ordering::SeqCst), 5);
        assert!(encoder.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn one_failed_conversion_does_not_poison_others() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConversionWorkerPool::new(2, 16, Arc::new(FailOnStem("user_1")));

        let bad = pool
            .submit(
                tone(8),
                OutputFormat::Mp3,
                dir.path().to_path_buf(),
                Speaker::Known(1),
            )
            .await
            .unwrap();
        let good = pool
            .submit(
                tone(8),
                OutputFormat::Mp3,
                dir.path().to_path_buf(),
                Speaker::Known(2),
            )
            .await
            .unwrap();

        assert!(matches!(bad.wait().await, Err(ConvertError::Encode(_))));
        let file = good.wait().await.unwrap();
        assert!(file.path.exists());
        assert_eq!(file.speaker, Speaker::Known(2));
    }

    #[tokio::test]
    async fn panicking_encoder_fails_its_ticket_and_the_worker_survives() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConversionWorkerPool::new(
            1,
            4,
            Arc::new(PanicOnce {
                fired: AtomicBool::new(false),
            }),
        );

        let crashed = pool
            .submit(
                tone(8),
                OutputFormat::Mp3,
                dir.path().to_path_buf(),
                Speaker::Known(1),
            )
            .await
            .unwrap();
        assert!(matches!(crashed.wait().await, Err(ConvertError::Crashed)));

        let ok = pool
            .submit(
                tone(8),
                OutputFormat::Mp3,
                dir.path().to_path_buf(),
                Speaker::Known(2),
            )
            .await
            .unwrap();
        assert!(ok.wait().await.is_ok());
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConversionWorkerPool::new(2, 4, Arc::new(GaugeEncoder::new()));

        pool.shutdown(None).await;

        for user_id in 0..3 {
            let result = pool
                .submit(
                    tone(8),
                    OutputFormat::Wav,
                    dir.path().to_path_buf(),
                    Speaker::Known(user_id),
                )
                .await;
            assert!(matches!(result, Err(ConvertError::PoolClosed)));
        }
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_work() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(GaugeEncoder::new());
        let pool = ConversionWorkerPool::new(1, 4, Arc::clone(&encoder) as Arc<dyn Encoder>);

        let ticket = pool
            .submit(
                tone(8),
                OutputFormat::Mp3,
                dir.path().to_path_buf(),
                Speaker::Unknown,
            )
            .await
            .unwrap();

        pool.shutdown(Some(Duration::from_secs(5))).await;

        assert!(ticket.wait().await.is_ok());
        assert_eq!(encoder.completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wav_submission_round_trips_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConversionWorkerPool::new(1, 4, Arc::new(Transcoder::new("ffmpeg".into())));

        let ticket = pool
            .submit(
                tone(480),
                OutputFormat::Wav,
                dir.path().join("session"),
                Speaker::Known(7),
            )
            .await
            .unwrap();

        let file = ticket.wait().await.unwrap();
        assert!(file.path.exists());
        assert!(file.path.starts_with(dir.path().join("session")));
        assert_eq!(file.path.file_name().unwrap(), "user_7.wav");
        assert_eq!(file.speaker, Speaker::Known(7));
        assert_eq!(file.format, OutputFormat::Wav);
    }
}
