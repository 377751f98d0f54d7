use crate::voice::{RawAudioBuffer, Speaker};
use async_trait::async_trait;
use byteorder::{LittleEndian, WriteBytesExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Output formats a recording can be converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Mp3,
    Wav,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 2] = [OutputFormat::Mp3, OutputFormat::Wav];

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Wav => "wav",
        }
    }

    /// Comma-separated list for user-facing rejection messages.
    pub fn valid_list() -> String {
        Self::ALL
            .iter()
            .map(|f| f.extension())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Error)]
#[error("not a valid file format: {0}")]
pub struct InvalidFormat(pub String);

impl FromStr for OutputFormat {
    type Err = InvalidFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" => Ok(OutputFormat::Mp3),
            "wav" => Ok(OutputFormat::Wav),
            other => Err(InvalidFormat(other.to_string())),
        }
    }
}

/// A finished conversion artifact on disk.
#[derive(Debug, Clone)]
pub struct EncodedFile {
    pub path: PathBuf,
    pub speaker: Speaker,
    pub format: OutputFormat,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV write error: {0}")]
    Wav(#[from] hound::Error),
    #[error("ffmpeg failed ({status}): {stderr}")]
    Ffmpeg { status: String, stderr: String },
}

/// Turns a raw buffer into an encoded file at `dest`. The pool only
/// schedules; everything codec-shaped lives behind this trait.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(
        &self,
        buffer: &RawAudioBuffer,
        format: OutputFormat,
        dest: &Path,
    ) -> Result<(), EncodeError>;
}

/// Production encoder: WAV in-process via hound, MP3 through an external
/// ffmpeg invocation fed raw PCM on stdin.
pub struct Transcoder {
    ffmpeg: PathBuf,
}

impl Transcoder {
    pub fn new(ffmpeg: PathBuf) -> Self {
        Self { ffmpeg }
    }

    async fn encode_with_ffmpeg(
        &self,
        buffer: &RawAudioBuffer,
        dest: &Path,
    ) -> Result<(), EncodeError> {
        let mut pcm = Vec::with_capacity(buffer.samples.len() * 2);
        for &sample in &buffer.samples {
            WriteBytesExt::write_i16::<LittleEndian>(&mut pcm, sample)?;
        }

        let mut child = Command::new(&self.ffmpeg)
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-f")
            .arg("s16le")
            .arg("-ar")
            .arg(buffer.sample_rate.to_string())
            .arg("-ac")
            .arg(buffer.channels.to_string())
            .arg("-i")
            .arg("pipe:0")
            .arg(dest)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&pcm).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(EncodeError::Ffmpeg {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

async fn write_wav(buffer: &RawAudioBuffer, dest: &Path) -> Result<(), EncodeError> {
    let spec = hound::WavSpec {
        channels: buffer.channels,
        sample_rate: buffer.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let samples = buffer.samples.clone();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let mut writer = hound::WavWriter::create(&dest, spec)?;
        for sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok::<(), EncodeError>(())
    })
    .await
    .map_err(|_| EncodeError::Io(std::io::Error::other("WAV writer task aborted")))?
}

#[async_trait]
impl Encoder for Transcoder {
    async fn encode(
        &self,
        buffer: &RawAudioBuffer,
        format: OutputFormat,
        dest: &Path,
    ) -> Result<(), EncodeError> {
        match format {
            OutputFormat::Wav => write_wav(buffer, dest).await,
            OutputFormat::Mp3 => self.encode_with_ffmpeg(buffer, dest).await,
        }
    }
}
