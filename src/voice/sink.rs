use super::audio::{RawAudioBuffer, Speaker};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// In-memory accumulator of per-speaker audio for one recording session.
///
/// Chunks append to independent per-speaker buffers, so interleaved arrivals
/// from different speakers never touch each other's data. Single-use: flush
/// consumes the sink.
#[derive(Debug, Default)]
pub struct AudioFileSink {
    buffers: HashMap<Speaker, Vec<i16>>,
}

impl AudioFileSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_chunk(&mut self, speaker: Speaker, samples: &[i16]) {
        self.buffers.entry(speaker).or_default().extend_from_slice(samples);
    }

    /// One buffer per speaker that sent audio, known speakers in id order and
    /// the unknown bucket last. Within each buffer samples are in arrival
    /// order.
    pub fn flush(self) -> Vec<(Speaker, RawAudioBuffer)> {
        let mut entries: Vec<(Speaker, RawAudioBuffer)> = self
            .buffers
            .into_iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(speaker, samples)| (speaker, RawAudioBuffer::capture(samples)))
            .collect();
        entries.sort_by_key(|(speaker, _)| *speaker);
        entries
    }
}

#[derive(Debug)]
pub struct RecordingState {
    pub active: bool,
    pub ssrc_map: HashMap<u32, u64>,
    pub sink: Option<AudioFileSink>,
}

impl RecordingState {
    /// State for a session entering RECEIVING: sink open, intake armed.
    pub fn armed() -> Self {
        Self {
            active: true,
            ssrc_map: HashMap::new(),
            sink: Some(AudioFileSink::new()),
        }
    }

    /// Disarms intake and takes the sink out for finalization. Chunks that
    /// arrive afterwards are dropped by the receiver.
    pub fn stop(&mut self) -> Option<AudioFileSink> {
        self.active = false;
        self.sink.take()
    }
}

pub type SharedRecordingState = Arc<Mutex<RecordingState>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_buckets_per_speaker_in_arrival_order() {
        let mut sink = AudioFileSink::new();
        sink.on_chunk(Speaker::Known(2), &[30]);
        sink.on_chunk(Speaker::Known(1), &[1, 2]);
        sink.on_chunk(Speaker::Unknown, &[90]);
        sink.on_chunk(Speaker::Known(1), &[3]);
        sink.on_chunk(Speaker::Unknown, &[91]);

        let buffers = sink.flush();
        assert_eq!(buffers.len(), 3);

        assert_eq!(buffers[0].0, Speaker::Known(1));
        assert_eq!(buffers[0].1.samples, vec![1, 2, 3]);
        assert_eq!(buffers[1].0, Speaker::Known(2));
        assert_eq!(buffers[1].1.samples, vec![30]);
        assert_eq!(buffers[2].0, Speaker::Unknown);
        assert_eq!(buffers[2].1.samples, vec![90, 91]);
    }

    #[test]
    fn flush_of_silent_session_is_empty() {
        let sink = AudioFileSink::new();
        assert!(sink.flush().is_empty());
    }

    #[test]
    fn unknown_chunks_share_one_bucket() {
        let mut sink = AudioFileSink::new();
        sink.on_chunk(Speaker::Unknown, &[1]);
        sink.on_chunk(Speaker::Unknown, &[2]);

        let buffers = sink.flush();
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers[0].1.samples, vec![1, 2]);
    }

    #[test]
    fn stop_takes_the_sink_once() {
        let mut state = RecordingState::armed();
        assert!(state.active);
        if let Some(sink) = state.sink.as_mut() {
            sink.on_chunk(Speaker::Known(1), &[5]);
        }

        let sink = state.stop();
        assert!(!state.active);
        assert!(sink.is_some());
        assert!(state.stop().is_none());
    }
}
