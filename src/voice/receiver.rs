use super::audio::{stereo_to_mono, Speaker};
use super::sink::SharedRecordingState;
use songbird::{
    Event, EventContext, EventHandler, events::context_data::VoiceTick, model::payload::Speaking,
};

/// Songbird event adapter: maps SSRCs to users and routes decoded voice
/// ticks into the session's sink while the session is receiving.
pub struct Receiver {
    state: SharedRecordingState,
}

impl Receiver {
    pub fn new(state: SharedRecordingState) -> Self {
        Self { state }
    }
}

#[async_trait::async_trait]
impl EventHandler for Receiver {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match ctx {
            EventContext::SpeakingStateUpdate(Speaking {
                speaking: _,
                ssrc,
                user_id,
                ..
            }) => {
                if let Some(user_id) = user_id {
                    let mut state = self.state.lock().await;
                    state.ssrc_map.insert(*ssrc, user_id.0);
                }
            }
            EventContext::VoiceTick(VoiceTick {
                speaking,
                silent: _,
                ..
            }) => {
                let mut state = self.state.lock().await;

                if !state.active {
                    return None;
                }

                for (ssrc, voice_data) in speaking {
                    let decoded = match &voice_data.decoded_voice {
                        Some(d) => d,
                        None => continue,
                    };

                    if decoded.is_empty() {
                        continue;
                    }

                    let samples = stereo_to_mono(decoded);

                    if samples.iter().all(|&sample| sample == 0) {
                        continue;
                    }

                    let speaker = match state.ssrc_map.get(ssrc) {
                        Some(&user_id) => Speaker::Known(user_id),
                        None => Speaker::Unknown,
                    };

                    if let Some(sink) = state.sink.as_mut() {
                        sink.on_chunk(speaker, &samples);
                    }
                }
            }
            _ => {}
        }

        None
    }
}
