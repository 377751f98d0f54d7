use super::session::RecordingSession;
use crate::convert::OutputFormat;
use crate::voice::SharedRecordingState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("a recording is already active on this guild")]
    AlreadyRecording,
    #[error("cleanup from the previous recording is still running")]
    Cleaning,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StopError {
    #[error("no recording is active on this guild")]
    NotRecording,
    #[error("cleanup is already in progress")]
    CleaningInProgress,
}

enum RoomSlot {
    Receiving(RecordingSession),
    Cleaning,
}

/// What the command layer needs after a successful start: the id for the
/// reply and the shared state for wiring the voice receiver.
#[derive(Debug)]
pub struct StartedRecording {
    pub session_id: String,
    pub state: SharedRecordingState,
}

/// Process-wide map of active recordings, at most one per guild.
///
/// Entry-level locking makes check-and-insert atomic: two simultaneous
/// start requests for the same guild cannot both succeed. Entries survive
/// as `Cleaning` markers while finalize runs, so stop/start during cleanup
/// are rejected rather than racing the teardown.
pub struct SessionRegistry {
    rooms: DashMap<u64, RoomSlot>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    pub fn try_start(
        &self,
        guild_id: u64,
        started_by: u64,
        format: OutputFormat,
        base_dir: &Path,
    ) -> Result<StartedRecording, StartError> {
        match self.rooms.entry(guild_id) {
            Entry::Occupied(slot) => match slot.get() {
                RoomSlot::Receiving(_) => Err(StartError::AlreadyRecording),
                RoomSlot::Cleaning => Err(StartError::Cleaning),
            },
            Entry::Vacant(slot) => {
                let session = RecordingSession::new(guild_id, started_by, format, base_dir);
                let started = StartedRecording {
                    session_id: session.session_id.clone(),
                    state: Arc::clone(&session.state),
                };
                slot.insert(RoomSlot::Receiving(session));
                Ok(started)
            }
        }
    }

    /// Transitions a receiving session to cleaning and hands it to the
    /// caller for finalization. The entry stays visible until `remove`, so
    /// a second stop sees CleaningInProgress rather than absence.
    pub fn try_stop(&self, guild_id: u64) -> Result<RecordingSession, StopError> {
        match self.rooms.get_mut(&guild_id) {
            None => Err(StopError::NotRecording),
            Some(mut slot) => match std::mem::replace(slot.value_mut(), RoomSlot::Cleaning) {
                RoomSlot::Receiving(session) => Ok(session),
                RoomSlot::Cleaning => Err(StopError::CleaningInProgress),
            },
        }
    }

    /// Called exactly once per session when finalize completes, success or
    /// failure. Makes the guild startable again.
    pub fn remove(&self, guild_id: u64) {
        self.rooms.remove(&guild_id);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
