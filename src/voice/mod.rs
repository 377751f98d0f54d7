pub mod audio;
pub mod receiver;
pub mod sink;

pub use audio::{RawAudioBuffer, Speaker};
pub use receiver::Receiver;
pub use sink::{AudioFileSink, RecordingState, SharedRecordingState};
