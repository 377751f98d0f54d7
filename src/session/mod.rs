pub mod registry;
pub mod session;

pub use registry::{SessionRegistry, StartError, StartedRecording, StopError};
pub use session::{FinalizeReport, RecordingSession};
