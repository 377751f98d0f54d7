pub mod encoder;
pub mod pool;

pub use encoder::{EncodeError, EncodedFile, Encoder, OutputFormat, Transcoder};
pub use pool::{ConversionTicket, ConversionWorkerPool, ConvertError};
