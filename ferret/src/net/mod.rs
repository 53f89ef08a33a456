//! Network plumbing: length codec, message framing, framed streams.

pub mod error;
pub mod length;
pub mod message;
pub mod stream;

pub use error::Error;
pub use message::{Frame, FILE_FOLLOWS};
pub use stream::FrameStream;
