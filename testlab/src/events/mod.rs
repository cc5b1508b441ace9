//! Progress event encoding and transport.

mod encoder;
mod transport;

pub use encoder::{parse_sse_frame, sse_frame};
pub use transport::{event_channel, EventSender, EventStream};
