//! Server-Sent Events streaming layer.
//!
//! One stream session per open client connection: the handler
//! authenticates, subscribes through the broker, and attaches the session
//! loop to a `text/event-stream` response body.

mod encoder;
mod handler;
mod session;

pub use encoder::FrameEncoder;
pub use handler::{stream_handler, StreamQuery};
pub use session::session_stream;
