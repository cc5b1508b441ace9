//! Server-sent-event text framing for progress events.
//!
//! The transport itself is channel-based; these helpers render and parse
//! the `data: {json}\n\n` frames an HTTP layer would put on the wire.

use crate::core::ProgressEvent;
use crate::errors::PipelineError;

/// Renders one event as an SSE data frame.
pub fn sse_frame(event: &ProgressEvent) -> Result<String, PipelineError> {
    let json = serde_json::to_string(event)?;
    Ok(format!("data: {json}\n\n"))
}

/// Parses one SSE data frame back into an event.
///
/// Frames that are not well-formed are protocol faults: the caller logs
/// and discards them, continuing from the next well-formed frame.
pub fn parse_sse_frame(frame: &str) -> Result<ProgressEvent, PipelineError> {
    let body = frame
        .trim_end_matches('\n')
        .strip_prefix("data: ")
        .ok_or_else(|| PipelineError::Protocol(format!("frame missing data prefix: {frame:?}")))?;
    serde_json::from_str(body)
        .map_err(|e| PipelineError::Protocol(format!("malformed event frame: {e}")))
}
