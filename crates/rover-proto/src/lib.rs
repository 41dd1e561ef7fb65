//! Wire contract shared by the control panel and the rover agent.
//! Both roles depend on this crate so the header names, the command path and
//! the request envelope cannot drift apart.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Path of the single agent endpoint.
pub const COMMAND_PATH: &str = "/command";

/// Response header the agent uses to report command output.
pub const COMMAND_OUTPUT_HEADER: &str = "command-output";

/// Response header the control panel relays the agent's output indicator in.
pub const RELAYED_OUTPUT_HEADER: &str = "x-command-output";

/// Response header carrying the name of a freshly created rover.
pub const ROVER_ID_HEADER: &str = "x-roverid";

/// Cookie holding the operator's session token.
pub const SESSION_COOKIE: &str = "session";

/// Upper bound on the rendered `Command-Output` header.
pub const MAX_OUTPUT_HEADER_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("command text is not valid utf-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("failed to encode command envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Turns an operator-supplied command body into the agent's request body.
///
/// A body that already is a `{"command": ...}` envelope is passed through
/// byte-for-byte. Anything else is treated as raw command text and wrapped,
/// so the agent's shell receives exactly the bytes the operator sent.
pub fn command_envelope(body: &[u8]) -> Result<Cow<'_, [u8]>, EnvelopeError> {
    if serde_json::from_slice::<CommandRequest>(body).is_ok() {
        return Ok(Cow::Borrowed(body));
    }
    let command = std::str::from_utf8(body)?;
    let envelope = serde_json::to_vec(&CommandRequest {
        command: command.to_owned(),
    })?;
    Ok(Cow::Owned(envelope))
}

/// Renders command output as a single-line value that is always a legal
/// HTTP header value.
pub fn render_output_header(output: &[u8]) -> String {
    let text = String::from_utf8_lossy(output);
    let mut rendered = String::with_capacity(text.len().min(MAX_OUTPUT_HEADER_BYTES));
    for ch in text.trim().chars() {
        let ch = match ch {
            '\r' | '\n' => ' ',
            '\t' => '\t',
            c if c.is_control() => continue,
            c => c,
        };
        if rendered.len() + ch.len_utf8() > MAX_OUTPUT_HEADER_BYTES {
            break;
        }
        rendered.push(ch);
    }
    let trimmed = rendered.trim_end().len();
    rendered.truncate(trimmed);
    rendered
}
