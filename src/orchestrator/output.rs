//! Result capture and composition

use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::runtime::RuntimeKind;
use crate::session::SessionState;

/// Primary output of a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Payload::Text(text) => text.into_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }

    /// Text view; binary content is decoded lossily
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Payload::Text(text) => Cow::Borrowed(text),
            Payload::Binary(bytes) => String::from_utf8_lossy(bytes),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// Everything returned for one execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub session_id: String,
    pub runtime: RuntimeKind,
    /// `Completed` or `Failed`
    pub state: SessionState,
    pub failure_reason: Option<String>,
    /// Headers the program asked for, to be applied verbatim
    pub response_headers: HeaderMap,
    pub payload: Payload,
    pub log: String,
    /// Print stream of the pre-warmed runtime
    pub secondary_output: Option<String>,
    pub duration: Duration,
}

impl ExecutionResult {
    /// The program (not the platform) failed
    pub fn failed(&self) -> bool {
        self.state == SessionState::Failed
    }

    /// Serializable view without the payload
    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            session_id: self.session_id.clone(),
            runtime: self.runtime,
            state: self.state,
            failure_reason: self.failure_reason.clone(),
            duration_ms: self.duration.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub session_id: String,
    pub runtime: RuntimeKind,
    pub state: SessionState,
    pub failure_reason: Option<String>,
    pub duration_ms: u64,
}

/// Parse `Name: value` lines. Lines that are not valid HTTP headers are dropped.
pub fn parse_headers(text: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed = line.split_once(':').and_then(|(name, value)| {
            let name = HeaderName::from_bytes(name.trim().as_bytes()).ok()?;
            let value = HeaderValue::from_str(value.trim()).ok()?;
            Some((name, value))
        });
        match parsed {
            Some((name, value)) => {
                headers.append(name, value);
            }
            None => warn!(line = %line, "Dropping invalid response header line"),
        }
    }
    headers
}

/// Read a result file. Missing files are empty; unreadable ones are logged and empty.
pub async fn read_output(path: &Path) -> Vec<u8> {
    match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            warn!(file = %path.display(), "Failed to read output file: {}", e);
            Vec::new()
        }
    }
}

/// [`read_output`] decoded as text
pub async fn read_output_text(path: &Path) -> String {
    let bytes = read_output(path).await;
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Payload, delimiter, log, delimiter, then the secondary output if any
pub fn compose(payload: Payload, delimiter: &str, log: &str, secondary: Option<&str>) -> Payload {
    let binary = matches!(payload, Payload::Binary(_));
    let mut out = payload.into_bytes();
    out.extend_from_slice(format!("\n{}\n", delimiter).as_bytes());
    out.extend_from_slice(log.as_bytes());
    out.extend_from_slice(format!("\n{}", delimiter).as_bytes());
    if let Some(secondary) = secondary {
        out.push(b'\n');
        out.extend_from_slice(secondary.as_bytes());
    }

    if binary {
        return Payload::Binary(out);
    }
    match String::from_utf8(out) {
        Ok(text) => Payload::Text(text),
        Err(e) => Payload::Binary(e.into_bytes()),
    }
}
