//! Progress feed parsing
//!
//! The daemon reports build progress as one JSON object per line. Each
//! object's `stream` text is forwarded to the caller unchanged, while layer
//! ids and base image references found in it are recorded in the
//! [`BuildSession`]. An object with a non-empty `error` field ends the build.

use crate::{extract_from_tag, extract_layer, BuildError, BuildSession, Result};
use futures::StreamExt;
use imgbuild_provider::ProgressStream;
use serde::Deserialize;

/// One decoded unit of the daemon's progress feed
#[derive(Debug, Deserialize)]
struct ProgressMessage {
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Turns the raw progress feed into progress text while filling a session.
pub struct ProgressParser<'a> {
    upstream: Option<ProgressStream>,
    buffer: Vec<u8>,
    session: &'a mut BuildSession,
}

impl<'a> ProgressParser<'a> {
    pub fn new(upstream: ProgressStream, session: &'a mut BuildSession) -> Self {
        Self {
            upstream: Some(upstream),
            buffer: Vec::new(),
            session,
        }
    }

    /// Next piece of progress text.
    ///
    /// Returns `Ok(None)` once the feed has ended cleanly. After an error the
    /// upstream feed is released and every later call returns `Ok(None)`.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            while let Some(line) = self.take_line() {
                match self.process(&line) {
                    Ok(Some(text)) => return Ok(Some(text)),
                    Ok(None) => {}
                    Err(e) => {
                        self.unsubscribe();
                        return Err(e);
                    }
                }
            }

            let Some(upstream) = self.upstream.as_mut() else {
                return Ok(None);
            };

            let next = upstream.next().await;
            match next {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    self.unsubscribe();
                    return Err(BuildError::Transport(e.to_string()));
                }
                None => {
                    self.upstream = None;
                    // A final object may arrive without its newline
                    if !self.buffer.is_empty() {
                        self.buffer.push(b'\n');
                    }
                }
            }
        }
    }

    /// Whether the upstream feed is still being read
    pub fn is_subscribed(&self) -> bool {
        self.upstream.is_some()
    }

    fn unsubscribe(&mut self) {
        self.upstream = None;
        self.buffer.clear();
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
        line.pop();
        Some(line)
    }

    fn process(&mut self, line: &[u8]) -> Result<Option<String>> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return Ok(None);
        }

        let message: Option<ProgressMessage> =
            serde_json::from_slice(line).map_err(|e| BuildError::Decode(e.to_string()))?;
        let Some(message) = message else {
            return Ok(None);
        };

        if let Some(error) = message.error.filter(|e| !e.is_empty()) {
            tracing::debug!("Daemon reported build error: {}", error);
            return Err(BuildError::Daemon(error));
        }

        let Some(text) = message.stream else {
            return Ok(None);
        };

        if let Some(layer) = extract_layer(&text) {
            tracing::debug!("Layer complete: {}", layer);
            self.session.record_layer(layer);
        }
        if let Some(tag) = extract_from_tag(&text) {
            tracing::debug!("Base image: {} (alias {:?})", tag.repo, tag.alias);
            self.session.record_from_tag(tag);
        }

        Ok(Some(text))
    }
}
