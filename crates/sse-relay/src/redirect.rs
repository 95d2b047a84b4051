//! Redirect offload: map a subscription request to the internal stream URL
//!
//! In the offload deployment mode an edge proxy holds the long-lived
//! client connection; the origin only computes which internal URL the
//! proxy should open.

use std::fmt::Write;

use crate::error::Result;
use crate::event::{encode_resume, normalize_channels, ResumePoint};

/// Default internal path prefix of the stream endpoint
pub const DEFAULT_STREAM_PREFIX: &str = "/stream";

/// Pure resolver for the redirect offload mode
///
/// No I/O; safe to call from any request handler.
#[derive(Debug, Clone)]
pub struct RedirectResolver {
    prefix: String,
}

impl RedirectResolver {
    /// Create a resolver for an internal path prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        while prefix.ends_with('/') {
            prefix.pop();
        }
        Self { prefix }
    }

    /// Build the internal stream URL for a channel set
    ///
    /// Channels become path segments; the resume point and polling flag
    /// become the reserved `lastEventId` and `polling` query parameters.
    /// Channels literally named after either parameter are rejected.
    pub fn resolve(
        &self,
        channels: &[String],
        resume: Option<&ResumePoint>,
        polling: bool,
    ) -> Result<String> {
        let channels = normalize_channels(channels)?;

        let mut url = self.prefix.clone();
        for channel in &channels {
            url.push('/');
            url.push_str(&encode_segment(channel));
        }

        let mut params: Vec<String> = Vec::new();
        if let Some(resume) = resume {
            if !resume.is_empty() {
                params.push(format!("lastEventId={}", encode_resume(&channels, resume)));
            }
        }
        if polling {
            params.push("polling=1".to_string());
        }
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        Ok(url)
    }
}

impl Default for RedirectResolver {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_PREFIX)
    }
}

/// Percent-encode one path segment (RFC 3986 unreserved bytes pass through)
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => {
                let _ = write!(out, "%{:02X}", byte);
            }
        }
    }
    out
}
