// src/archive/mod.rs
//! Archive of captured HTTP exchanges
//!
//! The replay engine only talks to the `Archive` trait. `ArchiveFile` is the
//! file-backed implementation the binary uses.
//!
//! # Chronology
//!
//! A fingerprint may have several recorded responses. Lookups walk them in
//! recorded order and stay on the last one; `start_new_replay_session`
//! returns every fingerprint to its first response.

pub mod file;

use crate::interception::{request_host, ProxyRequest, ProxyResponse};
use crate::utils::errors::Result;
use std::fmt;

pub use file::{ArchiveDocument, ArchiveEntry, ArchiveFile, StoredResponse};

/// Source of recorded responses
///
/// Implementations need not be internally synchronized; the replay engine
/// serializes all calls.
pub trait Archive: Send {
    /// Find the response recorded for `req`, advancing the replay cursor.
    /// Returns the matching fingerprint and a fresh copy of the response.
    fn find_request(&mut self, req: &ProxyRequest) -> Result<(Fingerprint, ProxyResponse)>;

    /// Return the replay cursor to the start of the recording
    fn start_new_replay_session(&mut self);

    /// Time seed recorded with the archive, in milliseconds since the epoch.
    /// Zero when the archive predates time seeds.
    fn deterministic_time_seed_ms(&self) -> i64;
}

/// Matching key of a request: method and absolute URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub method: String,
    pub url: String,
}

impl Fingerprint {
    /// Create a fingerprint from a method and an absolute URL
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
        }
    }

    /// Fingerprint of an incoming request. Origin-form URIs are completed
    /// with `http` and the `Host` header.
    pub fn from_request(req: &ProxyRequest) -> Self {
        let uri = req.uri();
        let scheme = uri.scheme_str().unwrap_or("http");
        let host = request_host(req);
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        Self::new(req.method().as_str(), &format!("{}://{}{}", scheme, host, path))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}
