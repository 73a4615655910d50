// src/archive/file.rs
//! File-backed archive
//!
//! The file is a JSON document, optionally gzip- or zstd-compressed:
//!
//! ```json
//! {
//!   "deterministic_time_seed_ms": 1700000000000,
//!   "entries": [
//!     {"method": "GET", "url": "http://example.com/a.js",
//!      "response": {"status": 200, "headers": [["Content-Encoding", "gzip"]], "body": "<base64>"}}
//!   ]
//! }
//! ```
//!
//! Entries are in recorded order.

use crate::archive::{Archive, Fingerprint};
use crate::interception::{ProxyRequest, ProxyResponse};
use crate::replay::encoding::ContentEncoding;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Serialized archive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveDocument {
    /// Time seed in milliseconds since the epoch, zero if never recorded
    #[serde(default)]
    pub deterministic_time_seed_ms: i64,

    /// Recorded exchanges, oldest first
    #[serde(default)]
    pub entries: Vec<ArchiveEntry>,
}

impl ArchiveDocument {
    /// Append a recorded exchange
    pub fn push(&mut self, method: &str, url: &str, response: StoredResponse) {
        self.entries.push(ArchiveEntry {
            method: method.to_string(),
            url: url.to_string(),
            response,
        });
    }
}

/// One recorded exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub method: String,
    pub url: String,
    pub response: StoredResponse,
}

/// A recorded response as it was captured
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,

    #[serde(default)]
    pub headers: Vec<(String, String)>,

    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

impl StoredResponse {
    /// Create a stored response
    pub fn new(status: u16, headers: &[(&str, &str)], body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            body: body.into(),
        }
    }
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Validated response ready to be copied out per lookup
#[derive(Debug, Clone)]
struct Recorded {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Recorded {
    fn from_stored(stored: &StoredResponse) -> Result<Self> {
        let status = StatusCode::from_u16(stored.status)
            .map_err(|e| EngineError::ArchiveOpen(format!("invalid status {}: {}", stored.status, e)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &stored.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| EngineError::ArchiveOpen(format!("invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| EngineError::ArchiveOpen(format!("invalid value for {}: {}", name, e)))?;
            headers.append(name, value);
        }

        Ok(Self {
            status,
            headers,
            body: Bytes::from(stored.body.clone()),
        })
    }

    fn to_response(&self) -> ProxyResponse {
        let mut resp = Response::new(self.body.clone());
        *resp.status_mut() = self.status;
        *resp.headers_mut() = self.headers.clone();
        resp
    }
}

/// Archive loaded fully into memory
#[derive(Debug, Default)]
pub struct ArchiveFile {
    time_seed_ms: i64,
    responses: HashMap<Fingerprint, Vec<Recorded>>,
    served: HashMap<Fingerprint, usize>,
}

impl ArchiveFile {
    /// Open an archive file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path)
            .map_err(|e| EngineError::ArchiveOpen(format!("{}: {}", path.display(), e)))?;

        let json = decode_container(&raw)
            .map_err(|e| EngineError::ArchiveOpen(format!("{}: {}", path.display(), e)))?;

        let document: ArchiveDocument = serde_json::from_slice(&json)
            .map_err(|e| EngineError::ArchiveOpen(format!("{}: {}", path.display(), e)))?;

        let archive = Self::from_document(&document)?;
        info!(
            "Opened archive {} ({} entries)",
            path.display(),
            document.entries.len()
        );

        Ok(archive)
    }

    /// Build an archive from an in-memory document
    pub fn from_document(document: &ArchiveDocument) -> Result<Self> {
        let mut responses: HashMap<Fingerprint, Vec<Recorded>> = HashMap::new();

        for entry in &document.entries {
            let fingerprint = Fingerprint::new(&entry.method, &entry.url);
            responses
                .entry(fingerprint)
                .or_default()
                .push(Recorded::from_stored(&entry.response)?);
        }

        Ok(Self {
            time_seed_ms: document.deterministic_time_seed_ms,
            responses,
            served: HashMap::new(),
        })
    }

    /// Number of distinct fingerprints
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    /// Whether the archive holds no responses
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

impl Archive for ArchiveFile {
    fn find_request(&mut self, req: &ProxyRequest) -> Result<(Fingerprint, ProxyResponse)> {
        let fingerprint = Fingerprint::from_request(req);

        let recorded = self
            .responses
            .get(&fingerprint)
            .filter(|list| !list.is_empty())
            .ok_or_else(|| EngineError::LookupMiss(fingerprint.to_string()))?;

        let cursor = self.served.entry(fingerprint.clone()).or_insert(0);
        let position = (*cursor).min(recorded.len() - 1);
        *cursor = position + 1;

        debug!(
            "Matched {} (response {} of {})",
            fingerprint,
            position + 1,
            recorded.len()
        );

        Ok((fingerprint, recorded[position].to_response()))
    }

    fn start_new_replay_session(&mut self) {
        self.served.clear();
    }

    fn deterministic_time_seed_ms(&self) -> i64 {
        self.time_seed_ms
    }
}

/// Strip an optional gzip or zstd container
fn decode_container(raw: &[u8]) -> Result<Vec<u8>> {
    if raw.starts_with(&GZIP_MAGIC) {
        ContentEncoding::Gzip.decode(raw)
    } else if raw.starts_with(&ZSTD_MAGIC) {
        ContentEncoding::Zstd.decode(raw)
    } else {
        Ok(raw.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Request;

    fn get(uri: &str) -> ProxyRequest {
        Request::builder().uri(uri).body(Bytes::new()).unwrap()
    }

    fn document() -> ArchiveDocument {
        let mut doc = ArchiveDocument {
            deterministic_time_seed_ms: 1_700_000_000_000,
            entries: Vec::new(),
        };
        doc.push(
            "GET",
            "http://example.com/clock",
            StoredResponse::new(200, &[("Content-Type", "text/plain")], "first"),
        );
        doc.push(
            "GET",
            "http://example.com/clock",
            StoredResponse::new(200, &[("Content-Type", "text/plain")], "second"),
        );
        doc.push(
            "POST",
            "http://example.com/clock",
            StoredResponse::new(201, &[], "posted"),
        );
        doc
    }

    #[test]
    fn test_chronological_lookup() {
        let mut archive = ArchiveFile::from_document(&document()).unwrap();
        assert_eq!(archive.len(), 2);

        let (_, first) = archive.find_request(&get("http://example.com/clock")).unwrap();
        let (_, second) = archive.find_request(&get("http://example.com/clock")).unwrap();
        let (_, third) = archive.find_request(&get("http://example.com/clock")).unwrap();

        assert_eq!(first.body().as_ref(), b"first");
        assert_eq!(second.body().as_ref(), b"second");
        // Stays on the last recorded response
        assert_eq!(third.body().as_ref(), b"second");

        archive.start_new_replay_session();
        let (_, again) = archive.find_request(&get("http://example.com/clock")).unwrap();
        assert_eq!(again.body().as_ref(), b"first");
    }

    #[test]
    fn test_method_is_part_of_fingerprint() {
        let mut archive = ArchiveFile::from_document(&document()).unwrap();
        let req = Request::builder()
            .method("POST")
            .uri("http://example.com/clock")
            .body(Bytes::new())
            .unwrap();

        let (fingerprint, resp) = archive.find_request(&req).unwrap();
        assert_eq!(fingerprint.method, "POST");
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[test]
    fn test_miss() {
        let mut archive = ArchiveFile::from_document(&document()).unwrap();
        let err = archive
            .find_request(&get("http://example.com/missing"))
            .unwrap_err();
        assert!(matches!(err, EngineError::LookupMiss(_)));
    }

    #[test]
    fn test_open_gzip_file() {
        let json = serde_json::to_vec(&document()).unwrap();
        let compressed = ContentEncoding::Gzip.encode(&json).unwrap();

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), compressed).unwrap();

        let mut archive = ArchiveFile::open(file.path()).unwrap();
        assert_eq!(archive.deterministic_time_seed_ms(), 1_700_000_000_000);

        let (_, resp) = archive.find_request(&get("http://example.com/clock")).unwrap();
        assert_eq!(resp.headers()["content-type"], "text/plain");
    }

    #[test]
    fn test_open_plain_file_without_seed() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), br#"{"entries": []}"#).unwrap();

        let archive = ArchiveFile::open(file.path()).unwrap();
        assert!(archive.is_empty());
        assert_eq!(archive.deterministic_time_seed_ms(), 0);
    }

    #[test]
    fn test_open_failures() {
        let missing = ArchiveFile::open("/nonexistent/archive.json").unwrap_err();
        assert!(matches!(missing, EngineError::ArchiveOpen(_)));

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not an archive").unwrap();
        let corrupt = ArchiveFile::open(file.path()).unwrap_err();
        assert!(matches!(corrupt, EngineError::ArchiveOpen(_)));
    }

    #[test]
    fn test_body_is_base64() {
        let stored = StoredResponse::new(200, &[], "hi");
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["body"], "aGk=");
    }
}
