// src/replay/encoding.rs
//! Content-Encoding negotiation and transcoding
//!
//! Archived bodies keep the encoding the origin sent at record time. When a
//! replaying client does not accept it, the body is decoded and re-encoded
//! with the best coding the client does accept.

use crate::interception::ProxyResponse;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use hyper::header::{HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH};
use std::io::{Read, Write};
use tracing::debug;

/// Brotli quality used when re-encoding
const BROTLI_QUALITY: u32 = 5;

/// Brotli window size (log2)
const BROTLI_LGWIN: u32 = 22;

/// zstd level used when re-encoding
const ZSTD_LEVEL: i32 = 3;

/// Supported content codings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
    Brotli,
    Zstd,
}

impl ContentEncoding {
    /// Preference order among equally acceptable codings
    const PREFERENCE: [ContentEncoding; 4] = [
        ContentEncoding::Brotli,
        ContentEncoding::Gzip,
        ContentEncoding::Zstd,
        ContentEncoding::Deflate,
    ];

    /// Parse a `Content-Encoding` value. An empty value is identity.
    pub fn from_header(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => Some(ContentEncoding::Identity),
            "gzip" | "x-gzip" => Some(ContentEncoding::Gzip),
            "deflate" => Some(ContentEncoding::Deflate),
            "br" => Some(ContentEncoding::Brotli),
            "zstd" => Some(ContentEncoding::Zstd),
            _ => None,
        }
    }

    /// Coding token as used in headers
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Identity => "identity",
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Deflate => "deflate",
            ContentEncoding::Brotli => "br",
            ContentEncoding::Zstd => "zstd",
        }
    }

    /// Encode a body
    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let encoded = match self {
            ContentEncoding::Identity => Ok(data.to_vec()),
            ContentEncoding::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data).and_then(|_| encoder.finish())
            }
            ContentEncoding::Deflate => {
                let mut encoder =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data).and_then(|_| encoder.finish())
            }
            ContentEncoding::Brotli => brotli_encode(data),
            ContentEncoding::Zstd => zstd::encode_all(data, ZSTD_LEVEL),
        }
        .map_err(|e| EngineError::Transcode(format!("{} encode error: {}", self.as_str(), e)))?;

        debug!(
            "Encoded {} bytes -> {} bytes ({})",
            data.len(),
            encoded.len(),
            self.as_str()
        );

        Ok(encoded)
    }

    /// Decode a body
    pub fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoded = Vec::new();

        let result = match self {
            ContentEncoding::Identity => {
                decoded.extend_from_slice(data);
                Ok(())
            }
            ContentEncoding::Gzip => flate2::read::MultiGzDecoder::new(data)
                .read_to_end(&mut decoded)
                .map(|_| ()),
            ContentEncoding::Deflate => {
                // Some origins send raw deflate instead of zlib
                flate2::read::ZlibDecoder::new(data)
                    .read_to_end(&mut decoded)
                    .or_else(|_| {
                        decoded.clear();
                        flate2::read::DeflateDecoder::new(data).read_to_end(&mut decoded)
                    })
                    .map(|_| ())
            }
            ContentEncoding::Brotli => brotli::Decompressor::new(data, 4096)
                .read_to_end(&mut decoded)
                .map(|_| ()),
            ContentEncoding::Zstd => zstd::decode_all(data).map(|out| decoded = out),
        };

        result.map_err(|e| EngineError::Transcode(format!("{} decode error: {}", self.as_str(), e)))?;

        debug!(
            "Decoded {} bytes -> {} bytes ({})",
            data.len(),
            decoded.len(),
            self.as_str()
        );

        Ok(decoded)
    }
}

fn brotli_encode(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    {
        // The stream is finished when the writer drops
        let mut writer = brotli::CompressorWriter::new(&mut out, 4096, BROTLI_QUALITY, BROTLI_LGWIN);
        writer.write_all(data)?;
        writer.flush()?;
    }
    Ok(out)
}

/// Parsed `Accept-Encoding` header
#[derive(Debug, Clone, Default)]
pub struct AcceptEncoding {
    /// Lower-cased coding tokens with their q-values
    entries: Vec<(String, f32)>,
}

impl AcceptEncoding {
    /// Parse a header value. Malformed q-values count as 1.
    pub fn parse(header: &str) -> Self {
        let entries = header
            .split(',')
            .filter_map(|item| {
                let mut params = item.split(';');
                let coding = params.next()?.trim().to_ascii_lowercase();
                if coding.is_empty() {
                    return None;
                }

                let q = params
                    .filter_map(|param| {
                        let (key, value) = param.split_once('=')?;
                        key.trim()
                            .eq_ignore_ascii_case("q")
                            .then(|| value.trim().parse::<f32>().unwrap_or(1.0))
                    })
                    .last()
                    .unwrap_or(1.0);

                Some((coding, q))
            })
            .collect();

        Self { entries }
    }

    /// q-value the client gives `coding`, explicit entries before `*`
    fn quality(&self, coding: &str) -> Option<f32> {
        let aliases: &[&str] = match coding {
            "gzip" | "x-gzip" => &["gzip", "x-gzip"],
            _ => std::slice::from_ref(&coding),
        };

        self.entries
            .iter()
            .find(|(c, _)| aliases.contains(&c.as_str()))
            .or_else(|| self.entries.iter().find(|(c, _)| c == "*"))
            .map(|(_, q)| *q)
    }

    /// Whether the client accepts a `Content-Encoding` value. Identity is
    /// always acceptable.
    pub fn accepts(&self, content_encoding: &str) -> bool {
        let coding = content_encoding.trim().to_ascii_lowercase();
        if coding.is_empty() || coding == "identity" {
            return true;
        }

        self.quality(&coding).is_some_and(|q| q > 0.0)
    }

    /// Best supported coding for this client
    pub fn preferred(&self) -> ContentEncoding {
        let mut best = ContentEncoding::Identity;
        let mut best_q = 0.0;

        for encoding in ContentEncoding::PREFERENCE {
            if let Some(q) = self.quality(encoding.as_str()) {
                if q > best_q {
                    best = encoding;
                    best_q = q;
                }
            }
        }

        best
    }
}

/// Re-encode `resp` for a client sending `accept_encoding`, if its stored
/// encoding is not acceptable. Returns the new encoding when the body was
/// transcoded.
pub fn renegotiate(resp: &mut ProxyResponse, accept_encoding: &str) -> Result<Option<ContentEncoding>> {
    let accept = AcceptEncoding::parse(accept_encoding);

    let stored_value = match resp.headers().get(CONTENT_ENCODING) {
        Some(value) => value
            .to_str()
            .map_err(|e| EngineError::Transcode(format!("unreadable Content-Encoding: {}", e)))?
            .to_string(),
        None => String::new(),
    };

    if accept.accepts(&stored_value) {
        return Ok(None);
    }

    let stored = ContentEncoding::from_header(&stored_value).ok_or_else(|| {
        EngineError::Transcode(format!("unsupported Content-Encoding {}", stored_value))
    })?;
    let target = accept.preferred();

    debug!(
        "Translating Content-Encoding [{}] -> [{}]",
        stored.as_str(),
        target.as_str()
    );

    let decoded = stored.decode(resp.body())?;
    let encoded = target.encode(&decoded)?;

    match target {
        ContentEncoding::Identity => {
            resp.headers_mut().remove(CONTENT_ENCODING);
        }
        other => {
            resp.headers_mut()
                .insert(CONTENT_ENCODING, HeaderValue::from_static(other.as_str()));
        }
    }

    // Responses recorded without a length keep an indeterminate length
    if resp.headers().contains_key(CONTENT_LENGTH) {
        resp.headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from(encoded.len()));
    }

    *resp.body_mut() = Bytes::from(encoded);
    Ok(Some(target))
}
