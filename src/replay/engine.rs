// src/replay/engine.rs
//! Archive-backed replay of HTTP exchanges
//!
//! Each exchange goes through the same stages:
//!
//! 1. Control paths (liveness probe, shutdown command, chronology reset)
//! 2. Archive lookup
//! 3. Content-Encoding renegotiation against the client's `Accept-Encoding`
//! 4. Date coherence
//! 5. Registered transformers, in order
//!
//! Any failure from stage 2 on yields a 404 placeholder together with the
//! underlying error.

use crate::archive::{Archive, ArchiveFile};
use crate::interception::{attach_origin, placeholder_response, ClientAddr, ProxyRequest, ProxyResponse};
use crate::observability::{REPLAY_REQUESTS_TOTAL, REPLAY_TRANSCODES_TOTAL};
use crate::replay::dates::update_dates;
use crate::replay::encoding::renegotiate;
use crate::replay::script_injector::ScriptInjector;
use crate::replay::transform::ResponseTransformer;
use crate::utils::errors::{EngineError, Result};
use chrono::Utc;
use hyper::header::ACCEPT_ENCODING;
use hyper::StatusCode;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use tracing::{debug, info, warn};

/// Liveness probe, answered with an empty 200
pub const GENERATE_200_PATH: &str = "/web-page-replay-generate-200";

/// Terminates the process
pub const COMMAND_EXIT_PATH: &str = "/web-page-replay-command-exit";

/// Returns the archive to its first recorded response for every request
pub const RESET_CHRONOLOGY_PATH: &str = "/web-page-replay-reset-replay-chronology";

/// Token in injected scripts replaced by the time seed in milliseconds
pub const TIME_SEED_PLACEHOLDER: &str = "{{WPR_TIME_SEED_TIMESTAMP}}";

/// Who may trigger the shutdown control path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Never shut down on request
    Deny,

    /// Only clients connecting from a loopback address
    #[default]
    #[serde(rename = "loopback")]
    LoopbackOnly,

    /// Any client
    Allow,
}

impl ShutdownPolicy {
    /// Whether a shutdown requested by `client` is honoured. Requests with
    /// no known peer only pass under `Allow`.
    pub fn permits(&self, client: Option<SocketAddr>) -> bool {
        match self {
            ShutdownPolicy::Deny => false,
            ShutdownPolicy::Allow => true,
            ShutdownPolicy::LoopbackOnly => client.map(|addr| addr.ip().is_loopback()).unwrap_or(false),
        }
    }
}

/// Result of replaying one exchange
#[derive(Debug)]
pub enum ReplayOutcome {
    /// Forward this response to the client
    Forward(ProxyResponse),

    /// The request was a command that produces no response
    Handled,

    /// The host must terminate the process
    Shutdown,

    /// Replay failed; forward the placeholder and report the error
    Degraded {
        placeholder: ProxyResponse,
        error: EngineError,
    },
}

impl ReplayOutcome {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            ReplayOutcome::Forward(_) => "forward",
            ReplayOutcome::Handled => "handled",
            ReplayOutcome::Shutdown => "shutdown",
            ReplayOutcome::Degraded { .. } => "degraded",
        }
    }
}

/// Replays archived responses
pub struct ReplayEngine {
    /// Archive and its replay cursor; lookups and resets are serialized here
    archive: Mutex<Box<dyn Archive>>,

    /// Applied to every matched response, in order
    transformers: Vec<Box<dyn ResponseTransformer>>,

    /// Recorded time seed, or the wall clock at load for archives without one
    time_seed_ms: i64,

    shutdown_policy: ShutdownPolicy,
}

impl ReplayEngine {
    /// Open the archive at `archive_path` and load the comma-separated
    /// `inject_scripts`
    pub fn open(
        archive_path: impl AsRef<Path>,
        inject_scripts: &str,
        shutdown_policy: ShutdownPolicy,
    ) -> Result<Self> {
        let archive = ArchiveFile::open(archive_path)?;

        let mut engine = Self::new(Box::new(archive), shutdown_policy);
        engine.load_scripts(inject_scripts)?;

        Ok(engine)
    }

    /// Create an engine over an already opened archive
    pub fn new(archive: Box<dyn Archive>, shutdown_policy: ShutdownPolicy) -> Self {
        let recorded = archive.deterministic_time_seed_ms();
        let time_seed_ms = if recorded == 0 {
            let now = Utc::now().timestamp_millis();
            debug!("Archive has no time seed, using {}", now);
            now
        } else {
            recorded
        };

        Self {
            archive: Mutex::new(archive),
            transformers: Vec::new(),
            time_seed_ms,
            shutdown_policy,
        }
    }

    /// Load every script in the comma-separated `inject_scripts` list as a
    /// `ScriptInjector`
    pub fn load_scripts(&mut self, inject_scripts: &str) -> Result<()> {
        let mut replacements = HashMap::new();
        replacements.insert(TIME_SEED_PLACEHOLDER.to_string(), self.time_seed_ms.to_string());

        for path in inject_scripts.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let injector = ScriptInjector::from_file(path, &replacements)?;
            self.add_transformer(Box::new(injector));
        }

        Ok(())
    }

    /// Append a transformer
    pub fn add_transformer(&mut self, transformer: Box<dyn ResponseTransformer>) {
        self.transformers.push(transformer);
    }

    /// Time seed in effect for this run
    pub fn time_seed_ms(&self) -> i64 {
        self.time_seed_ms
    }

    pub fn shutdown_policy(&self) -> ShutdownPolicy {
        self.shutdown_policy
    }

    /// Replay one exchange
    pub fn round_trip(&self, req: &ProxyRequest) -> ReplayOutcome {
        let outcome = match req.uri().path() {
            GENERATE_200_PATH => ReplayOutcome::Forward(placeholder_response(StatusCode::OK, req)),
            COMMAND_EXIT_PATH => self.shutdown_command(req),
            RESET_CHRONOLOGY_PATH => {
                info!("Received {}, resetting replay order to start", RESET_CHRONOLOGY_PATH);
                self.archive.lock().start_new_replay_session();
                ReplayOutcome::Handled
            }
            _ => self.replay(req),
        };

        metrics::counter!(REPLAY_REQUESTS_TOTAL, "outcome" => outcome.label()).increment(1);
        outcome
    }

    fn shutdown_command(&self, req: &ProxyRequest) -> ReplayOutcome {
        let client = req.extensions().get::<ClientAddr>().map(|addr| addr.0);

        if self.shutdown_policy.permits(client) {
            info!("Shutting down. Received {}", COMMAND_EXIT_PATH);
            return ReplayOutcome::Shutdown;
        }

        warn!(
            "Refused {} from {:?} (policy {:?})",
            COMMAND_EXIT_PATH, client, self.shutdown_policy
        );
        ReplayOutcome::Forward(placeholder_response(StatusCode::FORBIDDEN, req))
    }

    fn replay(&self, req: &ProxyRequest) -> ReplayOutcome {
        let lookup = self.archive.lock().find_request(req);

        let (fingerprint, mut resp) = match lookup {
            Ok(found) => found,
            Err(e) => {
                warn!("Couldn't find matching request {}: {}", req.uri(), e);
                return degraded(req, e);
            }
        };

        let accept_encoding = req
            .headers()
            .get(ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        match renegotiate(&mut resp, accept_encoding) {
            Ok(Some(_)) => metrics::counter!(REPLAY_TRANSCODES_TOTAL).increment(1),
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to transcode {}: {}", fingerprint, e);
                return degraded(req, e);
            }
        }

        update_dates(resp.headers_mut(), Utc::now());

        for transformer in &self.transformers {
            transformer.transform(req, &mut resp);
        }

        attach_origin(&mut resp, req);
        debug!("Serving {} response for {}", resp.status(), fingerprint);

        ReplayOutcome::Forward(resp)
    }
}

fn degraded(req: &ProxyRequest, error: EngineError) -> ReplayOutcome {
    ReplayOutcome::Degraded {
        placeholder: placeholder_response(StatusCode::NOT_FOUND, req),
        error,
    }
}
