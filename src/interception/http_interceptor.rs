// src/interception/http_interceptor.rs
//! HTTP/1 replay host
//!
//! Accepts client connections, runs every exchange through the modifier
//! registry and the replay engine, and writes the result back. Modifier and
//! replay work is synchronous and runs on the blocking pool.

use crate::interception::exchange::{placeholder_response, ClientAddr, ProxyRequest, ProxyResponse};
use crate::interception::session::{CapturedSession, SessionHandle};
use crate::modifiers::ModifierRegistry;
use crate::replay::{ReplayEngine, ReplayOutcome};
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Configuration for the HTTP host
#[derive(Debug, Clone)]
pub struct InterceptorConfig {
    /// Listen address
    pub listen_addr: SocketAddr,

    /// Log request lines and headers at debug level
    pub log_requests: bool,

    /// Log response status and headers at debug level
    pub log_responses: bool,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_requests: true,
            log_responses: true,
        }
    }
}

/// What the host does with a finished exchange
#[derive(Debug)]
pub enum Served {
    /// Write this response
    Respond(ProxyResponse),

    /// Terminate the process
    Shutdown,
}

/// Replay host
pub struct HttpInterceptor {
    config: InterceptorConfig,
    modifiers: Arc<ModifierRegistry>,
    engine: Arc<ReplayEngine>,
}

impl HttpInterceptor {
    /// Create a new host
    pub fn new(
        config: InterceptorConfig,
        modifiers: Arc<ModifierRegistry>,
        engine: Arc<ReplayEngine>,
    ) -> Self {
        Self {
            config,
            modifiers,
            engine,
        }
    }

    /// Bind the listen address and serve until the process ends
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        info!("Replay host listening on {}", self.config.listen_addr);

        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let interceptor = Arc::clone(&self);

                    tokio::spawn(async move {
                        debug!("Accepted connection from {}", peer);

                        let io = TokioIo::new(stream);

                        let service = service_fn(move |req| {
                            let interceptor = Arc::clone(&interceptor);
                            async move { interceptor.handle_request(req, peer).await }
                        });

                        if let Err(e) = http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                        {
                            error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Handle one request from `peer`
    async fn handle_request(
        self: Arc<Self>,
        req: Request<Incoming>,
        peer: SocketAddr,
    ) -> Result<Response<Full<Bytes>>> {
        let (parts, body) = req.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| EngineError::Io(io::Error::other(e)))?
            .to_bytes();
        let req = Request::from_parts(parts, body);

        if self.config.log_requests {
            self.log_request(req.method(), req.uri(), req.headers());
        }

        let interceptor = Arc::clone(&self);
        let served = tokio::task::spawn_blocking(move || interceptor.exchange(req, peer))
            .await
            .map_err(|e| EngineError::Io(io::Error::other(e)))?;

        match served {
            Served::Respond(resp) => {
                if self.config.log_responses {
                    self.log_response(&resp);
                }
                let (parts, body) = resp.into_parts();
                Ok(Response::from_parts(parts, Full::new(body)))
            }
            Served::Shutdown => {
                info!("Exiting on client request");
                std::process::exit(0);
            }
        }
    }

    /// Run one exchange through the modifiers and the replay engine
    pub fn exchange(&self, mut req: ProxyRequest, peer: SocketAddr) -> Served {
        let session = CapturedSession::new();
        req.extensions_mut().insert(ClientAddr(peer));
        req.extensions_mut()
            .insert(SessionHandle(Arc::new(session.clone())));

        if let Err(e) = self.modifiers.modify_request(&mut req) {
            error!("Request modifier failed for {}: {}", req.uri(), e);
            return Served::Respond(placeholder_response(StatusCode::BAD_GATEWAY, &req));
        }

        if let Some(resp) = session.take_response() {
            debug!("Serving short-circuit response for {}", req.uri());
            return Served::Respond(resp);
        }

        let mut resp = match self.engine.round_trip(&req) {
            ReplayOutcome::Forward(resp) => resp,
            ReplayOutcome::Handled => placeholder_response(StatusCode::OK, &req),
            ReplayOutcome::Shutdown => return Served::Shutdown,
            ReplayOutcome::Degraded { placeholder, error } => {
                warn!("Serving {} for {}: {}", placeholder.status(), req.uri(), error);
                placeholder
            }
        };

        if let Err(e) = self.modifiers.modify_response(&mut resp) {
            error!("Response modifier failed for {}: {}", req.uri(), e);
            return Served::Respond(placeholder_response(StatusCode::BAD_GATEWAY, &req));
        }

        Served::Respond(resp)
    }

    /// Log HTTP request
    fn log_request(&self, method: &Method, uri: &hyper::Uri, headers: &hyper::HeaderMap) {
        debug!("Request: {} {}", method, uri);
        for (name, value) in headers {
            if let Ok(val_str) = value.to_str() {
                debug!("  {}: {}", name, val_str);
            }
        }
    }

    /// Log HTTP response
    fn log_response(&self, response: &ProxyResponse) {
        debug!("Response: {}", response.status());
        for (name, value) in response.headers() {
            if let Ok(val_str) = value.to_str() {
                debug!("  {}: {}", name, val_str);
            }
        }
    }
}
