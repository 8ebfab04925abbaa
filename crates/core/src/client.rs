/// Request-level HTTP client
///
/// Speaks HTTP/1.1 over `MetaConnector` streams, so every request takes
/// the route its URL selects. Idle connections are kept for reuse until
/// they expire or the pool is full.

use crate::transport::{parse_target, ConnectError, MetaConnector, Target};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::{self, SendRequest};
use hyper::header::{HeaderValue, CONTENT_TYPE, HOST};
use hyper::{Method, Request, Response, Uri};
use hyper_util::rt::TokioIo;
use metadialer_common::config::client::{IDLE_TIMEOUT_SECS, MAX_IDLE_CONNS, TIMEOUT_SECS};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

type Sender = SendRequest<Full<Bytes>>;

struct IdleConn {
    sender: Sender,
    since: Instant,
}

/// HTTP client whose connections come from a `MetaConnector`
pub struct MetaHttpClient {
    connector: MetaConnector,
    timeout: Duration,
    idle_timeout: Duration,
    max_idle: usize,
    /// Idle connections by `scheme://host:port`
    idle: Mutex<HashMap<String, Vec<IdleConn>>>,
}

impl MetaHttpClient {
    pub fn new(connector: MetaConnector) -> Self {
        Self {
            connector,
            timeout: Duration::from_secs(TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(IDLE_TIMEOUT_SECS),
            max_idle: MAX_IDLE_CONNS,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// Limit on a whole request, from dialing to the last body byte
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connector(&self) -> &MetaConnector {
        &self.connector
    }

    pub async fn get(&self, url: &str) -> Result<Response<Bytes>, ClientError> {
        self.send(Method::GET, url, None, Bytes::new()).await
    }

    pub async fn head(&self, url: &str) -> Result<Response<Bytes>, ClientError> {
        self.send(Method::HEAD, url, None, Bytes::new()).await
    }

    pub async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: impl Into<Bytes>,
    ) -> Result<Response<Bytes>, ClientError> {
        self.send(Method::POST, url, Some(content_type), body.into())
            .await
    }

    /// POST `form` as `application/x-www-form-urlencoded`
    pub async fn post_form<T>(&self, url: &str, form: &T) -> Result<Response<Bytes>, ClientError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_urlencoded::to_string(form)
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        self.post(url, FORM_CONTENT_TYPE, body).await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> Result<Response<Bytes>, ClientError> {
        let mut builder = Request::builder().method(method).uri(url);
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        let request = builder
            .body(body)
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;

        self.request(request).await
    }

    /// Send a prepared request. The URI must be absolute; `Host` is
    /// filled in from it unless the request already carries one.
    pub async fn request(&self, request: Request<Bytes>) -> Result<Response<Bytes>, ClientError> {
        if request.uri().scheme().is_none() {
            return Err(ClientError::InvalidRequest(format!(
                "relative URL {}",
                request.uri()
            )));
        }
        let target = parse_target(&request.uri().to_string())?;

        match tokio::time::timeout(self.timeout, self.execute(&target, request)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(self.timeout)),
        }
    }

    /// Drop every pooled connection
    pub fn close_idle_connections(&self) {
        let mut idle = self.lock_idle();
        let count: usize = idle.values().map(Vec::len).sum();
        idle.clear();
        debug!("HTTP client: closed {} idle connections", count);
    }

    async fn execute(
        &self,
        target: &Target,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, ClientError> {
        let (mut parts, body) = request.into_parts();

        parts.uri = Uri::try_from(target.path.as_str())
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        if !parts.headers.contains_key(HOST) {
            let host = HeaderValue::from_str(&target.host_header())
                .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
            parts.headers.insert(HOST, host);
        }

        let key = format!("{}://{}", target.scheme, target.authority());
        let mut sender = match self.checkout(&key).await {
            Some(sender) => sender,
            None => self.connect(target).await?,
        };

        debug!("HTTP client: {} {}{}", parts.method, key, target.path);
        let response = sender
            .send_request(Request::from_parts(parts, Full::new(body)))
            .await?;

        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();

        self.checkin(key, sender);
        Ok(Response::from_parts(parts, body))
    }

    async fn connect(&self, target: &Target) -> Result<Sender, ClientError> {
        let stream = self.connector.connect_target(target).await?;
        let (sender, connection) = http1::handshake(TokioIo::new(stream)).await?;

        let authority = target.authority();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("HTTP client: connection to {} ended: {}", authority, e);
            }
        });

        Ok(sender)
    }

    /// Take a live idle connection for `key`, discarding expired ones
    async fn checkout(&self, key: &str) -> Option<Sender> {
        loop {
            let conn = {
                let mut idle = self.lock_idle();
                let conns = idle.get_mut(key)?;
                let conn = conns.pop();
                if conns.is_empty() {
                    idle.remove(key);
                }
                conn?
            };

            if conn.since.elapsed() > self.idle_timeout {
                continue;
            }

            let mut sender = conn.sender;
            if sender.ready().await.is_ok() {
                debug!("HTTP client: reusing connection to {}", key);
                return Some(sender);
            }
        }
    }

    fn checkin(&self, key: String, sender: Sender) {
        if sender.is_closed() {
            return;
        }

        let mut idle = self.lock_idle();
        let idle_timeout = self.idle_timeout;
        idle.retain(|_, conns| {
            conns.retain(|c| c.since.elapsed() <= idle_timeout && !c.sender.is_closed());
            !conns.is_empty()
        });

        let count: usize = idle.values().map(Vec::len).sum();
        if count >= self.max_idle {
            debug!("HTTP client: idle pool full, closing connection to {}", key);
            return;
        }

        idle.entry(key).or_default().push(IdleConn {
            sender,
            since: Instant::now(),
        });
    }

    fn lock_idle(&self) -> MutexGuard<'_, HashMap<String, Vec<IdleConn>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// HTTP client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("HTTP exchange failed: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}
