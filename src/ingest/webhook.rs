//! Webhook ingestor: an HTTPS `POST /` endpoint accepting either a single
//! audit event or a batched `EventList` envelope, with mandatory server
//! TLS, optional mTLS, per-IP rate limiting, a request body cap, and
//! event-id deduplication. Stateless — no checkpoint.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use lru::LruCache;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::ingest::{Ingestor, EVENT_CHANNEL_CAPACITY};
use crate::model::checkpoint::Checkpoint;
use crate::model::event::{AuditEvent, Provenance, RawAuditEvent, SourceType};

/// Server-side TLS identity, already issued — this crate never requests or
/// rotates certificates (see the ingest module docs).
pub struct TlsIdentity {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    /// PEM bundle of CAs to verify client certificates against. Presence
    /// enables mTLS; absence leaves the endpoint server-TLS-only.
    pub client_ca_pem: Option<Vec<u8>>,
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_acquire(&mut self, rate_per_second: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate_per_second).min(rate_per_second);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct SharedState {
    tx: mpsc::Sender<AuditEvent>,
    rate_limit_per_second: u32,
    buckets: Mutex<HashMap<IpAddr, TokenBucket>>,
    seen_ids: Mutex<LruCache<String, ()>>,
}

fn rate_limited(state: &SharedState, addr: IpAddr) -> bool {
    let mut buckets = state.buckets.lock().unwrap();
    let bucket = buckets
        .entry(addr)
        .or_insert_with(|| TokenBucket::new(state.rate_limit_per_second as f64));
    !bucket.try_acquire(state.rate_limit_per_second as f64)
}

fn is_duplicate(state: &SharedState, id: &str) -> bool {
    let mut seen = state.seen_ids.lock().unwrap();
    if seen.contains(id) {
        true
    } else {
        seen.put(id.to_string(), ());
        false
    }
}

/// Either a single raw event or a batched envelope; `EventList` is tried
/// first since its shape (`{"items": [...]}`) is unambiguous against a
/// single audit event.
#[derive(Deserialize)]
#[serde(untagged)]
enum WebhookPayload {
    Batch { items: Vec<RawAuditEvent> },
    Single(RawAuditEvent),
}

async fn handle(
    State(state): State<Arc<SharedState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: axum::body::Bytes,
) -> StatusCode {
    if rate_limited(&state, addr.ip()) {
        return StatusCode::TOO_MANY_REQUESTS;
    }

    let parsed: Result<WebhookPayload, _> = serde_json::from_slice(&body);
    let raws = match parsed {
        Ok(WebhookPayload::Batch { items }) => items,
        Ok(WebhookPayload::Single(event)) => vec![event],
        Err(e) => {
            warn!(error = %e, "rejecting malformed webhook payload");
            return StatusCode::BAD_REQUEST;
        }
    };

    for raw in raws {
        if is_duplicate(&state, &raw.audit_id) {
            continue;
        }
        let event = AuditEvent::from_raw(
            raw,
            Provenance {
                source_type: SourceType::Webhook,
                partition: None,
            },
        );
        if state.tx.send(event).await.is_err() {
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    }

    StatusCode::ACCEPTED
}

/// Build the `/` route with its body-size cap, separated out from
/// `start()` so tests can drive it directly with `tower::ServiceExt::oneshot`
/// instead of binding a real TLS listener.
fn build_router(state: Arc<SharedState>, max_request_body_bytes: u64) -> Router {
    Router::new()
        .route("/", post(handle))
        .layer(axum::extract::DefaultBodyLimit::max(
            max_request_body_bytes as usize,
        ))
        .with_state(state)
}

pub struct WebhookIngestor {
    addr: SocketAddr,
    identity: TlsIdentity,
    rate_limit_per_second: u32,
    max_request_body_bytes: u64,
    dedup_capacity: usize,
}

impl WebhookIngestor {
    pub fn new(
        addr: SocketAddr,
        identity: TlsIdentity,
        rate_limit_per_second: u32,
        max_request_body_bytes: u64,
        dedup_capacity: usize,
    ) -> Self {
        Self {
            addr,
            identity,
            rate_limit_per_second,
            max_request_body_bytes,
            dedup_capacity,
        }
    }

    async fn tls_config(&self) -> Result<RustlsConfig, IngestError> {
        // Client-cert verification is configured on the underlying
        // `rustls::ServerConfig` when `client_ca_pem` is present;
        // `axum_server`'s `RustlsConfig::from_pem` covers the common
        // server-TLS-only path used in tests and the default deployment.
        // mTLS deployments build the `rustls::ServerConfig` themselves and
        // hand it to `RustlsConfig::from_config`.
        if let Some(ca_pem) = &self.identity.client_ca_pem {
            build_mtls_config(&self.identity.cert_pem, &self.identity.key_pem, ca_pem)
        } else {
            RustlsConfig::from_pem(self.identity.cert_pem.clone(), self.identity.key_pem.clone())
                .await
                .map_err(|e| IngestError::Tls(e.to_string()))
        }
    }
}

fn build_mtls_config(cert_pem: &[u8], key_pem: &[u8], ca_pem: &[u8]) -> Result<RustlsConfig, IngestError> {
    use rustls::server::WebPkiClientVerifier;
    use rustls::RootCertStore;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| IngestError::Tls(e.to_string()))?;
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| IngestError::Tls(e.to_string()))?
        .ok_or_else(|| IngestError::Tls("no private key found in tls identity".to_string()))?;

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut &ca_pem[..]) {
        let cert = cert.map_err(|e| IngestError::Tls(e.to_string()))?;
        roots
            .add(cert)
            .map_err(|e| IngestError::Tls(e.to_string()))?;
    }

    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| IngestError::Tls(e.to_string()))?;

    let config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| IngestError::Tls(e.to_string()))?;

    Ok(RustlsConfig::from_config(Arc::new(config)))
}

#[async_trait::async_trait]
impl Ingestor for WebhookIngestor {
    async fn start(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<AuditEvent>, IngestError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let state = Arc::new(SharedState {
            tx,
            rate_limit_per_second: self.rate_limit_per_second,
            buckets: Mutex::new(HashMap::new()),
            seen_ids: Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(self.dedup_capacity.max(1)).unwrap(),
            )),
        });

        let app = build_router(state, self.max_request_body_bytes);

        let tls_config = self.tls_config().await?;
        let addr = self.addr;

        tokio::spawn(async move {
            info!(%addr, "webhook ingestor listening");
            let server = axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>());

            tokio::select! {
                result = server => {
                    if let Err(e) = result {
                        warn!(error = %e, "webhook server exited");
                    }
                }
                _ = cancel.cancelled() => {
                    info!(%addr, "webhook ingestor shutting down");
                }
            }
        });

        Ok(rx)
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint::Webhook
    }
}
