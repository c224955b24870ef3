use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::Html,
    routing::{get, post},
    Router,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::events::{Event, EventHandler};

pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

type HmacSha256 = Hmac<Sha256>;

pub struct WebhookState {
    secret: String,
    handler: EventHandler,
}

impl WebhookState {
    pub fn new(secret: &str, handler: EventHandler) -> anyhow::Result<Self> {
        if secret.is_empty() {
            return Err(anyhow::anyhow!("webhook secret is required"));
        }

        Ok(Self {
            secret: secret.to_string(),
            handler,
        })
    }
}

/// Signs `body` the way GitHub does, for the `X-Hub-Signature-256` header.
pub fn sign(secret: &str, body: &[u8]) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(body);

    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

fn verify(secret: &str, signature: &str, body: &[u8]) -> anyhow::Result<()> {
    let digest = match signature.strip_prefix(SIGNATURE_PREFIX) {
        Some(digest) => hex::decode(digest)?,
        None => return Err(anyhow::anyhow!("unsupported signature {:?}", signature)),
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(body);
    mac.verify_slice(&digest)
        .map_err(|_| anyhow::anyhow!("signature mismatch"))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[tracing::instrument(name = "http::healthz")]
async fn healthz() -> Html<&'static str> {
    Html("ok")
}

#[tracing::instrument(name = "http::events", skip(state, headers, body))]
async fn events(
    state: Extension<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, (StatusCode, String)> {
    let kind = match header(&headers, EVENT_HEADER) {
        Some(kind) => kind,
        None => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("missing {} header", EVENT_HEADER),
            ))
        }
    };

    let signature = header(&headers, SIGNATURE_HEADER).unwrap_or_default();
    if let Err(err) = verify(&state.secret, signature, &body) {
        tracing::warn!(kind, "rejected delivery: {}", err);
        return Err((StatusCode::UNAUTHORIZED, err.to_string()));
    }

    let event = Event::parse(kind, &body)
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("invalid {} event: {}", kind, err)))?;

    state.handler.handle(event).await.map_err(|err| {
        tracing::error!(kind, "unable to handle event: {}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    })?;

    Ok(StatusCode::ACCEPTED)
}

pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/events", post(events))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

/// Serves the webhook until cancelled.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<WebhookState>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    tracing::info!("webhook listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(webhook_router(state).into_make_service())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}
