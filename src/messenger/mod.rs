//! HTTP relay: accepts a message over HTTP and publishes it to the bus.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::broker::{publish_json, LinkStatus, Publisher};
use crate::telemetry::{now_unix, MessageRecord, TOPIC_MESSAGES};

/// Shared state of the messenger routes
#[derive(Clone)]
pub struct MessengerState {
    pub messenger_id: String,
    pub publisher: Arc<dyn Publisher>,
    pub link: LinkStatus,
}

/// Body of `POST /`
#[derive(Debug, Deserialize)]
pub struct MessageInput {
    /// Message to be sent
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessengerHealth {
    pub messenger_id: String,
    pub broker_connected: bool,
    pub status: String,
}

pub fn router(state: MessengerState) -> Router {
    Router::new()
        .route("/", post(publish_message))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Relays the message. Publish failures are logged and the request still
/// succeeds: the relay is fire-and-forget.
async fn publish_message(
    State(state): State<MessengerState>,
    Json(input): Json<MessageInput>,
) -> StatusCode {
    let record = MessageRecord {
        timestamp: now_unix(),
        messenger_id: state.messenger_id.clone(),
        message: input.message,
    };

    match publish_json(state.publisher.as_ref(), TOPIC_MESSAGES, &record) {
        Ok(()) => info!("Relayed message ({} chars)", record.message.chars().count()),
        Err(e) => error!("Failed to publish message: {}", e),
    }

    StatusCode::OK
}

async fn health(State(state): State<MessengerState>) -> Json<MessengerHealth> {
    Json(MessengerHealth {
        messenger_id: state.messenger_id.clone(),
        broker_connected: state.link.is_connected(),
        status: "ok".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerEvent, MemoryBroker};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state(broker: &MemoryBroker) -> MessengerState {
        MessengerState {
            messenger_id: "messenger-test".to_string(),
            publisher: Arc::new(broker.publisher()),
            link: LinkStatus::new(),
        }
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_post_publishes_message() {
        let broker = MemoryBroker::default();
        let mut rx = broker.subscribe(&[TOPIC_MESSAGES]);
        let app = router(state(&broker));

        let resp = app.oneshot(post_json(r#"{"message": "hola"}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());

        assert_eq!(rx.recv().await, Some(BrokerEvent::Connected));
        let Some(BrokerEvent::Message(delivery)) = rx.recv().await else {
            panic!("expected a message delivery");
        };
        let record: MessageRecord = serde_json::from_slice(&delivery.payload).unwrap();
        assert_eq!(record.messenger_id, "messenger-test");
        assert_eq!(record.message, "hola");
        assert!(record.timestamp > 0.0);
    }

    #[tokio::test]
    async fn test_missing_message_is_rejected() {
        let broker = MemoryBroker::default();
        let app = router(state(&broker));

        let resp = app.oneshot(post_json(r#"{"text": "hola"}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_malformed_json_is_rejected() {
        let broker = MemoryBroker::default();
        let app = router(state(&broker));

        let resp = app.oneshot(post_json("{not json")).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn test_health_reports_link() {
        let broker = MemoryBroker::default();
        let state = state(&broker);
        state.link.set(true);
        let app = router(state);

        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let health: MessengerHealth = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.messenger_id, "messenger-test");
        assert!(health.broker_connected);
    }
}
