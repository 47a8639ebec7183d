//! WebSocket subscription endpoint.
//!
//! `GET /ws/{kind}/{id}` upgrades the connection and hands the socket to
//! the owning instance. No snapshot is sent on connect; clients read
//! current state over REST and then apply events.

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};

use crate::domain::EntityKind;
use crate::error::ApiError;
use crate::fanout::{reject_socket, CLOSE_INVALID_ROUTE};
use crate::AppState;

/// Streaming routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/ws/{kind}/{id}", get(subscribe))
}

/// Upgrade handler; an unknown kind is rejected before the upgrade.
async fn subscribe(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let Some(kind) = EntityKind::parse(&kind) else {
        return Err(ApiError::ForbiddenKind(format!(
            "cannot subscribe to kind: {kind}"
        )));
    };

    Ok(ws.on_upgrade(move |socket| async move {
        // An unknown ID closes after the upgrade so the client sees a
        // WebSocket-level close code rather than a failed handshake.
        match kind {
            EntityKind::Task => {
                let instance = state.directory.task(&id);
                match instance.exists().await {
                    Ok(true) => instance.attach_subscriber(socket).await,
                    Ok(false) => reject_socket(socket, CLOSE_INVALID_ROUTE).await,
                    Err(e) => {
                        tracing::error!(id = %id, error = %e, "Subscribe existence check failed");
                        reject_socket(socket, CLOSE_INVALID_ROUTE).await;
                    }
                }
            }
            EntityKind::Workflow => {
                let instance = state.directory.workflow(&id);
                match instance.exists().await {
                    Ok(true) => instance.attach_subscriber(socket).await,
                    Ok(false) => reject_socket(socket, CLOSE_INVALID_ROUTE).await,
                    Err(e) => {
                        tracing::error!(id = %id, error = %e, "Subscribe existence check failed");
                        reject_socket(socket, CLOSE_INVALID_ROUTE).await;
                    }
                }
            }
        }
    }))
}
