//! HTTP surface of the peer mesh (axum).
//!
//! `/register` and `/heartbeat` are open (cluster bootstrap); every other
//! POST requires a bearer token signed with the cluster secret. Leader-only
//! endpoints are forwarded to the current leader by the node handlers.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::error::DuelError;
use crate::node::Node;
use crate::rpc::{
    AnnounceLeaderRequest, BuyPackRequest, GameEventRequest, HeartbeatRequest,
    NotifyPlayerRequest, OpponentRequest, RegisterRequest, ReplicateRequest, VoteRequest,
};

/// Build the peer RPC router.
pub fn router(node: Arc<Node>) -> Router {
    let public = Router::new()
        .route("/register", post(register))
        .route("/heartbeat", post(heartbeat))
        .route("/servers", get(servers))
        .route("/inventory/status", get(inventory_status));

    let protected = Router::new()
        .route("/election/vote", post(election_vote))
        .route("/election/leader", post(election_leader))
        .route("/inventory/buy_pack", post(inventory_buy_pack))
        .route("/matchmaking/request_opponent", post(request_opponent))
        .route("/game/event", post(game_event))
        .route("/game/replicate", post(game_replicate))
        .route("/game/notify_player", post(notify_player))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&node),
            require_bearer,
        ));

    public.merge(protected).with_state(node)
}

/// Bearer-token middleware for peer calls.
async fn require_bearer(
    State(node): State<Arc<Node>>,
    request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let Some(token) = token else {
        return ApiError(DuelError::Unauthorized {
            reason: "missing bearer token".to_string(),
        })
        .into_response();
    };
    match node.auth.verify_token(token) {
        Ok(caller) => {
            tracing::trace!(%caller, "peer call authenticated");
            next.run(request).await
        }
        Err(e) => ApiError(e).into_response(),
    }
}

struct ApiError(DuelError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DuelError::Unauthorized { .. } | DuelError::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            DuelError::MatchNotFound { .. } | DuelError::PlayerNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            DuelError::LeaderUnknown { .. } | DuelError::NotLeader { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DuelError::StaleEvent { .. } => StatusCode::CONFLICT,
            DuelError::MalformedMessage { .. } | DuelError::InvalidConfig { .. } => {
                StatusCode::BAD_REQUEST
            }
            DuelError::PeerUnavailable { .. } | DuelError::BrokerUnavailable { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

async fn register(
    State(node): State<Arc<Node>>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    Json(node.handle_register(req))
}

async fn heartbeat(
    State(node): State<Arc<Node>>,
    Json(req): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    node.handle_heartbeat(req);
    StatusCode::OK
}

#[derive(Serialize)]
struct ServerEntry {
    addr: String,
    alive: bool,
}

async fn servers(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let entries: Vec<ServerEntry> = node
        .registry
        .snapshot()
        .into_iter()
        .map(|(addr, alive)| ServerEntry {
            addr: addr.to_string(),
            alive,
        })
        .collect();
    Json(entries)
}

async fn election_vote(
    State(node): State<Arc<Node>>,
    Json(req): Json<VoteRequest>,
) -> impl IntoResponse {
    Json(node.handle_vote(req))
}

async fn election_leader(
    State(node): State<Arc<Node>>,
    Json(req): Json<AnnounceLeaderRequest>,
) -> impl IntoResponse {
    node.handle_announce(req);
    StatusCode::OK
}

async fn inventory_buy_pack(
    State(node): State<Arc<Node>>,
    Json(req): Json<BuyPackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = node.handle_buy_pack_rpc(req).await.map_err(ApiError)?;
    Ok(Json(resp))
}

async fn inventory_status(
    State(node): State<Arc<Node>>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = node.handle_inventory_status().await.map_err(ApiError)?;
    Ok(Json(resp))
}

async fn request_opponent(
    State(node): State<Arc<Node>>,
    Json(req): Json<OpponentRequest>,
) -> impl IntoResponse {
    Json(node.handle_opponent_request(req).await)
}

async fn game_event(
    State(node): State<Arc<Node>>,
    Json(req): Json<GameEventRequest>,
) -> Result<Response, ApiError> {
    let resp = node.handle_game_event(req).await.map_err(ApiError)?;
    let status = if resp.accepted {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    Ok((status, Json(resp)).into_response())
}

async fn game_replicate(
    State(node): State<Arc<Node>>,
    Json(req): Json<ReplicateRequest>,
) -> impl IntoResponse {
    Json(node.handle_replicate(req))
}

async fn notify_player(
    State(node): State<Arc<Node>>,
    Json(req): Json<NotifyPlayerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    node.handle_notify_player(req).await.map_err(ApiError)?;
    Ok(StatusCode::OK)
}
