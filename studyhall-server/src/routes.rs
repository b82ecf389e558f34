//! HTTP handlers.
//!
//! Thin adapters: extract, call [`GroupService`](studyhall_groups::GroupService)
//! or the [`Messenger`](studyhall_collab::Messenger), serialize. All rules
//! live below this layer.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use studyhall_core::{
    ChatMessage, Group, GroupId, GroupMessage, JoinOutcome, JoinRequest, Membership, MessageId,
    NewGroup, RequestId, RequestStatus, Role, UserId,
};

use crate::error::ApiResult;
use crate::extract::Caller;
use crate::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/groups", get(list_groups).post(create_group))
        .route("/groups/mine", get(my_groups))
        .route("/groups/{id}", get(get_group))
        .route("/groups/{id}/join", post(join_group))
        .route("/groups/{id}/leave", post(leave_group))
        .route("/groups/{id}/members", get(list_members))
        .route("/groups/{id}/members/add", post(add_member))
        .route("/groups/{id}/members/remove", post(remove_member))
        .route("/groups/{id}/members/role", post(set_role))
        .route("/groups/{id}/join-requests", get(list_join_requests))
        .route("/groups/{id}/join-requests/{rid}/approve", post(approve_request))
        .route("/groups/{id}/join-requests/{rid}/deny", post(deny_request))
        .route("/groups/{id}/messages", get(message_history).post(post_message))
        .route(
            "/groups/{id}/messages/{mid}",
            get(get_message).delete(delete_message),
        )
        .layer(cors)
        .with_state(state)
}

// ─── Request bodies ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MemberTarget {
    pub user: UserId,
}

#[derive(Debug, Deserialize)]
pub struct RoleChange {
    pub user: UserId,
    pub role: Role,
}

#[derive(Debug, Default, Deserialize)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PostMessage {
    pub body: String,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
}

/// 200 for an existing membership, 201 for anything that changed.
fn join_response(outcome: JoinOutcome) -> Response {
    match outcome {
        JoinOutcome::AlreadyMember(membership) => (
            StatusCode::OK,
            Json(json!({ "status": "already_member", "membership": membership })),
        )
            .into_response(),
        JoinOutcome::Joined(membership) => (
            StatusCode::CREATED,
            Json(json!({ "status": "joined", "membership": membership })),
        )
            .into_response(),
        JoinOutcome::Requested(request) => (
            StatusCode::CREATED,
            Json(json!({ "status": "requested", "request": request })),
        )
            .into_response(),
    }
}

// ─── Groups ───────────────────────────────────────────────────────────

async fn create_group(
    State(state): State<AppState>,
    caller: Caller,
    Json(new): Json<NewGroup>,
) -> ApiResult<(StatusCode, Json<Group>)> {
    let group = state.groups().create_group(&caller, new).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn list_groups(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<Vec<Group>>> {
    Ok(Json(state.groups().list_groups(&caller)?))
}

async fn my_groups(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<Vec<Group>>> {
    Ok(Json(state.groups().my_groups(&caller)?))
}

async fn get_group(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<GroupId>,
) -> ApiResult<Json<Group>> {
    Ok(Json(state.groups().view_group(id, &caller)?))
}

// ─── Membership ───────────────────────────────────────────────────────

async fn join_group(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<GroupId>,
) -> ApiResult<Response> {
    let outcome = state.groups().request_join(id, &caller).await?;
    Ok(join_response(outcome))
}

async fn leave_group(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<GroupId>,
) -> ApiResult<Json<Membership>> {
    Ok(Json(state.messenger().leave(id, &caller).await?))
}

async fn list_members(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<GroupId>,
) -> ApiResult<Json<Vec<Membership>>> {
    Ok(Json(state.groups().members(id, &caller)?))
}

async fn add_member(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<GroupId>,
    Json(target): Json<MemberTarget>,
) -> ApiResult<Response> {
    let outcome = state.groups().add_member(id, target.user, &caller).await?;
    Ok(join_response(outcome))
}

async fn remove_member(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<GroupId>,
    Json(target): Json<MemberTarget>,
) -> ApiResult<Json<Membership>> {
    Ok(Json(
        state
            .messenger()
            .remove_member(id, target.user, &caller)
            .await?,
    ))
}

async fn set_role(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<GroupId>,
    Json(change): Json<RoleChange>,
) -> ApiResult<Json<Membership>> {
    Ok(Json(
        state
            .groups()
            .set_role(id, change.user, change.role, &caller)
            .await?,
    ))
}

// ─── Join requests ────────────────────────────────────────────────────

async fn list_join_requests(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<GroupId>,
    Query(filter): Query<RequestFilter>,
) -> ApiResult<Json<Vec<JoinRequest>>> {
    Ok(Json(state.groups().join_requests(id, &caller, filter.status)?))
}

async fn approve_request(
    State(state): State<AppState>,
    caller: Caller,
    Path((id, rid)): Path<(GroupId, RequestId)>,
) -> ApiResult<Json<serde_json::Value>> {
    let approval = state.groups().approve(id, rid, &caller).await?;
    Ok(Json(json!({
        "request": approval.request,
        "membership": approval.membership,
    })))
}

async fn deny_request(
    State(state): State<AppState>,
    caller: Caller,
    Path((id, rid)): Path<(GroupId, RequestId)>,
) -> ApiResult<Json<JoinRequest>> {
    Ok(Json(state.groups().deny(id, rid, &caller).await?))
}

// ─── Messages ─────────────────────────────────────────────────────────

async fn message_history(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<GroupId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    Ok(Json(state.groups().history(id, &caller, query.limit)?))
}

/// Same persist-then-broadcast path as a chat frame on the room socket.
async fn post_message(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<GroupId>,
    Json(message): Json<PostMessage>,
) -> ApiResult<(StatusCode, Json<ChatMessage>)> {
    let sent = state
        .messenger()
        .send_chat(id, &caller, &message.body, message.reply_to)
        .await?;
    Ok((StatusCode::CREATED, Json(sent)))
}

async fn get_message(
    State(state): State<AppState>,
    caller: Caller,
    Path((id, mid)): Path<(GroupId, MessageId)>,
) -> ApiResult<Json<GroupMessage>> {
    Ok(Json(state.groups().get_message(id, mid, &caller)?))
}

async fn delete_message(
    State(state): State<AppState>,
    caller: Caller,
    Path((id, mid)): Path<(GroupId, MessageId)>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted = state.messenger().delete_message(id, mid, &caller).await?;
    Ok(Json(json!({ "id": mid, "deleted": deleted })))
}
