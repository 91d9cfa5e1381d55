use axum::{
    Json,
    extract::{Query, State},
};

use crate::{
    AppState,
    api::models::chat::{ChatHistoryResponse, ChatReply, ChatRequest, ChatTurnResponse, HistoryQuery},
    auth::current_account::CurrentAccount,
    errors::Result,
};

/// Send a message to the model
#[utoipa::path(
    post,
    path = "/chat",
    tag = "chat",
    summary = "Send a chat message",
    description = "Estimates the worst-case cost, generates a reply and debits the actual cost from the energy balance.",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Reply generated and billed", body = ChatReply),
        (status = 400, description = "Empty or oversized message"),
        (status = 401, description = "No bearer token"),
        (status = 402, description = "Worst-case cost exceeds the balance"),
        (status = 403, description = "Invalid bearer token"),
        (status = 500, description = "Reply generated but could not be saved"),
        (status = 502, description = "Model unavailable"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn send_message(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>> {
    let reply = state.chat_engine().respond(&account, &request.message).await?;
    Ok(Json(reply))
}

/// The caller's conversation ledger
#[utoipa::path(
    get,
    path = "/chat/history",
    tag = "chat",
    summary = "Get chat history",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Persisted turns, oldest first", body = ChatHistoryResponse),
        (status = 401, description = "No bearer token"),
        (status = 403, description = "Invalid bearer token"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_history(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ChatHistoryResponse>> {
    let turns = state.chat_engine().history(&account.id, query.limit()).await?;
    Ok(Json(ChatHistoryResponse {
        turns: turns.into_iter().map(ChatTurnResponse::from).collect(),
    }))
}
