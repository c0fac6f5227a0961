//! Message submission, listing and dispatcher control

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::StatusCode,
    Json,
};
use tracing::{debug, info};

use crate::error::{ApiError, Result};
use crate::model::{
    CreateMessageRequest, CreateMessageResponse, DispatcherStatusResponse, ErrorResponse,
    ListMessagesQuery, MessageItem, MessageListResponse, SuccessResponse,
};
use crate::validation;
use crate::AppState;

/// Queue a new message for delivery
#[utoipa::path(
    post,
    path = "/api/v1/messages",
    tag = "messages",
    request_body = CreateMessageRequest,
    responses(
        (status = 201, description = "Message created", body = CreateMessageResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn create_message(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateMessageResponse>)> {
    let Json(request) = payload.map_err(|e| {
        debug!(error = %e, "Rejected message payload");
        ApiError::bad_request("Invalid request format")
    })?;

    let new = validation::validate_new_message(&request)?;
    let message = state.store.insert(&new).await?;

    info!(message_id = %message.id, "Message created");

    Ok((
        StatusCode::CREATED,
        Json(CreateMessageResponse {
            message: "Message created successfully".to_string(),
            message_id: message.id,
        }),
    ))
}

/// List messages, sent ones by default, newest delivery first
#[utoipa::path(
    get,
    path = "/api/v1/messages",
    tag = "messages",
    params(ListMessagesQuery),
    responses(
        (status = 200, description = "Page of messages", body = MessageListResponse),
        (status = 400, description = "Invalid filter", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn list_messages(
    State(state): State<AppState>,
    query: std::result::Result<Query<ListMessagesQuery>, QueryRejection>,
) -> Result<Json<MessageListResponse>> {
    let Query(query) = query.map_err(|_| ApiError::bad_request("Invalid request format"))?;
    let filter = validation::parse_filter(&query)?;

    let page = state.store.list(&filter).await?;
    let total_pages = page.total_pages(filter.page_size);

    Ok(Json(MessageListResponse {
        messages: page.items.into_iter().map(MessageItem::from).collect(),
        total: page.total,
        page: filter.page,
        page_size: filter.page_size,
        total_pages,
    }))
}

/// Start the background dispatcher
#[utoipa::path(
    post,
    path = "/api/v1/messages/start",
    tag = "dispatcher",
    responses(
        (status = 200, description = "Dispatcher running", body = SuccessResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn start_sending(State(state): State<AppState>) -> Result<Json<SuccessResponse>> {
    state.dispatcher.start().await?;
    Ok(Json(SuccessResponse::new("Message sending started")))
}

/// Stop the background dispatcher, waiting for the message in flight
#[utoipa::path(
    post,
    path = "/api/v1/messages/stop",
    tag = "dispatcher",
    responses(
        (status = 200, description = "Dispatcher stopped", body = SuccessResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn stop_sending(State(state): State<AppState>) -> Result<Json<SuccessResponse>> {
    state.dispatcher.stop().await?;
    Ok(Json(SuccessResponse::new("Message sending stopped")))
}

#[utoipa::path(
    get,
    path = "/api/v1/messages/dispatcher",
    tag = "dispatcher",
    responses(
        (status = 200, description = "Dispatcher state", body = DispatcherStatusResponse)
    )
)]
pub async fn dispatcher_status(State(state): State<AppState>) -> Json<DispatcherStatusResponse> {
    Json(DispatcherStatusResponse {
        running: state.dispatcher.is_running(),
    })
}
