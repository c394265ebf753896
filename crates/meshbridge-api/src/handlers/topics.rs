//! /topics handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{join_failed, parse_topic_id, unknown_topic, ApiState};

#[derive(Serialize, Deserialize)]
pub struct TopicListResponse {
    pub topics: Vec<String>,
}

pub async fn handle_topic_list(State(state): State<ApiState>) -> Json<TopicListResponse> {
    let topics = state
        .bridge
        .registry()
        .list()
        .into_iter()
        .map(|id| id.as_str().to_string())
        .collect();
    Json(TopicListResponse { topics })
}

#[derive(Deserialize)]
pub struct CreateTopicRequest {
    #[serde(rename = "topicName")]
    pub topic_name: String,
}

#[derive(Serialize, Deserialize)]
pub struct CreateTopicResponse {
    pub topic: String,
}

pub async fn handle_topic_create(
    State(state): State<ApiState>,
    Json(req): Json<CreateTopicRequest>,
) -> Result<(StatusCode, Json<CreateTopicResponse>), (StatusCode, String)> {
    let id = parse_topic_id(&req.topic_name)?;
    let topic = state
        .bridge
        .registry()
        .create(&id)
        .await
        .map_err(join_failed)?
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("topic {id} already exists")))?;
    tracing::info!(topic = %topic.id(), "topic created via API");

    Ok((
        StatusCode::CREATED,
        Json(CreateTopicResponse {
            topic: topic.id().as_str().to_string(),
        }),
    ))
}

#[derive(Serialize, Deserialize)]
pub struct TopicInfo {
    pub topic: String,
    /// A socket is bridged to the topic.
    pub connected: bool,
    /// Remote nodes subscribed to the topic, hex node ids.
    pub peers: Vec<String>,
    pub age_secs: u64,
}

pub async fn handle_topic_inspect(
    State(state): State<ApiState>,
    Path(topic_id): Path<String>,
) -> Result<Json<TopicInfo>, (StatusCode, String)> {
    let id = parse_topic_id(&topic_id)?;
    let topic = state
        .bridge
        .registry()
        .get(&id)
        .ok_or_else(|| unknown_topic(&id))?;

    Ok(Json(TopicInfo {
        topic: topic.id().as_str().to_string(),
        connected: topic.active_connection().await.is_some(),
        peers: topic.group().peers().iter().map(|p| p.to_string()).collect(),
        age_secs: topic.created_at().elapsed().as_secs(),
    }))
}

#[derive(Serialize, Deserialize)]
pub struct TopicPeersResponse {
    pub peers: Vec<String>,
}

pub async fn handle_topic_peers(
    State(state): State<ApiState>,
    Path(topic_id): Path<String>,
) -> Result<Json<TopicPeersResponse>, (StatusCode, String)> {
    let id = parse_topic_id(&topic_id)?;
    let topic = state
        .bridge
        .registry()
        .get(&id)
        .ok_or_else(|| unknown_topic(&id))?;

    Ok(Json(TopicPeersResponse {
        peers: topic.group().peers().iter().map(|p| p.to_string()).collect(),
    }))
}
