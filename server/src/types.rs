//! Post types shared by the store, the HTTP handlers, and the hub.
//!
//! [`PostResponse`] is also the exact payload broadcast to WebSocket clients
//! when a post is created: a bare JSON object with no envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Unique post identifier.
    pub id: String,

    /// Body text of the post.
    pub post_content: String,

    /// Principal id of the author.
    pub user_id: String,

    /// When the post was created.
    pub created_at: DateTime<Utc>,
}

/// Request body for creating or updating a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertPostRequest {
    pub post_content: String,
}

/// Public view of a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostResponse {
    pub id: String,
    pub post_content: String,
}

impl From<&Post> for PostResponse {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id.clone(),
            post_content: post.post_content.clone(),
        }
    }
}

/// Plain acknowledgement body, e.g. `{"message":"Post updated"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Body of `GET /`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeResponse {
    pub message: String,
    pub status: bool,
}
