use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub username: String,
    pub content: String,
    #[serde(default)]
    pub likes_count: u64,
    #[serde(default)]
    pub comments_count: u64,
    /// Per-viewer like state. The backend never reports it, so callers
    /// should not rely on it being present.
    #[serde(default, rename = "isLiked", skip_serializing_if = "Option::is_none")]
    pub liked: Option<bool>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub post_id: Option<String>,
    pub username: String,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Body of a successful like, when the server sends one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeReceipt {
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub liked_at: Option<String>,
}

/// Create and update bodies for both posts and comments.
#[derive(Debug, Serialize)]
pub(crate) struct ContentRequest<'a> {
    pub username: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct LikeRequest<'a> {
    pub username: &'a str,
}

/// Error payload shapes seen from the backends: `{"message": ..}` or the
/// FastAPI-style `{"detail": ..}`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn into_message(self) -> Option<String> {
        if let Some(m) = self.message.filter(|m| !m.trim().is_empty()) {
            return Some(m);
        }
        match self.detail {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
            _ => None,
        }
    }
}
