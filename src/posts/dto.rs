use bytes::Bytes;
use serde::Deserialize;

/// A file pulled from the `media` multipart field.
pub struct MediaUpload {
    pub body: Bytes,
    pub content_type: String,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}
fn default_limit() -> i64 { 20 }

impl Pagination {
    pub const MAX_LIMIT: i64 = 100;

    /// Clamps to `1..=MAX_LIMIT` and a non-negative offset.
    pub fn clamped(&self) -> (i64, i64) {
        (self.limit.clamp(1, Self::MAX_LIMIT), self.offset.max(0))
    }
}
