use serde::Deserialize;

/// Graph API error envelope: `{"error": {"message": ..., "code": ...}}`.
#[derive(Debug, Deserialize)]
pub struct GraphErrorEnvelope {
    pub error: GraphError,
}

#[derive(Debug, Deserialize)]
pub struct GraphError {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub error_subcode: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct PageInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VideoUploadResponse {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReelStartResponse {
    pub video_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SuccessResponse {
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct VideoStatusResponse {
    #[serde(default)]
    pub status: Option<VideoStatus>,
    #[serde(default)]
    pub permalink_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VideoStatus {
    #[serde(default)]
    pub video_status: Option<String>,
}

impl VideoStatusResponse {
    pub fn state(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.video_status.as_deref())
    }
}
