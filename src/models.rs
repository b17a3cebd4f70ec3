use serde::{Deserialize, Serialize};

use crate::record::FieldValue;
use crate::session::{Notice, StepView};
use crate::validation::ValidationError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartSessionRequest {
    /// Resume this session when a draft exists for it.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Edit a published listing instead of creating one.
    #[serde(default)]
    pub record_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetFieldRequest {
    pub path: String,
    #[serde(default)]
    pub value: FieldValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JumpRequest {
    pub index: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadRequest {
    pub file_name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub data_base64: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryRequest {
    /// Fresh payload; required for attachments restored without their bytes.
    #[serde(default)]
    pub upload: Option<UploadRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeaturedRequest {
    #[serde(default)]
    pub index: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub view: StepView,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Serialize)]
pub struct FieldResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ValidationError>,
    pub view: StepView,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub asset_id: String,
    pub view: StepView,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub record_id: String,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Serialize)]
pub struct OptionsResponse {
    pub options: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
