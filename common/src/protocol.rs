use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `/start` 成功响应
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartResponse {
    pub message: String,
    pub hls_url: String,
}

impl StartResponse {
    pub fn new(hls_url: String) -> Self {
        Self {
            message: "Stream started".to_string(),
            hls_url,
        }
    }
}

/// `/stop` 成功响应
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StopResponse {
    pub message: String,
}

impl Default for StopResponse {
    fn default() -> Self {
        Self {
            message: "Stream stopped and files deleted".to_string(),
        }
    }
}

/// `/status` 响应：流ID -> 播放列表地址
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub active_streams: BTreeMap<String, String>,
}

/// 错误响应
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
    pub reason: String,
}

impl From<&crate::GatewayError> for ErrorResponse {
    fn from(err: &crate::GatewayError) -> Self {
        Self {
            error: err.to_string(),
            reason: err.reason().to_string(),
        }
    }
}
