//! HTTP response types

use serde::{Deserialize, Serialize};

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Detector status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub clients: usize,
    pub hits_broadcast: u64,
    pub deliveries: u64,
    pub dropped_deliveries: u64,
    pub connections_accepted: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_omits_data() {
        let response: ApiResponse<StatusResponse> = ApiResponse::error("down".to_string());
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"success":false,"error":"down"}"#);
    }
}
