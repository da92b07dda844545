use reqwest::StatusCode;
use serde::Deserialize;

use super::{UploadError, UploadReceipt};

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<ApiResult>,
}

#[derive(Debug, Deserialize)]
struct ApiResult {
    #[serde(default)]
    message_id: Option<i64>,
    #[serde(default, alias = "video", alias = "document")]
    file: Option<ApiFile>,
}

#[derive(Debug, Deserialize)]
struct ApiFile {
    #[serde(default)]
    file_id: Option<String>,
}

/// Maps an HTTP status and body to a receipt or a classified error.
///
/// Status decides first; structured `ok: false` bodies are classified by
/// their description.
pub fn classify_response(
    status: StatusCode,
    body: &str,
) -> Result<UploadReceipt, UploadError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(UploadError::retryable(
            "http_429",
            describe(body).unwrap_or_else(|| "too many requests".into()),
        ));
    }
    if status.is_server_error() {
        return Err(UploadError::retryable(
            format!("http_{}", status.as_u16()),
            describe(body).unwrap_or_else(|| status.to_string()),
        ));
    }
    if status == StatusCode::FORBIDDEN {
        return Err(UploadError::terminal(
            "forbidden",
            describe(body).unwrap_or_else(|| status.to_string()),
        ));
    }
    if status != StatusCode::OK {
        return Err(match describe(body) {
            Some(description) => classify_description(&description),
            None => UploadError::terminal(
                format!("http_{}", status.as_u16()),
                status.to_string(),
            ),
        });
    }

    let parsed: ApiResponse = serde_json::from_str(body).map_err(|e| {
        UploadError::terminal("bad_response", format!("unparseable body: {e}"))
    })?;

    if !parsed.ok {
        let description = parsed.description.unwrap_or_default();
        return Err(classify_description(&description));
    }

    let result = parsed.result.ok_or_else(|| {
        UploadError::terminal("missing_response_fields", "response has no result")
    })?;
    let message_id = result.message_id;
    let file_ref = result
        .file
        .and_then(|file| file.file_id)
        .filter(|id| !id.is_empty());

    match (message_id, file_ref) {
        (Some(message_id), Some(file_ref)) => Ok(UploadReceipt {
            message_id,
            file_ref,
        }),
        (message_id, file_ref) => Err(UploadError::terminal(
            "missing_response_fields",
            format!(
                "message_id present: {}, file_id present: {}",
                message_id.is_some(),
                file_ref.is_some()
            ),
        )),
    }
}

/// Timeouts and connection failures are worth retrying; anything else the
/// client raised is not.
pub fn classify_transport(err: &reqwest::Error) -> UploadError {
    if err.is_timeout() {
        UploadError::retryable("timeout", err.to_string())
    } else if err.is_connect() || err.is_request() || err.is_body() {
        UploadError::retryable("connection_error", err.to_string())
    } else {
        UploadError::terminal("request_failed", err.to_string())
    }
}

fn describe(body: &str) -> Option<String> {
    serde_json::from_str::<ApiResponse>(body)
        .ok()
        .filter(|parsed| !parsed.ok)
        .and_then(|parsed| parsed.description)
}

/// Structured descriptions are always terminal; rate limits and server
/// errors are recognised from the status alone.
fn classify_description(description: &str) -> UploadError {
    let lowered = description.to_lowercase();
    let contains = |needles: &[&str]| needles.iter().any(|n| lowered.contains(n));

    let code = if contains(&["too large", "too big"]) {
        "file_too_large"
    } else if contains(&["chat not found"]) {
        "chat_not_found"
    } else if contains(&["blocked"]) {
        "bot_blocked"
    } else if contains(&["forbidden", "not enough rights"]) {
        "forbidden"
    } else if contains(&["unsupported", "codec", "wrong file", "invalid"]) {
        "unsupported_media"
    } else {
        "remote_error"
    };
    UploadError::terminal(code, description)
}
