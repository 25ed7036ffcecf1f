//! RFC 7807 problem-details bodies.

use serde::Serialize;

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl Problem {
    pub fn new(status: u16, title: &str, detail: &str, trace_id: Option<&str>) -> Self {
        Self {
            kind: type_uri(status).to_string(),
            title: title.to_string(),
            status,
            detail: detail.to_string(),
            trace_id: trace_id.filter(|t| !t.trim().is_empty()).map(str::to_string),
        }
    }

    pub fn unhandled(trace_id: Option<&str>) -> Self {
        Self::new(
            500,
            "Unexpected error",
            "An unexpected error occurred.",
            trace_id,
        )
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"title":"Unexpected error","status":{}}}"#,
                self.status
            )
        })
    }
}

fn type_uri(status: u16) -> &'static str {
    match status {
        400 => "https://tools.ietf.org/html/rfc9110#section-15.5.1",
        404 => "https://tools.ietf.org/html/rfc9110#section-15.5.5",
        405 => "https://tools.ietf.org/html/rfc9110#section-15.5.6",
        503 => "https://tools.ietf.org/html/rfc9110#section-15.6.4",
        _ => "https://tools.ietf.org/html/rfc9110#section-15.6.1",
    }
}
