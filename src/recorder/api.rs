//! Request-shaped entry points over a `Recorder`, answering with the
//! `{ success, data?, error? }` envelope used by `codegate stats --json`.

use serde::Serialize;
use serde_json::{json, Value};

use super::{Recorder, RecorderError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Envelope,
}

impl Response {
    fn ok(data: Value) -> Self {
        Self {
            status: 200,
            body: Envelope {
                success: true,
                data: Some(data),
                error: None,
            },
        }
    }

    fn failed(error: RecorderError) -> Self {
        Self {
            status: error.status(),
            body: Envelope {
                success: false,
                data: None,
                error: Some(error.to_string()),
            },
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.body).unwrap_or_else(|_| "{\"success\":false}".into())
    }
}

fn bad(message: &str) -> RecorderError {
    RecorderError::Validation(message.into())
}

/// Body: `{"challenge_index": <int>, "completion_time": <number>}`.
pub fn submit(recorder: &Recorder, body: &str) -> Response {
    let parsed: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => return Response::failed(bad(&format!("malformed body: {}", e))),
    };
    let Some(index) = parsed.get("challenge_index").and_then(Value::as_u64) else {
        return Response::failed(bad("challenge_index must be a non-negative integer"));
    };
    let Some(time) = parsed.get("completion_time").and_then(Value::as_f64) else {
        return Response::failed(bad("completion_time must be a number"));
    };
    let Ok(index) = usize::try_from(index) else {
        return Response::failed(bad("challenge_index out of range"));
    };
    match recorder.submit(index, time) {
        Ok(record) => match serde_json::to_value(&record) {
            Ok(data) => Response::ok(data),
            Err(e) => Response::failed(RecorderError::Storage(e.to_string())),
        },
        Err(e) => Response::failed(e),
    }
}

/// Query: `challenge_index=<int>`.
pub fn list(recorder: &Recorder, query: &str) -> Response {
    let value = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "challenge_index")
        .map(|(_, value)| value);
    let Some(index) = value.and_then(|v| v.parse::<usize>().ok()) else {
        return Response::failed(bad("challenge_index must be a non-negative integer"));
    };
    match recorder.list(index) {
        Ok(times) => Response::ok(Value::Array(
            times.into_iter().map(|t| json!({ "completion_time": t })).collect(),
        )),
        Err(e) => Response::failed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::MemoryStore;
    use std::sync::Arc;

    fn recorder() -> Recorder {
        Recorder::new(Arc::new(MemoryStore::new()), 3)
    }

    #[test]
    fn test_submit_then_list() {
        let recorder = recorder();
        for body in [
            r#"{"challenge_index": 1, "completion_time": 90}"#,
            r#"{"challenge_index": 1, "completion_time": 45}"#,
        ] {
            let response = submit(&recorder, body);
            assert_eq!(response.status, 200);
            assert!(response.body.success);
        }

        let response = list(&recorder, "challenge_index=1");
        assert_eq!(response.status, 200);
        assert_eq!(
            response.body.data,
            Some(json!([{ "completion_time": 45.0 }, { "completion_time": 90.0 }]))
        );
    }

    #[test]
    fn test_invalid_bodies_are_400() {
        let recorder = recorder();
        for body in [
            "not json",
            r#"{"challenge_index": 1.5, "completion_time": 3}"#,
            r#"{"challenge_index": -1, "completion_time": 3}"#,
            r#"{"challenge_index": 7, "completion_time": 3}"#,
            r#"{"challenge_index": 0, "completion_time": -3}"#,
            r#"{"challenge_index": 0, "completion_time": "fast"}"#,
        ] {
            let response = submit(&recorder, body);
            assert_eq!(response.status, 400, "{}", body);
            assert!(!response.body.success);
            assert!(response.body.error.is_some());
        }
        assert!(list(&recorder, "challenge_index=0").body.data == Some(json!([])));
    }

    #[test]
    fn test_list_needs_index() {
        let response = list(&recorder(), "other=1");
        assert_eq!(response.status, 400);
        assert!(response.to_json().contains("\"success\": false"));
    }
}
