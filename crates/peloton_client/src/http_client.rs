//! Reqwest plumbing shared by the Peloton adapters.
//!
//! Both adapters talk to the same API endpoints and differ only in how they
//! authenticate, so request building and response decoding live here.

use crate::{PelotonError, WorkoutSummary};
use reqwest::Url;
use serde_json::{Map, Value};
use std::time::Duration;

/// Timeout for API reads.
pub const API_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for each step of a login flow.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(30);
/// Relations expanded on workout listings and details.
pub const WORKOUT_JOINS: &str = "ride,ride.instructor";
pub const USER_AGENT: &str = concat!("peloton-cli/", env!("CARGO_PKG_VERSION"));

const BODY_SNIPPET_LEN: usize = 256;

/// Base URL plus the reqwest client an adapter sends API requests through.
#[derive(Clone, Debug)]
pub struct ApiHttp {
    base_url: String,
    client: reqwest::Client,
}

impl ApiHttp {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Build `{base_url}/seg1/seg2/...`, percent-encoding each segment.
    pub fn url(&self, segments: &[&str]) -> Result<Url, PelotonError> {
        join_segments(&self.base_url, segments)
    }

    /// GET request with the API timeout and web-platform header applied.
    pub fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .timeout(API_TIMEOUT)
            .header("peloton-platform", "web")
    }

    /// Send a request and decode a JSON object body.
    pub async fn execute_object(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Map<String, Value>, PelotonError> {
        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        let text = resp.text().await?;
        parse_object(&text)
    }
}

/// Append path segments to `base`, keeping any path the base already has.
pub fn join_segments(base: &str, segments: &[&str]) -> Result<Url, PelotonError> {
    let mut url =
        Url::parse(base).map_err(|e| PelotonError::Config(format!("invalid url {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| PelotonError::Config(format!("url cannot be a base: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Convert a failed response into an error, preferring the API's own message.
pub async fn error_from_response(resp: reqwest::Response) -> PelotonError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    PelotonError::from_status(status, api_message(&body))
}

/// Peloton error bodies look like `{"status": 404, "message": "..."}`.
/// Anything else is reduced to a short snippet of the raw body.
pub fn api_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| snippet(body))
}

pub fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_LEN).collect()
}

/// Decode a response body that must be a JSON object.
///
/// Some endpoints answer 200 with an error status embedded in the body; those
/// are surfaced as errors too.
pub fn parse_object(text: &str) -> Result<Map<String, Value>, PelotonError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| PelotonError::Decode(format!("{e} - body: {}", snippet(text))))?;
    let Value::Object(map) = value else {
        return Err(PelotonError::Decode(format!(
            "expected a JSON object, got: {}",
            snippet(text)
        )));
    };

    let embedded_status = map
        .get("status")
        .and_then(Value::as_u64)
        .filter(|s| *s >= 400);
    if let Some(status) = embedded_status {
        let message = map
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Peloton API error");
        let status = u16::try_from(status).unwrap_or(u16::MAX);
        return Err(PelotonError::from_status(status, message));
    }
    Ok(map)
}

/// Pull the `data` array out of a paginated workouts response.
pub fn workout_page(
    mut payload: Map<String, Value>,
    limit: u32,
) -> Result<Vec<WorkoutSummary>, PelotonError> {
    let items = match payload.remove("data") {
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(PelotonError::Decode(format!(
                "workouts `data` is not an array: {other}"
            )));
        }
        None => {
            return Err(PelotonError::Decode(
                "workouts response has no `data` field".into(),
            ));
        }
    };

    items
        .into_iter()
        .take(limit as usize)
        .map(|item| match item {
            Value::Object(map) => Ok(map),
            other => Err(PelotonError::Decode(format!(
                "workout entry is not an object: {other}"
            ))),
        })
        .collect()
}

/// Query pairs for a workouts page, newest first.
pub fn workouts_query(limit: u32, page: u32) -> [(&'static str, String); 4] {
    [
        ("page", page.to_string()),
        ("limit", limit.to_string()),
        ("sort_by", "-created".to_string()),
        ("joins", WORKOUT_JOINS.to_string()),
    ]
}

pub fn validate_workout_id(workout_id: &str) -> Result<&str, PelotonError> {
    let id = workout_id.trim();
    if id.is_empty() {
        return Err(PelotonError::InvalidInput(
            "workout_id must be provided".into(),
        ));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_segments_encodes_ids() {
        let url = join_segments("http://localhost:9000/", &["api", "workout", "a/b c"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/api/workout/a%2Fb%20c");
    }

    #[test]
    fn join_segments_keeps_base_path() {
        let url = join_segments("http://localhost/proxy", &["api", "me"]).unwrap();
        assert_eq!(url.path(), "/proxy/api/me");
    }

    #[test]
    fn join_segments_rejects_garbage() {
        let err = join_segments("not a url", &["api"]).unwrap_err();
        assert!(matches!(err, PelotonError::Config(_)));
    }

    #[test]
    fn api_message_prefers_json_message() {
        assert_eq!(
            api_message(r#"{"status":401,"message":"Login failed"}"#),
            "Login failed"
        );
        assert_eq!(api_message("<html>oops</html>"), "<html>oops</html>");
        let long = "x".repeat(1000);
        assert_eq!(api_message(&long).len(), BODY_SNIPPET_LEN);
    }

    #[test]
    fn parse_object_rejects_non_objects() {
        assert!(matches!(parse_object("[1,2]"), Err(PelotonError::Decode(_))));
        assert!(matches!(parse_object("nope"), Err(PelotonError::Decode(_))));
    }

    #[test]
    fn parse_object_surfaces_embedded_status() {
        let err = parse_object(r#"{"status":404,"message":"Workout not found"}"#).unwrap_err();
        match err {
            PelotonError::NotFound(msg) => assert_eq!(msg, "Workout not found"),
            other => panic!("unexpected error: {other:?}"),
        }
        let err = parse_object(r#"{"status":500}"#).unwrap_err();
        assert!(matches!(err, PelotonError::Api { status: 500, .. }));
    }

    #[test]
    fn parse_object_ignores_textual_status() {
        let map = parse_object(r#"{"id":"w1","status":"COMPLETE"}"#).unwrap();
        assert_eq!(map["status"], json!("COMPLETE"));
    }

    #[test]
    fn workout_page_extracts_and_truncates() {
        let payload = json!({
            "data": [{"id": "a"}, {"id": "b"}, {"id": "c"}],
            "count": 3,
            "page": 0
        });
        let Value::Object(map) = payload else {
            unreachable!()
        };
        let items = workout_page(map, 2).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["id"], json!("a"));
    }

    #[test]
    fn workout_page_requires_data_array() {
        let Value::Object(map) = json!({"count": 0}) else {
            unreachable!()
        };
        assert!(matches!(workout_page(map, 5), Err(PelotonError::Decode(_))));
        let Value::Object(map) = json!({"data": [1]}) else {
            unreachable!()
        };
        assert!(matches!(workout_page(map, 5), Err(PelotonError::Decode(_))));
    }

    #[test]
    fn validate_workout_id_rejects_blank() {
        assert!(matches!(
            validate_workout_id("  "),
            Err(PelotonError::InvalidInput(_))
        ));
        assert_eq!(validate_workout_id(" abc ").unwrap(), "abc");
    }
}
