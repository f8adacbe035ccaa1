use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::{Gateway, RetryPolicy};
use crate::error::ApiError;
use crate::settings::Settings;
use crate::types::{
    BacklogCategory, Board, CreateBoardRequest, CreateCategoryRequest, CreateTaskRequest, Task,
    UpdateBoardRequest, UpdateCategoryRequest, UpdateTaskRequest,
};

const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Gateway over the backend's JSON REST API. Reads are retried with backoff
/// on server and transport errors; writes are sent exactly once.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    read_retry: RetryPolicy,
}

impl HttpGateway {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(concat!("taskdeck/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self::with_client(
            client,
            &settings.api_base_url,
            RetryPolicy::from_settings(settings),
        ))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, read_retry: RetryPolicy) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            read_retry,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let label = format!("GET {path}");
        self.read_retry
            .run(&label, || async move {
                let request = self.client.get(self.url(path)).query(query);
                let response = self.send("GET", path, request).await?;
                decode("GET", path, response).await
            })
            .await
    }

    async fn write_json<T: DeserializeOwned>(
        &self,
        method: &'static str,
        path: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.send(method, path, request).await?;
        decode(method, path, response).await
    }

    async fn send(
        &self,
        method: &'static str,
        path: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        let request_id = Uuid::new_v4();
        debug!(%request_id, method, path, "sending request");

        let response = request
            .header(REQUEST_ID_HEADER, request_id.to_string())
            .send()
            .await
            .map_err(|source| ApiError::Network {
                method,
                path: path.to_string(),
                source,
            })?;

        let status = response.status();
        debug!(%request_id, method, path, status = status.as_u16(), "received response");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let (code, message) = parse_error_body(status.as_u16(), &body);
        Err(ApiError::http(method, path, status.as_u16(), code, message))
    }
}

async fn decode<T: DeserializeOwned>(
    method: &'static str,
    path: &str,
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let bytes = response.bytes().await.map_err(|source| ApiError::Network {
        method,
        path: path.to_string(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode {
        method,
        path: path.to_string(),
        message: err.to_string(),
    })
}

/// Extracts `(code, message)` from an error body. Accepts
/// `{"error": {"code", "message"}}`, `{"code", "message"}`, `{"error": "..."}`
/// or plain text, falling back to codes derived from the status.
fn parse_error_body(status: u16, body: &str) -> (String, String) {
    let fallback_code = default_error_code(status);
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    let Some(value) = parsed else {
        let text = body.trim();
        let message = if text.is_empty() {
            format!("HTTP {status}")
        } else {
            text.chars().take(300).collect()
        };
        return (fallback_code, message);
    };

    let container = match value.get("error") {
        Some(Value::Object(_)) => &value["error"],
        _ => &value,
    };

    let code = container
        .get("code")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or(fallback_code);
    let message = container
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| value.get("error").and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"));

    (code, message)
}

fn default_error_code(status: u16) -> String {
    match status {
        400 => "BAD_REQUEST".to_string(),
        401 => "UNAUTHORIZED".to_string(),
        403 => "FORBIDDEN".to_string(),
        404 => "NOT_FOUND".to_string(),
        409 => "CONFLICT".to_string(),
        422 => "VALIDATION_FAILED".to_string(),
        500..=599 => "SERVER_ERROR".to_string(),
        other => format!("HTTP_{other}"),
    }
}

fn entity_path(collection: &str, id: &str) -> String {
    format!("/{collection}/{}", urlencoding::encode(id))
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn list_boards(&self) -> Result<Vec<Board>, ApiError> {
        self.get_json("/boards", &[]).await
    }

    async fn create_board(&self, request: &CreateBoardRequest) -> Result<Board, ApiError> {
        let path = "/boards";
        self.write_json("POST", path, self.client.post(self.url(path)).json(request))
            .await
    }

    async fn update_board(
        &self,
        id: &str,
        request: &UpdateBoardRequest,
    ) -> Result<Board, ApiError> {
        let path = entity_path("boards", id);
        self.write_json("PUT", &path, self.client.put(self.url(&path)).json(request))
            .await
    }

    async fn delete_board(&self, id: &str) -> Result<(), ApiError> {
        let path = entity_path("boards", id);
        self.send("DELETE", &path, self.client.delete(self.url(&path)))
            .await
            .map(|_| ())
    }

    async fn list_tasks(&self, board_id: Option<&str>) -> Result<Vec<Task>, ApiError> {
        match board_id {
            Some(board_id) => self.get_json("/tasks", &[("boardId", board_id)]).await,
            None => self.get_json("/tasks", &[]).await,
        }
    }

    async fn create_task(&self, request: &CreateTaskRequest) -> Result<Task, ApiError> {
        let path = "/tasks";
        self.write_json("POST", path, self.client.post(self.url(path)).json(request))
            .await
    }

    async fn update_task(&self, id: &str, patch: &UpdateTaskRequest) -> Result<Task, ApiError> {
        let path = entity_path("tasks", id);
        self.write_json("PATCH", &path, self.client.patch(self.url(&path)).json(patch))
            .await
    }

    async fn delete_task(&self, id: &str) -> Result<(), ApiError> {
        let path = entity_path("tasks", id);
        self.send("DELETE", &path, self.client.delete(self.url(&path)))
            .await
            .map(|_| ())
    }

    async fn search_tasks(
        &self,
        query: &str,
        board_id: Option<&str>,
    ) -> Result<Vec<Task>, ApiError> {
        match board_id {
            Some(board_id) => {
                self.get_json("/tasks/search", &[("q", query), ("boardId", board_id)])
                    .await
            }
            None => self.get_json("/tasks/search", &[("q", query)]).await,
        }
    }

    async fn list_categories(&self, board_id: &str) -> Result<Vec<BacklogCategory>, ApiError> {
        self.get_json("/categories", &[("boardId", board_id)]).await
    }

    async fn create_category(
        &self,
        request: &CreateCategoryRequest,
    ) -> Result<BacklogCategory, ApiError> {
        let path = "/categories";
        self.write_json("POST", path, self.client.post(self.url(path)).json(request))
            .await
    }

    async fn update_category(
        &self,
        id: &str,
        patch: &UpdateCategoryRequest,
    ) -> Result<BacklogCategory, ApiError> {
        let path = entity_path("categories", id);
        self.write_json("PATCH", &path, self.client.patch(self.url(&path)).json(patch))
            .await
    }

    async fn delete_category(&self, id: &str) -> Result<(), ApiError> {
        let path = entity_path("categories", id);
        self.send("DELETE", &path, self.client.delete(self.url(&path)))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_body_nested_object() {
        let (code, message) = parse_error_body(
            422,
            r#"{"error":{"code":"NAME_TOO_LONG","message":"name exceeds 100 characters"}}"#,
        );
        assert_eq!(code, "NAME_TOO_LONG");
        assert_eq!(message, "name exceeds 100 characters");
    }

    #[test]
    fn parse_error_body_flat_object() {
        let (code, message) = parse_error_body(404, r#"{"message":"Task not found"}"#);
        assert_eq!(code, "NOT_FOUND");
        assert_eq!(message, "Task not found");
    }

    #[test]
    fn parse_error_body_error_string() {
        let (code, message) = parse_error_body(500, r#"{"error":"database unavailable"}"#);
        assert_eq!(code, "SERVER_ERROR");
        assert_eq!(message, "database unavailable");
    }

    #[test]
    fn parse_error_body_plain_text_and_empty() {
        assert_eq!(
            parse_error_body(502, "Bad Gateway"),
            ("SERVER_ERROR".to_string(), "Bad Gateway".to_string())
        );
        assert_eq!(
            parse_error_body(418, ""),
            ("HTTP_418".to_string(), "HTTP 418".to_string())
        );
    }

    #[test]
    fn entity_path_encodes_ids() {
        assert_eq!(entity_path("tasks", "abc-1"), "/tasks/abc-1");
        assert_eq!(entity_path("categories", "a b/c"), "/categories/a%20b%2Fc");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let gateway = HttpGateway::with_client(
            reqwest::Client::new(),
            "http://localhost:8080/api/",
            RetryPolicy::default(),
        );
        assert_eq!(gateway.base_url(), "http://localhost:8080/api");
        assert_eq!(gateway.url("/tasks"), "http://localhost:8080/api/tasks");
    }
}
