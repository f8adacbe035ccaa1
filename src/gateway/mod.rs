//! Remote data gateway: the backend's REST surface as an async trait.

#[cfg(test)]
pub(crate) mod fake;
mod http;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::settings::Settings;
use crate::types::{
    BacklogCategory, Board, CreateBoardRequest, CreateCategoryRequest, CreateTaskRequest, Task,
    UpdateBoardRequest, UpdateCategoryRequest, UpdateTaskRequest,
};

pub use http::HttpGateway;

/// Every write touches exactly one entity; there is no bulk endpoint.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn list_boards(&self) -> Result<Vec<Board>, ApiError>;
    async fn create_board(&self, request: &CreateBoardRequest) -> Result<Board, ApiError>;
    async fn update_board(&self, id: &str, request: &UpdateBoardRequest)
    -> Result<Board, ApiError>;
    async fn delete_board(&self, id: &str) -> Result<(), ApiError>;

    /// Tasks of one board, or of every board when `board_id` is `None`.
    async fn list_tasks(&self, board_id: Option<&str>) -> Result<Vec<Task>, ApiError>;
    async fn create_task(&self, request: &CreateTaskRequest) -> Result<Task, ApiError>;
    async fn update_task(&self, id: &str, patch: &UpdateTaskRequest) -> Result<Task, ApiError>;
    async fn delete_task(&self, id: &str) -> Result<(), ApiError>;
    async fn search_tasks(&self, query: &str, board_id: Option<&str>)
    -> Result<Vec<Task>, ApiError>;

    async fn list_categories(&self, board_id: &str) -> Result<Vec<BacklogCategory>, ApiError>;
    async fn create_category(
        &self,
        request: &CreateCategoryRequest,
    ) -> Result<BacklogCategory, ApiError>;
    async fn update_category(
        &self,
        id: &str,
        patch: &UpdateCategoryRequest,
    ) -> Result<BacklogCategory, ApiError>;
    async fn delete_category(&self, id: &str) -> Result<(), ApiError>;
}

/// Backoff schedule for idempotent reads: `attempts` tries in total, waiting
/// `initial_backoff` after the first failure and doubling up to `max_backoff`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            attempts: settings.read_retry_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.retry_max_backoff_ms),
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let mut backoff = self.initial_backoff;
        for _ in 1..attempt {
            backoff = backoff.saturating_mul(2).min(self.max_backoff);
        }
        backoff.min(self.max_backoff)
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt ceiling is reached.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.attempts => {
                    let wait_for = self.backoff_after(attempt);
                    tracing::warn!(
                        request = label,
                        attempt,
                        max_attempts = self.attempts,
                        wait_ms = wait_for.as_millis() as u64,
                        error = %err,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(wait_for).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
