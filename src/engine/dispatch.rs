//! Sending a commit plan to the backend, one call per entity.

use serde::Serialize;
use tracing::{info, warn};

use super::diff::{CategoryUpdate, TaskUpdate};
use crate::error::ApiError;
use crate::gateway::Gateway;
use crate::types::{BacklogCategory, Task, UpdateCategoryRequest};

/// Writes produced by a finished gesture, in the order they must be sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "updates", rename_all = "lowercase")]
pub enum CommitPlan {
    Tasks(Vec<TaskUpdate>),
    Categories(Vec<CategoryUpdate>),
}

impl CommitPlan {
    pub fn len(&self) -> usize {
        match self {
            CommitPlan::Tasks(updates) => updates.len(),
            CommitPlan::Categories(updates) => updates.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct CommitFailure {
    pub entity_id: String,
    pub error: ApiError,
}

/// Outcome of every call in a plan. Entities returned by successful calls are
/// kept so the engine can merge server-side fields.
#[derive(Debug, Default)]
pub struct CommitReport {
    pub attempted: usize,
    pub updated_tasks: Vec<Task>,
    pub updated_categories: Vec<BacklogCategory>,
    pub failures: Vec<CommitFailure>,
}

impl CommitReport {
    pub fn succeeded(&self) -> usize {
        self.attempted - self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn is_total_failure(&self) -> bool {
        self.attempted > 0 && self.succeeded() == 0
    }

    /// One line describing every failed call, for logs and the user.
    pub fn failure_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let details: Vec<String> = self
            .failures
            .iter()
            .map(|failure| format!("{} ({})", failure.entity_id, failure.error.code()))
            .collect();
        Some(format!(
            "{} of {} updates failed: {}",
            self.failures.len(),
            self.attempted,
            details.join(", ")
        ))
    }

    /// User-facing text of the first failure.
    pub fn user_message(&self) -> Option<String> {
        self.failures
            .first()
            .map(|failure| failure.error.user_message())
    }
}

/// Issues every call in `plan` sequentially. A failed call does not stop the
/// remaining ones.
pub async fn dispatch<G: Gateway + ?Sized>(gateway: &G, plan: &CommitPlan) -> CommitReport {
    let mut report = CommitReport {
        attempted: plan.len(),
        ..CommitReport::default()
    };

    match plan {
        CommitPlan::Tasks(updates) => {
            for update in updates {
                match gateway.update_task(&update.task_id, &update.patch).await {
                    Ok(task) => report.updated_tasks.push(task),
                    Err(error) => {
                        warn!(task_id = %update.task_id, error = %error, "task update failed");
                        report.failures.push(CommitFailure {
                            entity_id: update.task_id.clone(),
                            error,
                        });
                    }
                }
            }
        }
        CommitPlan::Categories(updates) => {
            for update in updates {
                let patch = UpdateCategoryRequest {
                    position: Some(update.position),
                    ..UpdateCategoryRequest::default()
                };
                match gateway.update_category(&update.category_id, &patch).await {
                    Ok(category) => report.updated_categories.push(category),
                    Err(error) => {
                        warn!(
                            category_id = %update.category_id,
                            error = %error,
                            "category update failed"
                        );
                        report.failures.push(CommitFailure {
                            entity_id: update.category_id.clone(),
                            error,
                        });
                    }
                }
            }
        }
    }

    info!(
        attempted = report.attempted,
        failed = report.failures.len(),
        "commit dispatched"
    );
    report
}
