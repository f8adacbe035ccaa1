//! One open board: the authoritative task and category lists plus a drag
//! engine per view scope.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::archive::partition_archived;
use crate::engine::{
    CommitPlan, CommitReport, CommitResolution, Direction, DragEngine, DragEvent, DragOutcome,
    DragRef, PhaseKind, ReloadOutcome, TaskUpdate, ViewScope, dispatch,
};
use crate::error::{ApiError, EngineError};
use crate::gateway::Gateway;
use crate::ordering::BucketKey;
use crate::types::{BacklogCategory, Board, Task, TaskStatus, UpdateTaskRequest};

#[derive(Debug, Clone)]
pub struct BoardSession {
    board: Board,
    categories: Vec<BacklogCategory>,
    active: Vec<Task>,
    archived: Vec<Task>,
    board_view: DragEngine,
    backlog_view: DragEngine,
    now: DateTime<Utc>,
}

/// What a finished drop did, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropStatus {
    Canceled,
    Unchanged,
    Confirmed,
    RolledBack,
    PartiallyApplied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DropSummary {
    pub status: DropStatus,
    pub updates: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DropSummary {
    fn without_commit(status: DropStatus) -> Self {
        Self {
            status,
            updates: 0,
            failed: 0,
            error: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failed > 0
    }
}

impl BoardSession {
    pub async fn load<G: Gateway + ?Sized>(
        gateway: &G,
        board: Board,
        now: DateTime<Utc>,
    ) -> Result<Self, ApiError> {
        let tasks = gateway.list_tasks(Some(&board.id)).await?;
        let categories = gateway.list_categories(&board.id).await?;
        Ok(Self::from_parts(board, tasks, categories, now))
    }

    pub fn from_parts(
        board: Board,
        tasks: Vec<Task>,
        categories: Vec<BacklogCategory>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut session = Self {
            board,
            categories: Vec::new(),
            active: Vec::new(),
            archived: Vec::new(),
            board_view: DragEngine::new(ViewScope::Board),
            backlog_view: DragEngine::new(ViewScope::Backlog),
            now,
        };
        session.replace_data(tasks, categories, now);
        session.board_view.reload(&session.active, &session.categories);
        session.backlog_view.reload(&session.active, &session.categories);
        session
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Categories sorted by position.
    pub fn categories(&self) -> &[BacklogCategory] {
        &self.categories
    }

    pub fn active_tasks(&self) -> &[Task] {
        &self.active
    }

    pub fn archived_tasks(&self) -> &[Task] {
        &self.archived
    }

    /// Reference time of the last active/archived split.
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.active
            .iter()
            .chain(self.archived.iter())
            .find(|task| task.id == id)
    }

    pub fn engine(&self, scope: ViewScope) -> &DragEngine {
        match scope {
            ViewScope::Board => &self.board_view,
            ViewScope::Backlog => &self.backlog_view,
        }
    }

    pub fn engine_mut(&mut self, scope: ViewScope) -> &mut DragEngine {
        match scope {
            ViewScope::Board => &mut self.board_view,
            ViewScope::Backlog => &mut self.backlog_view,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.board_view.is_busy() || self.backlog_view.is_busy()
    }

    /// A view kept a partially applied commit and needs a reload.
    pub fn is_stale(&self) -> bool {
        self.board_view.is_stale() || self.backlog_view.is_stale()
    }

    /// Whether `tasks` and `categories` differ from what the session holds.
    pub fn differs_from(&self, tasks: &[Task], categories: &[BacklogCategory]) -> bool {
        let mut current: Vec<&Task> = self.active.iter().chain(self.archived.iter()).collect();
        let mut incoming: Vec<&Task> = tasks.iter().collect();
        current.sort_by(|a, b| a.id.cmp(&b.id));
        incoming.sort_by(|a, b| a.id.cmp(&b.id));

        let mut incoming_categories = categories.to_vec();
        sort_categories(&mut incoming_categories);

        current != incoming || self.categories != incoming_categories
    }

    /// Applies authoritative data to both views, unless either has a gesture
    /// in progress.
    pub fn reload(
        &mut self,
        tasks: Vec<Task>,
        categories: Vec<BacklogCategory>,
        now: DateTime<Utc>,
    ) -> ReloadOutcome {
        if self.is_busy() {
            warn!(board_id = %self.board.id, "reload deferred while a drag is active");
            return ReloadOutcome::Deferred;
        }
        self.replace_data(tasks, categories, now);
        self.board_view.reload(&self.active, &self.categories);
        self.backlog_view.reload(&self.active, &self.categories);
        debug!(
            board_id = %self.board.id,
            active = self.active.len(),
            archived = self.archived.len(),
            "session reloaded"
        );
        ReloadOutcome::Applied
    }

    fn replace_data(
        &mut self,
        tasks: Vec<Task>,
        mut categories: Vec<BacklogCategory>,
        now: DateTime<Utc>,
    ) {
        let (active, archived) = partition_archived(tasks, now);
        sort_categories(&mut categories);
        self.active = active;
        self.archived = archived;
        self.categories = categories;
        self.now = now;
    }

    /// Resolves a commit in `scope` and shares the confirmed entities with the
    /// other scope.
    pub fn finish_commit(
        &mut self,
        scope: ViewScope,
        report: &CommitReport,
    ) -> Result<CommitResolution, EngineError> {
        let resolution = self.engine_mut(scope).finish_commit(report)?;

        for task in &report.updated_tasks {
            upsert_by_id(&mut self.active, task.clone(), |t| &t.id);
        }
        for category in &report.updated_categories {
            upsert_by_id(&mut self.categories, category.clone(), |c| &c.id);
        }
        sort_categories(&mut self.categories);

        let other = match scope {
            ViewScope::Board => ViewScope::Backlog,
            ViewScope::Backlog => ViewScope::Board,
        };
        let (active, categories) = (self.active.clone(), self.categories.clone());
        self.engine_mut(other).reload(&active, &categories);

        Ok(resolution)
    }

    /// Runs a whole gesture (start, over, end), sends the plan and resolves
    /// it.
    pub async fn drop_on<G: Gateway + ?Sized>(
        &mut self,
        gateway: &G,
        scope: ViewScope,
        source: DragRef,
        target: DragRef,
    ) -> Result<DropSummary, EngineError> {
        let event = DragEvent::drop_on(source, target);
        let engine = self.engine_mut(scope);
        engine.on_drag_start(event.source.clone())?;
        engine.on_drag_over(&event)?;
        let outcome = engine.on_drag_end(&event)?;
        self.complete(gateway, scope, outcome).await
    }

    pub async fn nudge<G: Gateway + ?Sized>(
        &mut self,
        gateway: &G,
        scope: ViewScope,
        task_id: &str,
        direction: Direction,
    ) -> Result<DropSummary, EngineError> {
        let outcome = self.engine_mut(scope).nudge(task_id, direction)?;
        self.complete(gateway, scope, outcome).await
    }

    async fn complete<G: Gateway + ?Sized>(
        &mut self,
        gateway: &G,
        scope: ViewScope,
        outcome: DragOutcome,
    ) -> Result<DropSummary, EngineError> {
        let plan = match outcome {
            DragOutcome::Canceled => return Ok(DropSummary::without_commit(DropStatus::Canceled)),
            DragOutcome::Unchanged => {
                return Ok(DropSummary::without_commit(DropStatus::Unchanged));
            }
            DragOutcome::Commit(plan) => plan,
        };

        let report = dispatch(gateway, &plan).await;
        let status = match self.finish_commit(scope, &report)? {
            CommitResolution::Confirmed => DropStatus::Confirmed,
            CommitResolution::RolledBack => DropStatus::RolledBack,
            CommitResolution::PartiallyApplied => DropStatus::PartiallyApplied,
        };

        Ok(DropSummary {
            status,
            updates: report.attempted,
            failed: report.failures.len(),
            error: report.user_message(),
        })
    }

    /// Changes a task's status and returns the view that now holds it.
    ///
    /// Between board columns this is an ordinary drop on the column. Into or
    /// out of BACKLOG the task changes views: it is appended to the target
    /// bucket (uncategorized when entering the backlog) and the bucket it left
    /// is reindexed from 0.
    pub async fn move_to_status<G: Gateway + ?Sized>(
        &mut self,
        gateway: &G,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<(ViewScope, DropSummary), EngineError> {
        self.ensure_idle()?;
        let current = self
            .active
            .iter()
            .find(|task| task.id == task_id)
            .map(|task| task.status)
            .ok_or_else(|| EngineError::UnknownTask(task_id.to_string()))?;

        let from = ViewScope::for_status(current);
        let to = ViewScope::for_status(status);
        if from == ViewScope::Board && to == ViewScope::Board {
            let summary = self
                .drop_on(gateway, to, DragRef::task(task_id), DragRef::column(status))
                .await?;
            return Ok((to, summary));
        }
        if current == status {
            return Ok((to, DropSummary::without_commit(DropStatus::Unchanged)));
        }

        let updates = self.plan_view_transfer(task_id, from, to, status)?;
        info!(
            task_id,
            from = %current,
            to = %status,
            updates = updates.len(),
            "status change planned"
        );
        let report = dispatch(gateway, &CommitPlan::Tasks(updates)).await;

        for task in &report.updated_tasks {
            upsert_by_id(&mut self.active, task.clone(), |t| &t.id);
        }
        self.refresh_views();

        let status = if report.is_success() {
            DropStatus::Confirmed
        } else {
            error!(
                task_id,
                summary = %report.failure_summary().unwrap_or_default(),
                "status change failed"
            );
            if report.is_total_failure() {
                DropStatus::RolledBack
            } else {
                DropStatus::PartiallyApplied
            }
        };

        Ok((
            to,
            DropSummary {
                status,
                updates: report.attempted,
                failed: report.failures.len(),
                error: report.user_message(),
            },
        ))
    }

    fn plan_view_transfer(
        &self,
        task_id: &str,
        from: ViewScope,
        to: ViewScope,
        status: TaskStatus,
    ) -> Result<Vec<TaskUpdate>, EngineError> {
        let source = self.engine(from).ordering();
        let (from_key, _) = source
            .locate(task_id)
            .ok_or_else(|| EngineError::UnknownTask(task_id.to_string()))?;
        let to_key = match to {
            ViewScope::Board => BucketKey::Status(status),
            ViewScope::Backlog => BucketKey::uncategorized(),
        };

        let append_at = self.engine(to).ordering().bucket(&to_key).len() as i64;
        let mut patch = UpdateTaskRequest::position(append_at);
        patch.status = Some(status);
        to_key.assign_membership(&mut patch);

        let mut updates = vec![TaskUpdate {
            task_id: task_id.to_string(),
            patch,
        }];
        let remaining = source
            .bucket(from_key)
            .iter()
            .filter(|task| task.id != task_id);
        for (index, task) in remaining.enumerate() {
            let position = index as i64;
            if task.position != position {
                updates.push(TaskUpdate {
                    task_id: task.id.clone(),
                    patch: UpdateTaskRequest::position(position),
                });
            }
        }
        Ok(updates)
    }

    fn ensure_idle(&self) -> Result<(), EngineError> {
        for engine in [&self.board_view, &self.backlog_view] {
            match engine.phase() {
                PhaseKind::Idle => {}
                PhaseKind::Dragging => return Err(EngineError::AlreadyDragging),
                PhaseKind::Committing => return Err(EngineError::CommitInFlight),
            }
        }
        Ok(())
    }

    /// Drops a category locally. Its tasks become uncategorized.
    pub fn remove_category(&mut self, id: &str) -> bool {
        let before = self.categories.len();
        self.categories.retain(|category| category.id != id);
        if self.categories.len() == before {
            return false;
        }
        for task in &mut self.active {
            if task.backlog_category_id.as_deref() == Some(id) {
                task.backlog_category_id = None;
            }
        }
        self.refresh_views();
        true
    }

    /// Position that appends a new task to its bucket.
    pub fn next_task_position(&self, status: TaskStatus, category_id: Option<&str>) -> i64 {
        self.active
            .iter()
            .filter(|task| task.status == status)
            .filter(|task| {
                status != TaskStatus::Backlog || task.backlog_category_id.as_deref() == category_id
            })
            .map(|task| task.position + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn next_category_position(&self) -> i64 {
        self.categories
            .iter()
            .map(|category| category.position + 1)
            .max()
            .unwrap_or(0)
    }

    fn refresh_views(&mut self) {
        self.board_view.reload(&self.active, &self.categories);
        self.backlog_view.reload(&self.active, &self.categories);
    }
}

fn sort_categories(categories: &mut [BacklogCategory]) {
    categories.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
}

fn upsert_by_id<T, F>(items: &mut Vec<T>, item: T, id_of: F)
where
    F: Fn(&T) -> &String,
{
    match items.iter().position(|existing| id_of(existing) == id_of(&item)) {
        Some(index) => items[index] = item,
        None => items.push(item),
    }
}
