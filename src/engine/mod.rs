//! Drag reconciliation engine.
//!
//! One engine owns the ordering of one view scope. A gesture moves it through
//! `Idle -> Dragging -> Committing -> Idle`: drag-over previews cross-bucket
//! moves locally, drag-end plans the writes against the pre-drag snapshot, and
//! [`DragEngine::finish_commit`] folds the backend's answers back in. Sending
//! the plan is left to [`dispatch`] so no borrow of the engine is held across
//! network calls.

mod diff;
mod dispatch;
mod nudge;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::ordering::{BucketKey, DropTarget, OrderingState, UNCATEGORIZED};
use crate::types::{BacklogCategory, Task, TaskStatus};

pub use diff::{
    CategoryUpdate, TaskUpdate, apply_task_updates, plan_category_reorder, plan_task_updates,
};
pub use dispatch::{CommitFailure, CommitPlan, CommitReport, dispatch};
pub use nudge::Direction;

/// Which grouping an engine orders tasks by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewScope {
    /// Status columns from TODO to DONE.
    Board,
    /// Backlog tasks grouped by category.
    Backlog,
}

impl ViewScope {
    pub fn as_str(self) -> &'static str {
        match self {
            ViewScope::Board => "board",
            ViewScope::Backlog => "backlog",
        }
    }

    /// The scope that orders tasks of `status`. BACKLOG tasks are positioned
    /// per category, so only the backlog view may reorder them.
    pub fn for_status(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Backlog => ViewScope::Backlog,
            _ => ViewScope::Board,
        }
    }

    /// Bucket a task belongs to in this scope, or `None` if the scope does not
    /// show it. Category ids that no longer exist fall back to uncategorized.
    pub fn bucket_for(self, task: &Task, categories: &[BacklogCategory]) -> Option<BucketKey> {
        if Self::for_status(task.status) != self {
            return None;
        }
        match self {
            ViewScope::Board => Some(BucketKey::Status(task.status)),
            ViewScope::Backlog => match &task.backlog_category_id {
                Some(id) if categories.iter().any(|category| &category.id == id) => {
                    Some(BucketKey::category(id.clone()))
                }
                _ => Some(BucketKey::uncategorized()),
            },
        }
    }

    /// Buckets in display order. `categories` must already be sorted by
    /// position.
    pub fn declared_buckets(self, categories: &[BacklogCategory]) -> Vec<BucketKey> {
        match self {
            ViewScope::Board => TaskStatus::WORKFLOW.map(BucketKey::Status).to_vec(),
            ViewScope::Backlog => categories
                .iter()
                .map(|category| BucketKey::category(category.id.clone()))
                .chain(std::iter::once(BucketKey::uncategorized()))
                .collect(),
        }
    }

    /// Translates a drop element into a task drop target for this scope.
    pub fn drop_target(self, target: &DragRef) -> Option<DropTarget> {
        match (target.kind, self) {
            (DragKind::Task, _) => Some(DropTarget::Task(target.id.clone())),
            (DragKind::Column, ViewScope::Board) => TaskStatus::parse_loose(&target.id)
                .filter(|status| Self::for_status(*status) == ViewScope::Board)
                .map(|status| DropTarget::Bucket(BucketKey::Status(status))),
            (DragKind::Category, ViewScope::Backlog) if target.id == UNCATEGORIZED => {
                Some(DropTarget::Bucket(BucketKey::uncategorized()))
            }
            (DragKind::Category, ViewScope::Backlog) => {
                Some(DropTarget::Bucket(BucketKey::category(target.id.clone())))
            }
            _ => None,
        }
    }

    pub fn build(self, tasks: &[Task], categories: &[BacklogCategory]) -> OrderingState {
        let visible = tasks
            .iter()
            .filter(|task| self.bucket_for(task, categories).is_some())
            .cloned();
        OrderingState::rebuild(visible, |task| {
            self.bucket_for(task, categories)
                .unwrap_or_else(BucketKey::uncategorized)
        })
        .with_buckets(self.declared_buckets(categories))
    }
}

impl fmt::Display for ViewScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "board" => Ok(ViewScope::Board),
            "backlog" => Ok(ViewScope::Backlog),
            other => Err(format!("unknown view '{other}' (expected board or backlog)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DragKind {
    Task,
    Category,
    Column,
}

/// A draggable or droppable element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DragRef {
    pub id: String,
    pub kind: DragKind,
}

impl DragRef {
    pub fn task(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: DragKind::Task,
        }
    }

    pub fn category(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: DragKind::Category,
        }
    }

    pub fn column(status: TaskStatus) -> Self {
        Self {
            id: status.as_str().to_string(),
            kind: DragKind::Column,
        }
    }

    /// The drop container for a bucket in `scope`.
    pub fn container(scope: ViewScope, key: &BucketKey) -> Self {
        let kind = match scope {
            ViewScope::Board => DragKind::Column,
            ViewScope::Backlog => DragKind::Category,
        };
        Self {
            id: key.container_id().to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DragEvent {
    pub source: DragRef,
    pub target: Option<DragRef>,
    #[serde(default)]
    pub canceled: bool,
}

impl DragEvent {
    pub fn drop_on(source: DragRef, target: DragRef) -> Self {
        Self {
            source,
            target: Some(target),
            canceled: false,
        }
    }

    pub fn cancel(source: DragRef) -> Self {
        Self {
            source,
            target: None,
            canceled: true,
        }
    }
}

/// Pre-drag state restored on cancel or on a commit that failed entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub ordering: OrderingState,
    pub categories: Arc<Vec<BacklogCategory>>,
}

#[derive(Debug, Clone)]
struct Gesture {
    source: DragRef,
    snapshot: Snapshot,
}

#[derive(Debug, Clone, Default)]
enum Phase {
    #[default]
    Idle,
    Dragging(Gesture),
    Committing(Gesture),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    Idle,
    Dragging,
    Committing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragOutcome {
    /// Snapshot restored, nothing to send.
    Canceled,
    /// Dropped in place or on an invalid target.
    Unchanged,
    /// Local state already shows the result; send the plan and call
    /// [`DragEngine::finish_commit`].
    Commit(CommitPlan),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitResolution {
    Confirmed,
    /// Nothing reached the server; the pre-drag state is back.
    RolledBack,
    /// Some writes landed. The post-drag state is kept and marked stale.
    PartiallyApplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadOutcome {
    Applied,
    Deferred,
}

#[derive(Debug, Clone)]
pub struct DragEngine {
    scope: ViewScope,
    ordering: OrderingState,
    categories: Arc<Vec<BacklogCategory>>,
    phase: Phase,
    stale: bool,
}

impl DragEngine {
    pub fn new(scope: ViewScope) -> Self {
        Self {
            scope,
            ordering: scope.build(&[], &[]),
            categories: Arc::new(Vec::new()),
            phase: Phase::Idle,
            stale: false,
        }
    }

    pub fn load(scope: ViewScope, tasks: &[Task], categories: &[BacklogCategory]) -> Self {
        let mut engine = Self::new(scope);
        engine.rebuild(tasks, categories);
        engine
    }

    pub fn scope(&self) -> ViewScope {
        self.scope
    }

    pub fn ordering(&self) -> &OrderingState {
        &self.ordering
    }

    /// Categories sorted by position.
    pub fn categories(&self) -> &[BacklogCategory] {
        &self.categories
    }

    /// Buckets in display order with their tasks.
    pub fn columns(&self) -> Vec<(BucketKey, &[Task])> {
        self.scope
            .declared_buckets(&self.categories)
            .into_iter()
            .map(|key| {
                let tasks = self.ordering.bucket(&key);
                (key, tasks)
            })
            .collect()
    }

    pub fn phase(&self) -> PhaseKind {
        match self.phase {
            Phase::Idle => PhaseKind::Idle,
            Phase::Dragging(_) => PhaseKind::Dragging,
            Phase::Committing(_) => PhaseKind::Committing,
        }
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.phase, Phase::Dragging(_))
    }

    /// A gesture is active or its commit has not been finished.
    pub fn is_busy(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Replaces the ordering with authoritative data unless a gesture is in
    /// progress.
    pub fn reload(&mut self, tasks: &[Task], categories: &[BacklogCategory]) -> ReloadOutcome {
        if self.is_busy() {
            debug!(scope = %self.scope, phase = ?self.phase(), "reload deferred");
            return ReloadOutcome::Deferred;
        }
        self.rebuild(tasks, categories);
        self.stale = false;
        ReloadOutcome::Applied
    }

    fn rebuild(&mut self, tasks: &[Task], categories: &[BacklogCategory]) {
        let mut sorted = categories.to_vec();
        sorted.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
        self.ordering = self.scope.build(tasks, &sorted);
        self.categories = Arc::new(sorted);
    }

    pub fn on_drag_start(&mut self, source: DragRef) -> Result<(), EngineError> {
        match self.phase {
            Phase::Idle => {}
            Phase::Dragging(_) => return Err(EngineError::AlreadyDragging),
            Phase::Committing(_) => return Err(EngineError::CommitInFlight),
        }

        match source.kind {
            DragKind::Task => {
                if self.ordering.locate(&source.id).is_none() {
                    return Err(EngineError::UnknownTask(source.id));
                }
            }
            DragKind::Category => {
                if self.scope != ViewScope::Backlog {
                    return Err(EngineError::CategoriesUnavailable);
                }
                if !self.categories.iter().any(|category| category.id == source.id) {
                    return Err(EngineError::UnknownCategory(source.id));
                }
            }
            DragKind::Column => return Err(EngineError::NotDraggable(source.id)),
        }

        debug!(scope = %self.scope, source = %source.id, kind = ?source.kind, "drag started");
        let snapshot = Snapshot {
            ordering: self.ordering.clone(),
            categories: Arc::clone(&self.categories),
        };
        self.phase = Phase::Dragging(Gesture { source, snapshot });
        Ok(())
    }

    /// Live preview. Only moves that change buckets are applied, so repeating
    /// an event changes nothing. Returns whether the ordering changed.
    pub fn on_drag_over(&mut self, event: &DragEvent) -> Result<bool, EngineError> {
        let gesture = self.active_gesture(&event.source)?;
        if event.canceled || gesture.source.kind != DragKind::Task {
            return Ok(false);
        }
        let Some(target) = event.target.as_ref().and_then(|t| self.scope.drop_target(t)) else {
            return Ok(false);
        };

        let Some(mv) = self.ordering.resolve_move(&event.source.id, &target) else {
            return Ok(false);
        };
        if !mv.crosses_buckets() {
            return Ok(false);
        }
        debug!(task_id = %mv.task_id, to = mv.to.container_id(), "drag preview crossed buckets");
        Ok(self.ordering.apply_move(&mv))
    }

    pub fn on_drag_end(&mut self, event: &DragEvent) -> Result<DragOutcome, EngineError> {
        self.active_gesture(&event.source)?;
        let Phase::Dragging(gesture) = std::mem::take(&mut self.phase) else {
            return Err(EngineError::NotDragging);
        };

        let target = match (&event.target, event.canceled) {
            (Some(target), false) => target,
            _ => {
                debug!(source = %gesture.source.id, "drag canceled");
                self.restore(gesture.snapshot);
                return Ok(DragOutcome::Canceled);
            }
        };

        match gesture.source.kind {
            DragKind::Task => self.end_task_drag(gesture, target),
            DragKind::Category => Ok(self.end_category_drag(gesture, target)),
            DragKind::Column => {
                self.restore(gesture.snapshot);
                Err(EngineError::NotDraggable(event.source.id.clone()))
            }
        }
    }

    fn end_task_drag(
        &mut self,
        gesture: Gesture,
        target: &DragRef,
    ) -> Result<DragOutcome, EngineError> {
        let task_id = gesture.source.id.as_str();
        let before = &gesture.snapshot.ordering;

        if target.kind == DragKind::Task && before.locate(&target.id).is_none() {
            let missing = target.id.clone();
            warn!(
                task_id,
                target = %missing,
                scope = %self.scope,
                "drop target is not in this view"
            );
            self.restore(gesture.snapshot);
            return Err(EngineError::UnknownTask(missing));
        }

        // Dropping onto itself keeps wherever the preview left it.
        let mut after = if target.kind == DragKind::Task && target.id == task_id {
            self.ordering.clone()
        } else {
            self.scope
                .drop_target(target)
                .and_then(|drop| before.move_within(task_id, &drop))
                .unwrap_or_else(|| before.clone())
        };

        let updates = plan_task_updates(before, &after, task_id);
        if updates.is_empty() {
            debug!(task_id, "drop left task in place");
            self.restore(gesture.snapshot);
            return Ok(DragOutcome::Unchanged);
        }

        apply_task_updates(&mut after, &updates);
        self.ordering = after;
        info!(task_id, updates = updates.len(), "task drop planned");
        self.phase = Phase::Committing(gesture);
        Ok(DragOutcome::Commit(CommitPlan::Tasks(updates)))
    }

    fn end_category_drag(&mut self, gesture: Gesture, target: &DragRef) -> DragOutcome {
        let planned = match target.kind {
            DragKind::Category => plan_category_reorder(
                &gesture.snapshot.categories,
                &gesture.source.id,
                &target.id,
            ),
            _ => None,
        };

        let Some((reordered, updates)) = planned.filter(|(_, updates)| !updates.is_empty()) else {
            debug!(category_id = %gesture.source.id, "category drop left order unchanged");
            self.restore(gesture.snapshot);
            return DragOutcome::Unchanged;
        };

        self.categories = Arc::new(reordered);
        info!(
            category_id = %gesture.source.id,
            updates = updates.len(),
            "category drop planned"
        );
        self.phase = Phase::Committing(gesture);
        DragOutcome::Commit(CommitPlan::Categories(updates))
    }

    /// Resolves the pending commit with the dispatch results.
    pub fn finish_commit(&mut self, report: &CommitReport) -> Result<CommitResolution, EngineError> {
        let Phase::Committing(gesture) = std::mem::take(&mut self.phase) else {
            return Err(EngineError::NoPendingCommit);
        };

        if report.is_total_failure() {
            error!(
                source = %gesture.source.id,
                summary = %report.failure_summary().unwrap_or_default(),
                "commit failed, restoring pre-drag state"
            );
            self.restore(gesture.snapshot);
            return Ok(CommitResolution::RolledBack);
        }

        self.merge(report);

        if report.is_success() {
            debug!(source = %gesture.source.id, "commit confirmed");
            return Ok(CommitResolution::Confirmed);
        }

        error!(
            source = %gesture.source.id,
            summary = %report.failure_summary().unwrap_or_default(),
            "commit partially applied, view marked stale"
        );
        self.stale = true;
        Ok(CommitResolution::PartiallyApplied)
    }

    /// Takes server copies of updated entities without moving them.
    fn merge(&mut self, report: &CommitReport) {
        for task in &report.updated_tasks {
            if !self.ordering.replace_task(task.clone()) {
                warn!(task_id = %task.id, "server returned a task outside this view");
            }
        }
        if report.updated_categories.is_empty() {
            return;
        }
        let categories = Arc::make_mut(&mut self.categories);
        for updated in &report.updated_categories {
            if let Some(existing) = categories.iter_mut().find(|c| c.id == updated.id) {
                *existing = updated.clone();
            }
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.ordering = snapshot.ordering;
        self.categories = snapshot.categories;
        self.phase = Phase::Idle;
    }

    fn active_gesture(&self, source: &DragRef) -> Result<&Gesture, EngineError> {
        match &self.phase {
            Phase::Dragging(gesture) if gesture.source == *source => Ok(gesture),
            Phase::Dragging(gesture) => Err(EngineError::SourceMismatch {
                expected: gesture.source.id.clone(),
                actual: source.id.clone(),
            }),
            _ => Err(EngineError::NotDragging),
        }
    }
}
