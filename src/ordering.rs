//! Local ordering state: tasks grouped into ordered buckets.
//!
//! Buckets are held behind `Arc` so cloning the whole state (for a drag
//! snapshot) only clones pointers; a bucket is copied the first time it is
//! mutated afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::types::{Task, TaskStatus, UpdateTaskRequest};

/// Container id of the backlog bucket holding tasks without a category.
pub const UNCATEGORIZED: &str = "uncategorized";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum BucketKey {
    Status(TaskStatus),
    Category(Option<String>),
}

impl BucketKey {
    pub fn uncategorized() -> Self {
        BucketKey::Category(None)
    }

    pub fn category(id: impl Into<String>) -> Self {
        BucketKey::Category(Some(id.into()))
    }

    /// The id a view uses for this bucket's drop container.
    pub fn container_id(&self) -> &str {
        match self {
            BucketKey::Status(status) => status.as_str(),
            BucketKey::Category(Some(id)) => id,
            BucketKey::Category(None) => UNCATEGORIZED,
        }
    }

    /// Sets the field that places a task in this bucket.
    pub fn assign_membership(&self, patch: &mut UpdateTaskRequest) {
        match self {
            BucketKey::Status(status) => patch.status = Some(*status),
            BucketKey::Category(category) => patch.backlog_category_id = Some(category.clone()),
        }
    }
}

/// Where a dragged task is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropTarget {
    /// Onto another task: the dragged task takes that task's index.
    Task(String),
    /// Onto a bucket's empty area: the dragged task is appended.
    Bucket(BucketKey),
}

/// A resolved relocation. `to_index` is the dragged task's final index in the
/// destination bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub task_id: String,
    pub from: BucketKey,
    pub from_index: usize,
    pub to: BucketKey,
    pub to_index: usize,
}

impl Move {
    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.from_index == self.to_index
    }

    pub fn crosses_buckets(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderingState {
    buckets: BTreeMap<BucketKey, Arc<Vec<Task>>>,
}

impl OrderingState {
    /// Groups `tasks` by `key_fn` and sorts each bucket by position. Ties are
    /// broken by creation time, then id, so the result never depends on input
    /// order.
    pub fn rebuild<I, F>(tasks: I, key_fn: F) -> Self
    where
        I: IntoIterator<Item = Task>,
        F: Fn(&Task) -> BucketKey,
    {
        let mut grouped: BTreeMap<BucketKey, Vec<Task>> = BTreeMap::new();
        for task in tasks {
            grouped.entry(key_fn(&task)).or_default().push(task);
        }

        let buckets = grouped
            .into_iter()
            .map(|(key, mut tasks)| {
                tasks.sort_by(|a, b| {
                    a.position
                        .cmp(&b.position)
                        .then_with(|| a.created_at.cmp(&b.created_at))
                        .then_with(|| a.id.cmp(&b.id))
                });
                (key, Arc::new(tasks))
            })
            .collect();

        Self { buckets }
    }

    /// Ensures the given buckets exist, empty if nothing was grouped into them.
    pub fn with_buckets<I: IntoIterator<Item = BucketKey>>(mut self, keys: I) -> Self {
        for key in keys {
            self.buckets.entry(key).or_default();
        }
        self
    }

    pub fn bucket(&self, key: &BucketKey) -> &[Task] {
        self.buckets
            .get(key)
            .map(|tasks| tasks.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains_bucket(&self, key: &BucketKey) -> bool {
        self.buckets.contains_key(key)
    }

    pub fn buckets(&self) -> impl Iterator<Item = (&BucketKey, &[Task])> {
        self.buckets
            .iter()
            .map(|(key, tasks)| (key, tasks.as_slice()))
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.buckets.values().flat_map(|tasks| tasks.iter())
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(|tasks| tasks.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn locate(&self, task_id: &str) -> Option<(&BucketKey, usize)> {
        self.buckets.iter().find_map(|(key, tasks)| {
            tasks
                .iter()
                .position(|task| task.id == task_id)
                .map(|index| (key, index))
        })
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks().find(|task| task.id == task_id)
    }

    /// Works out where `task_id` would end up if released on `target`.
    /// Returns `None` when the task or target is unknown, or the task is
    /// dropped onto itself.
    pub fn resolve_move(&self, task_id: &str, target: &DropTarget) -> Option<Move> {
        let (from, from_index) = self.locate(task_id)?;

        let (to, to_index) = match target {
            DropTarget::Task(target_id) if target_id == task_id => return None,
            DropTarget::Task(target_id) => {
                let (key, index) = self.locate(target_id)?;
                (key.clone(), index)
            }
            DropTarget::Bucket(key) => {
                if !self.contains_bucket(key) {
                    return None;
                }
                let len = self.bucket(key).len();
                let end = if key == from { len - 1 } else { len };
                (key.clone(), end)
            }
        };

        Some(Move {
            task_id: task_id.to_string(),
            from: from.clone(),
            from_index,
            to,
            to_index,
        })
    }

    /// Pure form of [`apply_move`](Self::apply_move): the state after
    /// releasing `task_id` on `target`, or `None` if nothing would move.
    pub fn move_within(&self, task_id: &str, target: &DropTarget) -> Option<Self> {
        let mv = self.resolve_move(task_id, target)?;
        if mv.is_noop() {
            return None;
        }
        let mut next = self.clone();
        next.apply_move(&mv).then_some(next)
    }

    /// Moves array entries only; `position` and bucket fields are untouched.
    pub fn apply_move(&mut self, mv: &Move) -> bool {
        let Some(source) = self.buckets.get_mut(&mv.from) else {
            return false;
        };
        if source.get(mv.from_index).map(|task| task.id.as_str()) != Some(mv.task_id.as_str()) {
            return false;
        }
        let task = Arc::make_mut(source).remove(mv.from_index);

        let destination = Arc::make_mut(self.buckets.entry(mv.to.clone()).or_default());
        let index = mv.to_index.min(destination.len());
        destination.insert(index, task);
        true
    }

    /// Edits one task in place, copying only its bucket.
    pub fn update_task<F: FnOnce(&mut Task)>(&mut self, task_id: &str, edit: F) -> bool {
        let Some((key, index)) = self
            .locate(task_id)
            .map(|(key, index)| (key.clone(), index))
        else {
            return false;
        };
        let Some(bucket) = self.buckets.get_mut(&key) else {
            return false;
        };
        edit(&mut Arc::make_mut(bucket)[index]);
        true
    }

    /// Swaps in a fresh copy of a task (e.g. the server's response) without
    /// changing where it sits.
    pub fn replace_task(&mut self, task: Task) -> bool {
        let id = task.id.clone();
        self.update_task(&id, move |existing| *existing = task)
    }
}
