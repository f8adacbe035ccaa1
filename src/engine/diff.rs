//! Turning a finished gesture into the smallest set of per-entity writes.

use serde::Serialize;

use crate::ordering::OrderingState;
use crate::types::{BacklogCategory, UpdateTaskRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskUpdate {
    pub task_id: String,
    pub patch: UpdateTaskRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryUpdate {
    pub category_id: String,
    pub position: i64,
}

/// Compares the dragged task's bucket and index before and after a gesture.
///
/// Nothing is emitted when the task ends where it started. Otherwise the
/// source bucket and (for cross-bucket moves) the destination bucket are
/// reindexed from 0, and an update is emitted for each task whose stored
/// position differs from its new index. Only the dragged task's update carries
/// a bucket field, and only when it changed buckets. Source-bucket updates come
/// first.
pub fn plan_task_updates(
    before: &OrderingState,
    after: &OrderingState,
    task_id: &str,
) -> Vec<TaskUpdate> {
    let (Some((from, from_index)), Some((to, to_index))) =
        (before.locate(task_id), after.locate(task_id))
    else {
        return Vec::new();
    };

    if from == to && from_index == to_index {
        return Vec::new();
    }

    let crossed = from != to;
    let touched = if crossed { vec![from, to] } else { vec![from] };

    let mut updates = Vec::new();
    for key in touched {
        for (index, task) in after.bucket(key).iter().enumerate() {
            let position = index as i64;
            let moved_here = crossed && task.id == task_id;
            if task.position == position && !moved_here {
                continue;
            }

            let mut patch = UpdateTaskRequest::position(position);
            if moved_here {
                key.assign_membership(&mut patch);
            }
            updates.push(TaskUpdate {
                task_id: task.id.clone(),
                patch,
            });
        }
    }

    updates
}

/// Writes planned fields into the local copies so the optimistic view matches
/// what the server is being told.
pub fn apply_task_updates(ordering: &mut OrderingState, updates: &[TaskUpdate]) {
    for update in updates {
        ordering.update_task(&update.task_id, |task| update.patch.apply_to(task));
    }
}

/// Moves `dragged_id` to `target_id`'s index in `categories` (ordered by
/// position), reindexes from 0 and lists the categories whose position changed.
/// Returns `None` when either id is unknown or they are the same.
pub fn plan_category_reorder(
    categories: &[BacklogCategory],
    dragged_id: &str,
    target_id: &str,
) -> Option<(Vec<BacklogCategory>, Vec<CategoryUpdate>)> {
    if dragged_id == target_id {
        return None;
    }
    let from = categories.iter().position(|category| category.id == dragged_id)?;
    let to = categories.iter().position(|category| category.id == target_id)?;

    let mut reordered = categories.to_vec();
    let moved = reordered.remove(from);
    reordered.insert(to, moved);

    let mut updates = Vec::new();
    for (index, category) in reordered.iter_mut().enumerate() {
        let position = index as i64;
        if category.position != position {
            category.position = position;
            updates.push(CategoryUpdate {
                category_id: category.id.clone(),
                position,
            });
        }
    }

    Some((reordered, updates))
}
