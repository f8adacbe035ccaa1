use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;

use crate::types::{Task, TaskStatus};

/// Done tasks untouched for longer than this many days leave the active views.
pub const ARCHIVE_AFTER_DAYS: i64 = 7;

pub fn is_archivable(task: &Task, now: DateTime<Utc>) -> bool {
    task.status == TaskStatus::Done && now - task.updated_at > Duration::days(ARCHIVE_AFTER_DAYS)
}

/// Splits tasks into `(active, archived)`, preserving input order.
pub fn partition_archived<I>(tasks: I, now: DateTime<Utc>) -> (Vec<Task>, Vec<Task>)
where
    I: IntoIterator<Item = Task>,
{
    tasks
        .into_iter()
        .partition(|task| !is_archivable(task, now))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveMonth {
    pub year: i32,
    pub month: u32,
    pub label: String,
    pub tasks: Vec<Task>,
}

/// Groups tasks by the calendar month of `updated_at`, newest month first and
/// newest task first within a month.
pub fn group_by_month(tasks: &[Task]) -> Vec<ArchiveMonth> {
    let mut sorted: Vec<&Task> = tasks.iter().collect();
    sorted.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));

    let mut months: Vec<ArchiveMonth> = Vec::new();
    for task in sorted {
        let (year, month) = (task.updated_at.year(), task.updated_at.month());
        match months.last_mut() {
            Some(current) if current.year == year && current.month == month => {
                current.tasks.push(task.clone());
            }
            _ => months.push(ArchiveMonth {
                year,
                month,
                label: task.updated_at.format("%B %Y").to_string(),
                tasks: vec![task.clone()],
            }),
        }
    }
    months
}
