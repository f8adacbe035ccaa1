//! Text renderings of the board, backlog, archive and plain lists.

use std::collections::HashMap;

use crate::archive::ArchiveMonth;
use crate::engine::DragEngine;
use crate::ordering::BucketKey;
use crate::types::{BacklogCategory, Board, Task};

const TITLE_WIDTH: usize = 32;

pub fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn one_line(text: &str) -> String {
    text.replace(['\n', '\r'], " ")
}

fn truncate(text: &str, max: usize) -> String {
    let text = one_line(text);
    if text.chars().count() <= max {
        return text;
    }
    let mut cut: String = text.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

fn bucket_label(key: &BucketKey, categories: &[BacklogCategory]) -> String {
    match key {
        BucketKey::Status(status) => status.label().to_string(),
        BucketKey::Category(Some(id)) => categories
            .iter()
            .find(|category| &category.id == id)
            .map(|category| category.name.clone())
            .unwrap_or_else(|| id.clone()),
        BucketKey::Category(None) => "Uncategorized".to_string(),
    }
}

/// Status columns side by side; row `n` holds the `n`th task of each column.
pub fn render_board(board: &Board, engine: &DragEngine) -> String {
    let columns = engine.columns();
    let headers: Vec<String> = columns
        .iter()
        .map(|(key, tasks)| {
            format!("{} ({})", bucket_label(key, engine.categories()), tasks.len())
        })
        .collect();
    let depth = columns.iter().map(|(_, tasks)| tasks.len()).max().unwrap_or(0);

    let rows: Vec<Vec<String>> = (0..depth)
        .map(|index| {
            columns
                .iter()
                .map(|(_, tasks)| {
                    tasks
                        .get(index)
                        .map(|task| {
                            format!("{} {}", short_id(&task.id), truncate(&task.title, TITLE_WIDTH))
                        })
                        .unwrap_or_default()
                })
                .collect()
        })
        .collect();

    let header_refs: Vec<&str> = headers.iter().map(String::as_str).collect();
    let mut out = format!("{}\n", board.name);
    if engine.is_stale() {
        out.push_str("(out of sync with the server; reload to refresh)\n");
    }
    out.push_str(&render_text_table(&header_refs, &rows));
    out
}

/// One section per category in display order, uncategorized last.
pub fn render_backlog(board: &Board, engine: &DragEngine) -> String {
    let mut sections = vec![format!("{} backlog", board.name)];
    for (key, tasks) in engine.columns() {
        let label = bucket_label(&key, engine.categories());
        let mut section = format!("\n{label} ({})\n", tasks.len());
        if tasks.is_empty() {
            section.push_str("  (empty)");
        } else {
            section.push_str(&render_task_rows(tasks));
        }
        sections.push(section);
    }
    sections.join("\n")
}

pub fn render_archive(months: &[ArchiveMonth]) -> String {
    if months.is_empty() {
        return "No archived tasks.".to_string();
    }
    months
        .iter()
        .map(|month| {
            let headers = ["ID", "Updated", "Title"];
            let rows: Vec<Vec<String>> = month
                .tasks
                .iter()
                .map(|task| {
                    vec![
                        short_id(&task.id),
                        task.updated_at.format("%Y-%m-%d").to_string(),
                        one_line(&task.title),
                    ]
                })
                .collect();
            format!("{}\n{}", month.label, render_text_table(&headers, &rows))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_task_rows(tasks: &[Task]) -> String {
    let headers = ["ID", "Pos", "Title", "Tags"];
    let rows: Vec<Vec<String>> = tasks
        .iter()
        .map(|task| {
            vec![
                short_id(&task.id),
                task.position.to_string(),
                one_line(&task.title),
                task.tags.join(", "),
            ]
        })
        .collect();
    render_text_table(&headers, &rows)
}

/// Flat list of tasks, optionally naming their board.
pub fn render_task_list(tasks: &[Task], boards: &HashMap<String, String>) -> String {
    if tasks.is_empty() {
        return "No tasks found.".to_string();
    }
    let with_board = !boards.is_empty();
    let mut headers = vec!["ID", "Status", "Pos", "Title", "Tags"];
    if with_board {
        headers.insert(1, "Board");
    }
    let rows: Vec<Vec<String>> = tasks
        .iter()
        .map(|task| {
            let mut row = vec![
                short_id(&task.id),
                task.status.as_str().to_string(),
                task.position.to_string(),
                one_line(&task.title),
                task.tags.join(", "),
            ];
            if with_board {
                let board = boards
                    .get(&task.board_id)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                row.insert(1, board);
            }
            row
        })
        .collect();
    render_text_table(&headers, &rows)
}

pub fn render_task_detail(task: &Task, category: Option<&BacklogCategory>) -> String {
    let mut lines = vec![
        format!("{}  {}", task.id, task.title),
        format!("status:   {}", task.status.label()),
        format!("position: {}", task.position),
    ];
    if let Some(category) = category {
        lines.push(format!("category: {}", category.name));
    }
    if !task.tags.is_empty() {
        lines.push(format!("tags:     {}", task.tags.join(", ")));
    }
    lines.push(format!("updated:  {}", task.updated_at.to_rfc3339()));
    if let Some(description) = task.description.as_deref().filter(|d| !d.trim().is_empty()) {
        lines.push(String::new());
        lines.push(description.to_string());
    }
    lines.join("\n")
}

pub fn render_category_list(
    categories: &[BacklogCategory],
    counts: &HashMap<String, usize>,
) -> String {
    if categories.is_empty() {
        return "No categories found.".to_string();
    }
    let headers = ["ID", "Pos", "Name", "Tasks"];
    let rows: Vec<Vec<String>> = categories
        .iter()
        .map(|category| {
            vec![
                short_id(&category.id),
                category.position.to_string(),
                one_line(&category.name),
                counts.get(&category.id).copied().unwrap_or(0).to_string(),
            ]
        })
        .collect();
    render_text_table(&headers, &rows)
}

pub fn render_board_list(boards: &[Board]) -> String {
    if boards.is_empty() {
        return "No boards found.".to_string();
    }
    let headers = ["ID", "Name", "Description"];
    let rows: Vec<Vec<String>> = boards
        .iter()
        .map(|board| {
            vec![
                short_id(&board.id),
                one_line(&board.name),
                board
                    .description
                    .as_deref()
                    .map(|text| truncate(text, 48))
                    .unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    render_text_table(&headers, &rows)
}

pub fn render_text_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths = headers
        .iter()
        .map(|header| header.chars().count())
        .collect::<Vec<_>>();

    for row in rows {
        for (index, cell) in row.iter().enumerate() {
            let width = cell.chars().count();
            if width > widths[index] {
                widths[index] = width;
            }
        }
    }

    let border = format!(
        "+{}+",
        widths
            .iter()
            .map(|width| "-".repeat(*width + 2))
            .collect::<Vec<_>>()
            .join("+")
    );

    let mut lines = vec![border.clone(), format_row(headers, &widths), border.clone()];
    for row in rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        lines.push(format_row(&cells, &widths));
    }
    lines.push(border);
    lines.join("\n")
}

fn format_row(cells: &[&str], widths: &[usize]) -> String {
    format!(
        "| {} |",
        cells
            .iter()
            .enumerate()
            .map(|(index, cell)| format!("{cell:<width$}", width = widths[index]))
            .collect::<Vec<_>>()
            .join(" | ")
    )
}
