//! Search box parsing: `Board:`, `Tag:` and `Status:` chips plus free text.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::types::{Board, Task, TaskStatus};

static CHIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i:(board|tag|status)):(.+)$").expect("valid search chip regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChipKind {
    Board,
    Tag,
    Status,
}

impl ChipKind {
    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "board" => Some(ChipKind::Board),
            "tag" => Some(ChipKind::Tag),
            "status" => Some(ChipKind::Status),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ChipKind::Board => "Board",
            ChipKind::Tag => "Tag",
            ChipKind::Status => "Status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chip {
    pub kind: ChipKind,
    pub value: String,
}

impl Chip {
    pub fn new(kind: ChipKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.label(), self.value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedQuery {
    pub free_text: String,
    pub chips: Vec<Chip>,
}

/// Splits `input` on whitespace. Tokens of the form `keyword:value` become
/// chips (keyword case-insensitive, value kept as typed); everything else is
/// free text joined by single spaces. Chips are ordered Board, Tag, Status
/// and keep input order within a kind.
pub fn parse_search_query(input: &str) -> ParsedQuery {
    let mut chips = Vec::new();
    let mut words = Vec::new();

    for token in input.split_whitespace() {
        let chip = CHIP_RE.captures(token).and_then(|captures| {
            let kind = ChipKind::from_keyword(captures.get(1)?.as_str())?;
            Some(Chip::new(kind, captures.get(2)?.as_str()))
        });
        match chip {
            Some(chip) => chips.push(chip),
            None => words.push(token),
        }
    }

    // Stable sort keeps input order within each kind.
    chips.sort_by_key(|chip| chip.kind);

    ParsedQuery {
        free_text: words.join(" "),
        chips,
    }
}

/// Filters sent to the search endpoint and applied to its results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Tag chips merge into one list; for Board and Status the last chip wins.
pub fn to_search_query(parsed: &ParsedQuery) -> SearchQuery {
    let mut query = SearchQuery {
        text: parsed.free_text.clone(),
        ..SearchQuery::default()
    };
    for chip in &parsed.chips {
        match chip.kind {
            ChipKind::Board => query.board = Some(chip.value.clone()),
            ChipKind::Tag => query
                .tags
                .get_or_insert_with(Vec::new)
                .push(chip.value.clone()),
            ChipKind::Status => query.status = Some(chip.value.clone()),
        }
    }
    query
}

impl SearchQuery {
    pub fn has_filters(&self) -> bool {
        self.board.is_some() || self.tags.is_some() || self.status.is_some()
    }

    /// Applies the chip filters to one task. Free text is left to the
    /// backend.
    pub fn matches(&self, task: &Task, board: Option<&Board>) -> bool {
        if let Some(wanted) = &self.board {
            let hit = board.is_some_and(|board| {
                board.id == *wanted || board.name.eq_ignore_ascii_case(wanted)
            });
            if !hit {
                return false;
            }
        }

        if let Some(tags) = &self.tags {
            let all_present = tags.iter().all(|wanted| {
                task.tags
                    .iter()
                    .any(|tag| tag.to_lowercase() == wanted.to_lowercase())
            });
            if !all_present {
                return false;
            }
        }

        if let Some(status) = &self.status {
            match TaskStatus::parse_loose(status) {
                Some(status) if status == task.status => {}
                _ => return false,
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordering::test_support::task;

    #[test]
    fn test_parse_chips_and_free_text() {
        let parsed = parse_search_query("Board:Alpha Tag:x Tag:y critical");
        assert_eq!(parsed.free_text, "critical");
        let chips: Vec<String> = parsed.chips.iter().map(Chip::to_string).collect();
        assert_eq!(chips, vec!["Board:Alpha", "Tag:x", "Tag:y"]);

        let query = to_search_query(&parsed);
        assert_eq!(query.text, "critical");
        assert_eq!(query.board.as_deref(), Some("Alpha"));
        assert_eq!(query.tags, Some(vec!["x".to_string(), "y".to_string()]));
        assert_eq!(query.status, None);
    }

    #[test]
    fn test_chips_are_ordered_by_kind() {
        let parsed = parse_search_query("status:DONE fix tag:ui  login   BOARD:Web tag:auth");
        assert_eq!(parsed.free_text, "fix login");
        assert_eq!(
            parsed.chips,
            vec![
                Chip::new(ChipKind::Board, "Web"),
                Chip::new(ChipKind::Tag, "ui"),
                Chip::new(ChipKind::Tag, "auth"),
                Chip::new(ChipKind::Status, "DONE"),
            ]
        );
    }

    #[test]
    fn test_incomplete_or_unknown_chips_stay_text() {
        let parsed = parse_search_query("  Tag: owner:me  plain ");
        assert!(parsed.chips.is_empty());
        assert_eq!(parsed.free_text, "Tag: owner:me plain");
        assert_eq!(parse_search_query("").free_text, "");
    }

    #[test]
    fn test_matches_applies_all_filters() {
        let board = Board {
            id: "board-1".to_string(),
            name: "Alpha".to_string(),
            description: None,
        };
        let mut candidate = task("t", TaskStatus::InProgress, 0);
        candidate.tags = vec!["UI".to_string(), "auth".to_string()];

        let query = to_search_query(&parse_search_query(
            "board:alpha tag:ui status:in_progress",
        ));
        assert!(query.has_filters());
        assert!(query.matches(&candidate, Some(&board)));
        assert!(!query.matches(&candidate, None));

        let wrong_status = to_search_query(&parse_search_query("status:done"));
        assert!(!wrong_status.matches(&candidate, Some(&board)));

        let missing_tag = to_search_query(&parse_search_query("tag:ui tag:db"));
        assert!(!missing_tag.matches(&candidate, Some(&board)));

        let text_only = to_search_query(&parse_search_query("anything"));
        assert!(!text_only.has_filters());
        assert!(text_only.matches(&candidate, None));
    }
}
