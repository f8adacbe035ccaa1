//! Keyboard moves, expressed as one-step gestures through the engine.

use std::fmt;
use std::str::FromStr;

use super::{DragEngine, DragEvent, DragOutcome, DragRef};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        };
        f.write_str(name)
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "k" => Ok(Direction::Up),
            "down" | "j" => Ok(Direction::Down),
            "left" | "h" => Ok(Direction::Left),
            "right" | "l" => Ok(Direction::Right),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

impl DragEngine {
    /// The drop that moves `task_id` one step, or `None` at an edge.
    ///
    /// Up and Down drop onto the neighbouring task. Left and Right drop onto
    /// the first task of the adjacent bucket, or onto its container when it
    /// is empty, so the task lands at the top.
    pub fn nudge_event(
        &self,
        task_id: &str,
        direction: Direction,
    ) -> Result<Option<DragEvent>, EngineError> {
        let (key, index) = self
            .ordering
            .locate(task_id)
            .ok_or_else(|| EngineError::UnknownTask(task_id.to_string()))?;
        let bucket = self.ordering.bucket(key);
        let source = DragRef::task(task_id);

        let target = match direction {
            Direction::Up => index
                .checked_sub(1)
                .and_then(|above| bucket.get(above))
                .map(|neighbour| DragRef::task(neighbour.id.clone())),
            Direction::Down => bucket
                .get(index + 1)
                .map(|neighbour| DragRef::task(neighbour.id.clone())),
            Direction::Left | Direction::Right => {
                let declared = self.scope.declared_buckets(&self.categories);
                let Some(current) = declared.iter().position(|candidate| candidate == key) else {
                    return Ok(None);
                };
                let adjacent = match direction {
                    Direction::Left => current.checked_sub(1),
                    _ => Some(current + 1),
                };
                adjacent.and_then(|i| declared.get(i)).map(|next| {
                    match self.ordering.bucket(next).first() {
                        Some(first) => DragRef::task(first.id.clone()),
                        None => DragRef::container(self.scope, next),
                    }
                })
            }
        };

        Ok(target.map(|target| DragEvent::drop_on(source, target)))
    }

    /// Runs a nudge as start, over and end. At an edge nothing happens.
    pub fn nudge(&mut self, task_id: &str, direction: Direction) -> Result<DragOutcome, EngineError> {
        let Some(event) = self.nudge_event(task_id, direction)? else {
            return Ok(DragOutcome::Unchanged);
        };
        self.on_drag_start(event.source.clone())?;
        self.on_drag_over(&event)?;
        self.on_drag_end(&event)
    }
}
