//! `ReplayContext`: the recorded run as an oracle for re-execution.
//!
//! Read-only on the underlying run. Each step has an independent cursor
//! advanced by [`ReplayContext::next_event`]; cross-step ordering is the
//! caller's responsibility.

use crate::model::{Event, Run, Step};

use super::{ArtifactKind, ReplayError};

/// Cursor-based accessor over a recorded run.
#[derive(Debug)]
pub struct ReplayContext<'run> {
    run: &'run Run,
    cursors: Vec<usize>,
}

impl<'run> ReplayContext<'run> {
    #[must_use]
    pub fn new(run: &'run Run) -> Self {
        Self {
            run,
            cursors: vec![0; run.steps.len()],
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    /// The step at the given position, if any.
    #[must_use]
    pub fn step(&self, step_idx: usize) -> Option<&'run Step> {
        self.run.steps.get(step_idx)
    }

    /// The first step with the given name, if any.
    #[must_use]
    pub fn step_by_name(&self, name: &str) -> Option<&'run Step> {
        self.run.steps.iter().find(|step| step.name == name)
    }

    /// The event at `(step_idx, event_idx)`, if any.
    #[must_use]
    pub fn event(&self, step_idx: usize, event_idx: usize) -> Option<&'run Event> {
        self.step(step_idx)?.events.get(event_idx)
    }

    /// All events of the given type within a step, in insertion order.
    #[must_use]
    pub fn events_by_type(&self, step_idx: usize, event_type: &'run str) -> Vec<&'run Event> {
        self.step(step_idx)
            .map(|step| step.events_of_type(event_type).collect())
            .unwrap_or_default()
    }

    /// The event at the step's cursor, without advancing it.
    #[must_use]
    pub fn peek_event(&self, step_idx: usize) -> Option<&'run Event> {
        let cursor = *self.cursors.get(step_idx)?;
        self.event(step_idx, cursor)
    }

    /// Return the event at the step's cursor and advance the cursor.
    ///
    /// # Errors
    ///
    /// - [`ReplayError::MissingArtifact`] if the step does not exist or its
    ///   cursor has run past the last event.
    /// - [`ReplayError::OutOfOrderEvent`] if `expected_type` is supplied and
    ///   does not match the event at the cursor. The cursor does not move.
    pub fn next_event(
        &mut self,
        step_idx: usize,
        expected_type: Option<&str>,
    ) -> Result<&'run Event, ReplayError> {
        let step = self.step(step_idx).ok_or_else(|| ReplayError::MissingArtifact {
            run_id: self.run.run_id.clone(),
            step_idx,
            event_idx: None,
            kind: ArtifactKind::Step,
        })?;

        let cursor = self.cursors[step_idx];
        let event = step
            .events
            .get(cursor)
            .ok_or_else(|| ReplayError::MissingArtifact {
                run_id: self.run.run_id.clone(),
                step_idx,
                event_idx: Some(cursor),
                kind: ArtifactKind::Event,
            })?;

        if let Some(expected) = expected_type {
            if event.event_type != expected {
                return Err(ReplayError::OutOfOrderEvent {
                    run_id: self.run.run_id.clone(),
                    step_idx,
                    expected_type: expected.to_string(),
                    actual_type: event.event_type.clone(),
                });
            }
        }

        self.cursors[step_idx] = cursor + 1;
        Ok(event)
    }

    /// Rewind one step's cursor, or every cursor when `step_idx` is `None`.
    pub fn reset_cursor(&mut self, step_idx: Option<usize>) {
        match step_idx {
            Some(idx) => {
                if let Some(cursor) = self.cursors.get_mut(idx) {
                    *cursor = 0;
                }
            }
            None => {
                for cursor in &mut self.cursors {
                    *cursor = 0;
                }
            }
        }
    }
}
