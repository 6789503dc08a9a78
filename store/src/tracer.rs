//! `Tracer`: explicit, boring run recording.
//!
//! No decorators, no magic, just append-only event logging through the
//! store. Step scopes nest: a step opened inside another records as a
//! sibling with the next index, and the outer step becomes active again
//! when the inner scope closes.

use forkline_core::model::Event;
use forkline_core::value::Value;
use uuid::Uuid;

use crate::store::{SqliteStore, StoreError};

/// Recording front-end over a [`SqliteStore`].
pub struct Tracer<'s> {
    store: &'s SqliteStore,
    run_id: String,
    next_step_idx: usize,
    active_step_idx: Option<usize>,
}

impl<'s> Tracer<'s> {
    /// Start recording a run. A fresh UUID is used when no id is supplied.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the run cannot be registered.
    pub fn begin(store: &'s SqliteStore, run_id: Option<String>) -> Result<Self, StoreError> {
        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        store.start_run(&run_id)?;
        Ok(Self {
            store,
            run_id,
            next_step_idx: 0,
            active_step_idx: None,
        })
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run `body` inside a named step scope.
    ///
    /// Allocates the next step index, opens the step, and ends it when the
    /// body returns, whether or not the body succeeded. The previously
    /// active step is restored afterwards, so scopes nest.
    ///
    /// # Errors
    ///
    /// Returns the body's error, or a [`StoreError`] from opening/closing
    /// the step.
    pub fn step<R>(
        &mut self,
        name: &str,
        body: impl FnOnce(&mut Self) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let idx = self.next_step_idx;
        self.next_step_idx += 1;
        self.store.start_step(&self.run_id, idx, name)?;

        let previous = self.active_step_idx.replace(idx);
        let result = body(self);
        self.active_step_idx = previous;

        self.store.end_step(&self.run_id, idx)?;
        result
    }

    /// Record an event on the active step.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoActiveStep`] outside a step scope, or a
    /// [`StoreError`] from the store.
    pub fn record_event(&mut self, event_type: &str, payload: &Value) -> Result<Event, StoreError> {
        let step_idx = self.active_step_idx.ok_or(StoreError::NoActiveStep)?;
        self.store
            .append_event(&self.run_id, step_idx, event_type, payload)
    }
}
