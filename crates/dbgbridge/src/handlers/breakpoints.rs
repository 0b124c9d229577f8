//! Client breakpoints and their per-session engine counterparts
//!
//! The table outlives sessions. Each session is brought in line with it by
//! [`BreakpointTable::sync`]: missing breakpoints are set, removed ones are
//! cleared, and the exception-pause setting is applied. A sync only runs
//! while the engine accepts commands (start sequence or paused), so changes
//! made while a session runs reach it at its next pause.

use std::collections::{BTreeMap, HashMap};

use dbgbridge_native::{NativeCommand, NativeError};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{HandlerError, HandlerResult};
use crate::multiplexer::{ConnectionMultiplexer, SessionId};

/// `Debugger.setPauseOnExceptions` state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionPause {
    /// Never pause on exceptions
    #[default]
    None,
    /// Pause on uncaught exceptions
    Uncaught,
    /// Pause on every exception
    All,
}

/// A client breakpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// Client-facing id
    pub id: String,
    /// File URL
    pub url: String,
    /// 0-based line
    pub line: u32,
    /// 0-based column, echoed back in locations
    pub column: Option<u32>,
    /// Condition expression
    pub condition: Option<String>,
}

#[derive(Debug)]
struct Entry {
    breakpoint: Breakpoint,
    native: HashMap<SessionId, String>,
}

#[derive(Debug, Default)]
struct Table {
    entries: BTreeMap<u64, Entry>,
    next_id: u64,
    // engine breakpoints whose client breakpoint is gone
    orphans: Vec<(SessionId, String)>,
    exceptions: ExceptionPause,
    exception_native: HashMap<SessionId, String>,
}

enum ExceptionAction {
    Set,
    Remove(String),
}

struct SyncPlan {
    remove: Vec<String>,
    set: Vec<(u64, Breakpoint)>,
    exception: Option<ExceptionAction>,
}

/// Breakpoint table shared by all sessions
#[derive(Debug, Default)]
pub struct BreakpointTable {
    inner: Mutex<Table>,
    // one sync at a time, so a breakpoint is never set twice in a session
    sync_lock: tokio::sync::Mutex<()>,
}

impl BreakpointTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a breakpoint and return its id
    pub fn add(
        &self,
        url: impl Into<String>,
        line: u32,
        column: Option<u32>,
        condition: Option<String>,
    ) -> Breakpoint {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let key = inner.next_id;
        let breakpoint = Breakpoint {
            id: key.to_string(),
            url: url.into(),
            line,
            column,
            condition: condition.filter(|c| !c.is_empty()),
        };
        inner.entries.insert(
            key,
            Entry {
                breakpoint: breakpoint.clone(),
                native: HashMap::new(),
            },
        );
        breakpoint
    }

    /// Remove a breakpoint; its engine counterparts are cleared on next sync
    ///
    /// # Errors
    ///
    /// [`HandlerError::InvalidParams`] for an unknown id.
    pub fn remove(&self, breakpoint_id: &str) -> HandlerResult<Breakpoint> {
        let unknown = || HandlerError::invalid_params(format!("Unknown breakpoint: {breakpoint_id}"));
        let key: u64 = breakpoint_id.parse().map_err(|_| unknown())?;
        let mut inner = self.inner.lock();
        let entry = inner.entries.remove(&key).ok_or_else(unknown)?;
        inner.orphans.extend(entry.native);
        Ok(entry.breakpoint)
    }

    /// Change the exception-pause setting
    pub fn set_exception_pause(&self, state: ExceptionPause) {
        self.inner.lock().exceptions = state;
    }

    /// Engine breakpoint id of `breakpoint_id` in `session_id`, if set there
    pub fn native_id(&self, breakpoint_id: &str, session_id: &SessionId) -> Option<String> {
        let key: u64 = breakpoint_id.parse().ok()?;
        self.inner
            .lock()
            .entries
            .get(&key)
            .and_then(|e| e.native.get(session_id).cloned())
    }

    /// Drop everything recorded for an ended session
    pub fn forget_session(&self, session_id: &SessionId) {
        let mut inner = self.inner.lock();
        for entry in inner.entries.values_mut() {
            entry.native.remove(session_id);
        }
        inner.orphans.retain(|(id, _)| id != session_id);
        inner.exception_native.remove(session_id);
    }

    /// Bring one session in line with the table. Returns the breakpoints
    /// newly set in the engine.
    ///
    /// # Errors
    ///
    /// Fails if the session is gone or the engine rejects a breakpoint.
    /// Breakpoints set before the failure stay recorded.
    pub async fn sync(
        &self,
        multiplexer: &ConnectionMultiplexer,
        session_id: &SessionId,
    ) -> HandlerResult<Vec<Breakpoint>> {
        let _serial = self.sync_lock.lock().await;
        let plan = self.plan(session_id);

        for native_id in plan.remove {
            let result = multiplexer
                .send(session_id, NativeCommand::breakpoint_remove(native_id.as_str()))
                .await?
                .into_result();
            if let Err(err) = result {
                // the engine may have dropped it already
                warn!(session = %session_id, native_id = %native_id, error = %err, "breakpoint removal failed");
            }
        }

        let mut added = Vec::with_capacity(plan.set.len());
        for (key, breakpoint) in plan.set {
            let command = NativeCommand::breakpoint_set_line(
                breakpoint.url.as_str(),
                breakpoint.line + 1,
                breakpoint.condition.as_deref(),
            );
            let response = multiplexer.send(session_id, command).await?.into_result()?;
            let native_id = response
                .attr("id")
                .ok_or_else(|| NativeError::decode_in("breakpoint_set response without id", "response"))?
                .to_string();
            debug!(session = %session_id, breakpoint = %breakpoint.id, native_id = %native_id, "breakpoint set");
            if self.record(key, session_id, native_id) {
                added.push(breakpoint);
            }
        }

        match plan.exception {
            Some(ExceptionAction::Set) => {
                let response = multiplexer
                    .send(session_id, NativeCommand::breakpoint_set_exception())
                    .await?
                    .into_result()?;
                if let Some(native_id) = response.attr("id") {
                    self.inner
                        .lock()
                        .exception_native
                        .insert(session_id.clone(), native_id.to_string());
                }
            }
            Some(ExceptionAction::Remove(native_id)) => {
                multiplexer
                    .send(session_id, NativeCommand::breakpoint_remove(native_id.as_str()))
                    .await?
                    .into_result()?;
            }
            None => {}
        }

        Ok(added)
    }

    fn plan(&self, session_id: &SessionId) -> SyncPlan {
        let mut inner = self.inner.lock();

        let (remove, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.orphans)
            .into_iter()
            .partition(|(id, _)| id == session_id);
        inner.orphans = keep;

        let set = inner
            .entries
            .iter()
            .filter(|(_, e)| !e.native.contains_key(session_id))
            .map(|(key, e)| (*key, e.breakpoint.clone()))
            .collect();

        let exception = match (inner.exceptions, inner.exception_native.contains_key(session_id)) {
            (ExceptionPause::None, true) => inner
                .exception_native
                .remove(session_id)
                .map(ExceptionAction::Remove),
            (ExceptionPause::Uncaught | ExceptionPause::All, false) => Some(ExceptionAction::Set),
            _ => None,
        };

        SyncPlan {
            remove: remove.into_iter().map(|(_, native_id)| native_id).collect(),
            set,
            exception,
        }
    }

    /// Returns `false` if the breakpoint was removed while being set; the
    /// engine breakpoint is then queued for removal.
    fn record(&self, key: u64, session_id: &SessionId, native_id: String) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(&key) {
            Some(entry) => {
                entry.native.insert(session_id.clone(), native_id);
                true
            }
            None => {
                inner.orphans.push((session_id.clone(), native_id));
                false
            }
        }
    }
}
