//! Debug phase of every session
//!
//! ```text
//! Connecting ──► Active ──► Paused ◄──► Stepping
//!      │            │          │            │
//!      └────────────┴────┬─────┴────────────┘
//!                        ▼
//!                      Ended
//! ```
//!
//! `Connecting` covers the start sequence (breakpoint replay) after `init`.
//! `Active` means running after the start sequence; `Stepping` means running
//! on behalf of a client continuation. `Ended` is terminal and is kept so a
//! late command can be told it addressed a stale session.

use std::collections::HashMap;
use std::fmt;

use dbgbridge_protocol::types::CallFrame;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{HandlerError, HandlerResult};
use crate::multiplexer::SessionId;

/// Debugger-level state of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugPhase {
    /// `init` received, start sequence in progress
    Connecting,
    /// Running after the start sequence
    Active,
    /// Running a client-requested continuation
    Stepping,
    /// Stopped at a break
    Paused,
    /// Gone
    Ended,
}

impl DebugPhase {
    /// Whether `next` may follow `self`
    pub fn can_become(self, next: DebugPhase) -> bool {
        match (self, next) {
            (Self::Ended, _) => false,
            (_, Self::Ended) => true,
            (Self::Connecting, Self::Active)
            | (Self::Active | Self::Stepping, Self::Paused)
            | (Self::Paused, Self::Stepping) => true,
            _ => false,
        }
    }

    /// Whether the engine is executing code
    pub fn is_running(self) -> bool {
        matches!(self, Self::Active | Self::Stepping)
    }

    /// Whether the engine answers commands right away
    pub fn accepts_commands(self) -> bool {
        matches!(self, Self::Connecting | Self::Paused)
    }
}

impl fmt::Display for DebugPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Active => "running",
            Self::Stepping => "stepping",
            Self::Paused => "paused",
            Self::Ended => "ended",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct SessionState {
    phase: DebugPhase,
    frames: Vec<CallFrame>,
}

#[derive(Debug, Default)]
struct TableInner {
    sessions: HashMap<SessionId, SessionState>,
    primary: Option<SessionId>,
    focused: Option<SessionId>,
}

/// Phases, the primary session and the focused session
#[derive(Debug, Default)]
pub struct SessionTable {
    inner: Mutex<TableInner>,
}

impl SessionTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a started session. Returns `true` if it became the primary.
    pub fn register(&self, session_id: &SessionId) -> bool {
        let mut inner = self.inner.lock();
        inner.sessions.insert(
            session_id.clone(),
            SessionState {
                phase: DebugPhase::Connecting,
                frames: Vec::new(),
            },
        );
        if inner.primary.is_none() {
            inner.primary = Some(session_id.clone());
            debug!(session = %session_id, "primary session registered");
            true
        } else {
            false
        }
    }

    /// Current phase, `None` for sessions never registered
    pub fn phase(&self, session_id: &SessionId) -> Option<DebugPhase> {
        self.inner.lock().sessions.get(session_id).map(|s| s.phase)
    }

    /// Move a session to `next` and return the phase it left
    ///
    /// # Errors
    ///
    /// [`HandlerError::StaleSession`] for ended sessions,
    /// [`HandlerError::InvalidState`] for transitions the phase does not allow.
    pub fn transition(&self, session_id: &SessionId, next: DebugPhase) -> HandlerResult<DebugPhase> {
        let mut inner = self.inner.lock();
        let state = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| unknown(session_id))?;
        let previous = state.phase;
        if previous == DebugPhase::Ended {
            return Err(HandlerError::StaleSession {
                session_id: session_id.clone(),
            });
        }
        if !previous.can_become(next) {
            return Err(HandlerError::invalid_state(format!(
                "session {session_id} is {previous}, cannot become {next}"
            )));
        }
        trace!(session = %session_id, from = %previous, to = %next, "phase transition");
        state.phase = next;
        if next != DebugPhase::Paused {
            state.frames.clear();
        }
        Ok(previous)
    }

    /// Fail unless the session is stopped at a break
    ///
    /// # Errors
    ///
    /// [`HandlerError::StaleSession`] or [`HandlerError::InvalidState`].
    pub fn require_paused(&self, session_id: &SessionId) -> HandlerResult<()> {
        match self.phase(session_id) {
            Some(DebugPhase::Paused) => Ok(()),
            Some(DebugPhase::Ended) => Err(HandlerError::StaleSession {
                session_id: session_id.clone(),
            }),
            Some(phase) => Err(HandlerError::invalid_state(format!(
                "session {session_id} is {phase}, not paused"
            ))),
            None => Err(unknown(session_id)),
        }
    }

    /// Mark a session ended. Returns `true` if it was the primary and had not
    /// ended before.
    pub fn end(&self, session_id: &SessionId) -> bool {
        let mut inner = self.inner.lock();
        let ended_now = match inner.sessions.get_mut(session_id) {
            Some(state) if state.phase != DebugPhase::Ended => {
                state.phase = DebugPhase::Ended;
                state.frames.clear();
                true
            }
            _ => false,
        };
        if inner.focused.as_ref() == Some(session_id) {
            inner.focused = None;
        }
        ended_now && inner.primary.as_ref() == Some(session_id)
    }

    /// End every session. Returns `true` if the primary was still live.
    pub fn end_all(&self) -> bool {
        let mut inner = self.inner.lock();
        let primary_live = inner
            .primary
            .as_ref()
            .and_then(|id| inner.sessions.get(id))
            .is_some_and(|s| s.phase != DebugPhase::Ended);
        for state in inner.sessions.values_mut() {
            state.phase = DebugPhase::Ended;
            state.frames.clear();
        }
        inner.focused = None;
        primary_live
    }

    /// Make `session_id` the target of session-less commands
    pub fn focus(&self, session_id: &SessionId) {
        self.inner.lock().focused = Some(session_id.clone());
    }

    /// Session addressed by commands that do not name one: the focused
    /// session while it is live, otherwise the primary
    ///
    /// # Errors
    ///
    /// [`HandlerError::NoSession`] before any engine started,
    /// [`HandlerError::StaleSession`] if the primary has ended.
    pub fn target(&self) -> HandlerResult<SessionId> {
        let inner = self.inner.lock();
        let live = |id: &SessionId| {
            inner
                .sessions
                .get(id)
                .is_some_and(|s| s.phase != DebugPhase::Ended)
        };
        if let Some(focused) = inner.focused.as_ref()
            && live(focused)
        {
            return Ok(focused.clone());
        }
        match inner.primary.as_ref() {
            None => Err(HandlerError::NoSession),
            Some(primary) if live(primary) => Ok(primary.clone()),
            Some(primary) => Err(HandlerError::StaleSession {
                session_id: primary.clone(),
            }),
        }
    }

    /// Sessions whose phase satisfies `filter`
    pub fn sessions_where(&self, filter: impl Fn(DebugPhase) -> bool) -> Vec<SessionId> {
        self.inner
            .lock()
            .sessions
            .iter()
            .filter(|(_, s)| filter(s.phase))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Cache the call frames of a paused session
    pub fn set_frames(&self, session_id: &SessionId, frames: Vec<CallFrame>) {
        if let Some(state) = self.inner.lock().sessions.get_mut(session_id)
            && state.phase == DebugPhase::Paused
        {
            state.frames = frames;
        }
    }

    /// Whether the last break of a still paused session reported a frame
    /// with this `callFrameId`
    pub fn has_frame(&self, session_id: &SessionId, call_frame_id: &str) -> bool {
        self.inner
            .lock()
            .sessions
            .get(session_id)
            .is_some_and(|s| s.frames.iter().any(|f| f.call_frame_id == call_frame_id))
    }
}

fn unknown(session_id: &SessionId) -> HandlerError {
    HandlerError::invalid_params(format!("Unknown session {session_id}"))
}

type EndCallback = Box<dyn FnOnce() + Send>;

enum NotifierState {
    Waiting(Vec<EndCallback>),
    Fired,
}

/// Fires registered callbacks once, when the primary session ends
pub struct SessionEndNotifier {
    state: Mutex<NotifierState>,
}

impl fmt::Debug for SessionEndNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEndNotifier")
            .field("fired", &self.has_fired())
            .finish()
    }
}

impl Default for SessionEndNotifier {
    fn default() -> Self {
        Self {
            state: Mutex::new(NotifierState::Waiting(Vec::new())),
        }
    }
}

impl SessionEndNotifier {
    /// Notifier that has not fired
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` when the primary session ends, or now if it already has
    pub fn register(&self, callback: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock();
        if let NotifierState::Waiting(callbacks) = &mut *state {
            callbacks.push(Box::new(callback));
            return;
        }
        drop(state);
        callback();
    }

    /// Fire all callbacks. Only the first call does anything.
    pub fn notify(&self) {
        let callbacks = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, NotifierState::Fired) {
                NotifierState::Waiting(callbacks) => callbacks,
                NotifierState::Fired => return,
            }
        };
        debug!(callbacks = callbacks.len(), "primary session ended");
        // outside the lock, a callback may register another one
        for callback in callbacks {
            callback();
        }
    }

    /// Whether [`SessionEndNotifier::notify`] has run
    pub fn has_fired(&self) -> bool {
        matches!(*self.state.lock(), NotifierState::Fired)
    }
}
