//! `Debugger` domain
//!
//! Owns everything that spans sessions: breakpoints, scripts and the
//! primary-session end notification. Session lifecycle events from the
//! multiplexer arrive through [`DebuggerHandler::on_session_event`].
//!
//! Continuations (`run`, `step_*`) only answer when the engine stops again,
//! so they run on their own task. The client gets `{}` right away and
//! `Debugger.paused` once the engine breaks.

use std::sync::Arc;

use async_trait::async_trait;
use dbgbridge_native::{EngineStatus, InitPacket, NativeCommand, NativeResponse};
use dbgbridge_protocol::types::{BreakpointResolved, CallFrame, Location, PausedEvent, RemoteObject, ScriptParsed};
use dbgbridge_protocol::{Domain, MessageId};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::breakpoints::{Breakpoint, BreakpointTable, ExceptionPause};
use super::remote_object::{FrameRef, LOCALS_CONTEXT, ObjectRef, evaluation_result, scope_chain};
use super::scripts::ScriptRegistry;
use super::session_table::{DebugPhase, SessionEndNotifier};
use super::{DomainHandler, HandlerContext, parse_params, to_result};
use crate::error::{HandlerError, HandlerResult};
use crate::multiplexer::{SessionEvent, SessionId};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetBreakpointByUrlParams {
    url: String,
    line_number: u32,
    #[serde(default)]
    column_number: Option<u32>,
    #[serde(default)]
    condition: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveBreakpointParams {
    breakpoint_id: String,
}

#[derive(Debug, Deserialize)]
struct SetPauseOnExceptionsParams {
    state: ExceptionPause,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateOnCallFrameParams {
    call_frame_id: String,
    expression: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetScriptSourceParams {
    script_id: String,
}

#[derive(Debug)]
struct DebuggerState {
    ctx: HandlerContext,
    breakpoints: BreakpointTable,
    scripts: ScriptRegistry,
    notifier: SessionEndNotifier,
}

/// Handler for the `Debugger` domain
#[derive(Debug, Clone)]
pub struct DebuggerHandler {
    state: Arc<DebuggerState>,
}

impl DebuggerHandler {
    /// Handler sharing `ctx` with the other domains
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            state: Arc::new(DebuggerState {
                ctx,
                breakpoints: BreakpointTable::new(),
                scripts: ScriptRegistry::new(),
                notifier: SessionEndNotifier::new(),
            }),
        }
    }

    /// React to a multiplexer lifecycle event
    pub fn on_session_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Started { session_id, init } => {
                Arc::clone(&self.state).on_started(session_id.clone(), init);
            }
            SessionEvent::Ended { session_id, reason } => {
                debug!(session = %session_id, reason = %reason, "session ended");
                self.state.on_ended(session_id);
            }
            SessionEvent::StatusChanged {
                session_id, status, ..
            } => debug!(session = %session_id, status = status.as_str(), "engine status"),
            SessionEvent::Stream { .. } => {}
        }
    }

    /// Run `callback` once the primary session ends
    pub fn on_session_end(&self, callback: impl FnOnce() + Send + 'static) {
        self.state.notifier.register(callback);
    }
}

#[async_trait]
impl DomainHandler for DebuggerHandler {
    fn domain(&self) -> Domain {
        Domain::Debugger
    }

    async fn handle_method(&self, id: MessageId, action: &str, params: Value) -> HandlerResult<Value> {
        let state = &self.state;
        debug!(%id, action, "Debugger command");
        match action {
            "enable" | "disable" | "setBreakpointsActive" | "setAsyncCallStackDepth"
            | "setSkipAllPauses" => Ok(json!({})),
            "pause" => state.pause().await,
            "resume" => state.continue_with(NativeCommand::run()),
            "stepOver" => state.continue_with(NativeCommand::step_over()),
            "stepInto" => state.continue_with(NativeCommand::step_into()),
            "stepOut" => state.continue_with(NativeCommand::step_out()),
            "setBreakpointByUrl" => state.set_breakpoint_by_url(parse_params(params)?).await,
            "removeBreakpoint" => state.remove_breakpoint(parse_params(params)?).await,
            "setPauseOnExceptions" => state.set_pause_on_exceptions(parse_params(params)?).await,
            "evaluateOnCallFrame" => state.evaluate_on_call_frame(parse_params(params)?).await,
            "getScriptSource" => state.get_script_source(parse_params(params)?).await,
            _ => Err(HandlerError::unknown_method(Domain::Debugger, action)),
        }
    }

    async fn dispose(&self) {
        if self.state.ctx.sessions.end_all() {
            self.state.notifier.notify();
        }
    }
}

impl DebuggerState {
    async fn pause(&self) -> HandlerResult<Value> {
        let session_id = self.ctx.sessions.target()?;
        match self.ctx.sessions.phase(&session_id) {
            Some(phase) if phase.is_running() => {}
            Some(phase) => {
                return Err(HandlerError::invalid_state(format!(
                    "cannot pause session {session_id}: {phase}"
                )));
            }
            None => return Err(HandlerError::NoSession),
        }
        // the running continuation reports the break
        self.ctx
            .multiplexer
            .send(&session_id, NativeCommand::pause())
            .await?
            .into_result()?;
        Ok(json!({}))
    }

    fn continue_with(self: &Arc<Self>, command: NativeCommand) -> HandlerResult<Value> {
        let session_id = self.ctx.sessions.target()?;
        self.ctx.sessions.transition(&session_id, DebugPhase::Stepping)?;
        debug!(session = %session_id, command = %command, "continuing");
        tokio::spawn(Arc::clone(self).run_continuation(session_id, command, true));
        Ok(json!({}))
    }

    async fn run_continuation(self: Arc<Self>, session_id: SessionId, command: NativeCommand, resumed: bool) {
        if resumed {
            self.ctx.emit(Domain::Debugger, "resumed", json!({}));
        }
        let response = match self
            .ctx
            .multiplexer
            .send_continuation(&session_id, command)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                debug!(session = %session_id, error = %err, "continuation ended without a response");
                return;
            }
        };

        match response.status {
            Some(EngineStatus::Break) => self.report_break(&session_id, &response).await,
            Some(status) if status.is_terminal() => {
                debug!(session = %session_id, status = status.as_str(), "engine finished");
            }
            _ if response.error.is_some() => {
                // the engine refused to continue and is still stopped
                warn!(session = %session_id, error = ?response.error, "continuation rejected");
                self.report_break(&session_id, &response).await;
            }
            status => warn!(session = %session_id, ?status, "unexpected continuation status"),
        }
    }

    async fn report_break(&self, session_id: &SessionId, response: &NativeResponse) {
        if let Err(err) = self.on_break(session_id, response).await {
            warn!(session = %session_id, error = %err, "failed to report break");
        }
    }

    async fn on_break(&self, session_id: &SessionId, response: &NativeResponse) -> HandlerResult<()> {
        self.ctx.sessions.transition(session_id, DebugPhase::Paused)?;
        self.ctx.sessions.focus(session_id);

        // changes made while the session was running
        if let Err(err) = self.sync_breakpoints(session_id, None).await {
            warn!(session = %session_id, error = %err, "breakpoint sync failed");
        }

        let stack = self
            .ctx
            .multiplexer
            .send(session_id, NativeCommand::stack_get())
            .await?
            .into_result()?;
        let call_frames = self.call_frames(session_id, &stack);
        self.ctx.sessions.set_frames(session_id, call_frames.clone());

        let (reason, data) = pause_reason(response);
        info!(session = %session_id, frames = call_frames.len(), reason, "paused");
        let paused = PausedEvent {
            call_frames,
            reason: reason.to_string(),
            data,
        };
        self.ctx.emit(Domain::Debugger, "paused", to_result(&paused)?);
        Ok(())
    }

    fn call_frames(&self, session_id: &SessionId, stack: &NativeResponse) -> Vec<CallFrame> {
        let mut levels: Vec<_> = stack.children_named("stack").collect();
        levels.sort_by_key(|frame| frame.attr_u32("level").unwrap_or(u32::MAX));

        levels
            .into_iter()
            .enumerate()
            .map(|(index, frame)| {
                let depth = frame.attr_u32("level").unwrap_or(index as u32);
                let url = frame.attr("filename").unwrap_or_default();
                let (script_id, first_seen) = self.scripts.announce(url);
                if first_seen {
                    self.emit_script_parsed(&script_id, url);
                }
                CallFrame {
                    call_frame_id: FrameRef {
                        session: session_id.clone(),
                        depth,
                    }
                    .encode(),
                    function_name: frame.attr("where").unwrap_or_default().to_string(),
                    location: Location {
                        script_id,
                        line_number: frame.attr_u32("lineno").unwrap_or(1).saturating_sub(1),
                        column_number: None,
                    },
                    scope_chain: scope_chain(session_id, depth),
                    this: RemoteObject::undefined(),
                }
            })
            .collect()
    }

    fn emit_script_parsed(&self, script_id: &str, url: &str) {
        match to_result(&ScriptParsed::new(script_id, url)) {
            Ok(params) => self.ctx.emit(Domain::Debugger, "scriptParsed", params),
            Err(err) => warn!(error = %err, "failed to encode scriptParsed"),
        }
    }

    /// Sync one session and announce breakpoints that just resolved there,
    /// except `requested`, which the caller reports in its reply
    async fn sync_breakpoints(
        &self,
        session_id: &SessionId,
        requested: Option<&str>,
    ) -> HandlerResult<Vec<Breakpoint>> {
        let added = self
            .breakpoints
            .sync(&self.ctx.multiplexer, session_id)
            .await?;
        for breakpoint in added.iter().filter(|b| Some(b.id.as_str()) != requested) {
            self.ctx.emit(
                Domain::Debugger,
                "breakpointResolved",
                json!({
                    "breakpointId": breakpoint.id,
                    "location": self.location(breakpoint),
                }),
            );
        }
        Ok(added)
    }

    /// Sync every session that accepts commands right now; the others catch
    /// up at their next pause
    async fn sync_reachable_sessions(&self, requested: Option<&str>) -> Vec<SessionId> {
        let mut synced = Vec::new();
        for session_id in self.ctx.sessions.sessions_where(DebugPhase::accepts_commands) {
            match self.sync_breakpoints(&session_id, requested).await {
                Ok(_) => synced.push(session_id),
                Err(err) => warn!(session = %session_id, error = %err, "breakpoint sync failed"),
            }
        }
        synced
    }

    fn location(&self, breakpoint: &Breakpoint) -> Location {
        Location {
            script_id: self.scripts.script_id(&breakpoint.url),
            line_number: breakpoint.line,
            column_number: breakpoint.column,
        }
    }

    async fn set_breakpoint_by_url(&self, params: SetBreakpointByUrlParams) -> HandlerResult<Value> {
        let breakpoint = self.breakpoints.add(
            params.url,
            params.line_number,
            params.column_number,
            params.condition,
        );
        debug!(breakpoint = %breakpoint.id, url = %breakpoint.url, line = breakpoint.line, "breakpoint added");

        let synced = self.sync_reachable_sessions(Some(breakpoint.id.as_str())).await;
        let resolved = synced
            .iter()
            .any(|session_id| self.breakpoints.native_id(&breakpoint.id, session_id).is_some());

        let locations = if resolved {
            vec![self.location(&breakpoint)]
        } else {
            Vec::new()
        };
        to_result(&BreakpointResolved {
            breakpoint_id: breakpoint.id,
            locations,
        })
    }

    async fn remove_breakpoint(&self, params: RemoveBreakpointParams) -> HandlerResult<Value> {
        let breakpoint = self.breakpoints.remove(&params.breakpoint_id)?;
        debug!(breakpoint = %breakpoint.id, "breakpoint removed");
        self.sync_reachable_sessions(None).await;
        Ok(json!({}))
    }

    async fn set_pause_on_exceptions(&self, params: SetPauseOnExceptionsParams) -> HandlerResult<Value> {
        self.breakpoints.set_exception_pause(params.state);
        self.sync_reachable_sessions(None).await;
        Ok(json!({}))
    }

    async fn evaluate_on_call_frame(&self, params: EvaluateOnCallFrameParams) -> HandlerResult<Value> {
        let frame = FrameRef::decode(&params.call_frame_id)?;
        self.ctx.sessions.require_paused(&frame.session)?;
        if !self.ctx.sessions.has_frame(&frame.session, &frame.encode()) {
            return Err(HandlerError::invalid_params(format!(
                "Unknown call frame: {}",
                params.call_frame_id
            )));
        }
        let response = self
            .ctx
            .multiplexer
            .send(&frame.session, NativeCommand::eval(params.expression))
            .await?;
        let parent = ObjectRef::scope(frame.session, frame.depth, LOCALS_CONTEXT);
        Ok(evaluation_result(&response, &parent))
    }

    async fn get_script_source(&self, params: GetScriptSourceParams) -> HandlerResult<Value> {
        let url = self.scripts.url(&params.script_id).ok_or_else(|| {
            HandlerError::invalid_params(format!("Unknown script: {}", params.script_id))
        })?;
        let session_id = self.ctx.sessions.target()?;
        let response = self
            .ctx
            .multiplexer
            .send(&session_id, NativeCommand::source(url))
            .await?
            .into_result()?;
        Ok(json!({ "scriptSource": response.decoded_text().unwrap_or_default() }))
    }

    fn on_started(self: Arc<Self>, session_id: SessionId, init: &InitPacket) {
        let primary = self.ctx.sessions.register(&session_id);
        info!(session = %session_id, fileuri = %init.fileuri, primary, "engine attached");
        tokio::spawn(async move {
            if let Err(err) = self.sync_breakpoints(&session_id, None).await {
                warn!(session = %session_id, error = %err, "breakpoint replay failed");
            }
            if let Err(err) = self.ctx.sessions.transition(&session_id, DebugPhase::Active) {
                debug!(session = %session_id, error = %err, "session ended during start");
                return;
            }
            let command = if self.ctx.config.break_on_entry {
                NativeCommand::step_into()
            } else {
                NativeCommand::run()
            };
            self.run_continuation(session_id, command, false).await;
        });
    }

    fn on_ended(&self, session_id: &SessionId) {
        if self.ctx.sessions.end(session_id) {
            self.notifier.notify();
        }
        self.breakpoints.forget_session(session_id);
    }
}

/// DevTools pause reason and extra data for a break response
fn pause_reason(response: &NativeResponse) -> (&'static str, Option<Value>) {
    match response.reason.as_deref() {
        Some("exception" | "error") => {
            let description = response
                .child("message")
                .and_then(|message| message.decoded_text())
                .or_else(|| response.error.as_ref().map(|e| e.message.clone()))
                .unwrap_or_default();
            ("exception", Some(json!({ "description": description })))
        }
        _ => ("other", None),
    }
}
