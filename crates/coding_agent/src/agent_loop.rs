//! Turn orchestration: one model request per turn, tool dispatch on
//! completion, and the next turn fed with the tool outputs.
//!
//! Every run is tagged with a generation. [`AgentLoop::cancel`] and a newer
//! [`AgentLoop::run`] advance the generation, after which staged deliveries
//! and stream handling belonging to the older run are dropped.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use agent_protocol::{
    ModelClient, ModelError, ModelErrorKind, ModelRequest, Reasoning, ResponseEvent, ResponseItem,
    ResponseStream, ToolSpec,
};
use futures_util::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::approval::{ConfirmationHandler, StaticConfirmation};
use crate::config::AgentConfig;
use crate::dispatch::{GenericToolHandler, ToolDispatcher, ToolResult};
use crate::error::AgentError;
use crate::events::{AgentEvent, EventSink};
use crate::exec::{ExecCollaborator, ExecContext};
use crate::instructions::{environment_context, merged_instructions};
use crate::lock_unpoisoned;
use crate::notices::Notice;
use crate::retry::{
    classify_request_error, classify_unhandled_error, exponential_delay, is_insufficient_quota,
    is_rate_limit_error, RequestErrorAction, MAX_RETRIES, MAX_STREAM_RETRIES,
};
use crate::staging::{DeliveryGate, StagingQueue};
use crate::text_tool_call::parse_text_tool_call;
use crate::tools::tools_for;
use crate::transcript::Transcript;

/// Tokens scoped to the current run. Both are children of the hard-abort
/// token, so `terminate` reaches them without a lock.
struct RunTokens {
    stream: CancellationToken,
    exec: CancellationToken,
}

/// Snapshot taken when a run starts.
struct RunContext {
    generation: u64,
    started: Instant,
    stream_token: CancellationToken,
}

/// Mutable state threaded through the turns of one run.
struct RunState {
    last_response_id: String,
    /// Transcript length before the items that are new this turn.
    prefix_len: usize,
    processed_calls: HashSet<String>,
}

impl RunState {
    /// Whether `item` has not been dispatched yet in this run. Items without
    /// an id are always dispatched.
    fn first_dispatch(&mut self, item: &ResponseItem) -> bool {
        match item.id() {
            Some(id) => self.processed_calls.insert(id.to_string()),
            None => true,
        }
    }
}

enum RunEnd {
    Completed,
    Interrupted,
    Notice(Notice),
}

enum StreamFailure {
    Model(ModelError),
    Agent(AgentError),
}

pub struct AgentLoop {
    config: AgentConfig,
    client: Arc<dyn ModelClient>,
    dispatcher: ToolDispatcher,
    confirm: Arc<dyn ConfirmationHandler>,
    sink: EventSink,
    session_id: String,
    environment: String,
    generation: Arc<AtomicU64>,
    canceled: Arc<AtomicBool>,
    terminated: AtomicBool,
    stop_after_current_turn: AtomicBool,
    hard_abort: CancellationToken,
    tokens: Mutex<RunTokens>,
    /// Call ids of tool calls seen but not yet answered, in arrival order.
    pending_aborts: Mutex<Vec<String>>,
    transcript: Arc<Mutex<Transcript>>,
}

impl AgentLoop {
    pub fn new(
        config: AgentConfig,
        client: Arc<dyn ModelClient>,
        exec: Arc<dyn ExecCollaborator>,
        sink: EventSink,
    ) -> Self {
        let hard_abort = CancellationToken::new();
        let tokens = RunTokens {
            stream: hard_abort.child_token(),
            exec: hard_abort.child_token(),
        };
        Self {
            config,
            client,
            dispatcher: ToolDispatcher::new(exec),
            confirm: Arc::new(StaticConfirmation::deny()),
            sink,
            session_id: Uuid::new_v4().simple().to_string(),
            environment: environment_context(),
            generation: Arc::new(AtomicU64::new(0)),
            canceled: Arc::new(AtomicBool::new(false)),
            terminated: AtomicBool::new(false),
            stop_after_current_turn: AtomicBool::new(false),
            hard_abort,
            tokens: Mutex::new(tokens),
            pending_aborts: Mutex::new(Vec::new()),
            transcript: Arc::new(Mutex::new(Transcript::new())),
        }
    }

    /// Handler consulted when a command or patch needs approval. Without one,
    /// such calls are denied.
    #[must_use]
    pub fn with_confirmation(mut self, confirm: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirm = confirm;
        self
    }

    #[must_use]
    pub fn with_generic_tool_handler(mut self, handler: Arc<dyn GenericToolHandler>) -> Self {
        self.dispatcher = self.dispatcher.with_generic_handler(handler);
        self
    }

    /// Replaces the `User`/`Workdir`/`Platform`/`Shell` block sent with the
    /// instructions.
    #[must_use]
    pub fn with_environment_context(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Local history kept in stateless mode.
    pub fn transcript(&self) -> Vec<ResponseItem> {
        lock_unpoisoned(&self.transcript).items().to_vec()
    }

    pub fn pending_aborts(&self) -> Vec<String> {
        lock_unpoisoned(&self.pending_aborts).clone()
    }

    /// Runs turns until the model stops asking for tool output.
    ///
    /// Recoverable provider failures end the run with a system notice and
    /// `Ok(())`. Unrecognised provider failures are returned as
    /// [`AgentError::Model`].
    pub async fn run(
        &self,
        input: Vec<ResponseItem>,
        previous_response_id: &str,
    ) -> Result<(), AgentError> {
        if self.is_terminated() {
            return Err(AgentError::Terminated);
        }
        let run = self.begin_run();
        let transcript = self
            .config
            .disable_response_storage
            .then(|| Arc::clone(&self.transcript));
        let mut queue = StagingQueue::spawn(self.gate(run.generation), Arc::clone(&self.sink), transcript);

        let end = match self
            .run_turns(&run, &mut queue, input, previous_response_id)
            .await
        {
            Ok(end) => end,
            Err(AgentError::Model(error)) => match classify_unhandled_error(&error) {
                Some(notice) => RunEnd::Notice(notice),
                None => {
                    warn!(%error, "model request failed");
                    return Err(AgentError::Model(error));
                }
            },
            Err(error) => return Err(error),
        };

        match end {
            RunEnd::Completed => {
                if queue.flush().await {
                    lock_unpoisoned(&self.pending_aborts).clear();
                    self.emit(AgentEvent::Loading(false));
                }
            }
            RunEnd::Interrupted => {
                debug!(generation = run.generation, "run interrupted");
                // `cancel` already reported the stop, and a newer run owns the
                // loading state.
                if self.is_current(&run) {
                    self.emit(AgentEvent::Loading(false));
                }
            }
            RunEnd::Notice(notice) => {
                queue.settle().await;
                warn!(notice = ?notice, "run ended with a notice");
                if queue.gate().is_open() {
                    self.emit(AgentEvent::Item(notice.into_item()));
                    self.emit(AgentEvent::Loading(false));
                }
            }
        }
        Ok(())
    }

    /// Interrupts the current run. Tool calls already answered keep their
    /// side effects; calls still pending are answered with "aborted" on the
    /// next run.
    pub fn cancel(&self) {
        if self.is_terminated() {
            return;
        }
        self.canceled.store(true, Ordering::SeqCst);
        {
            let mut tokens = lock_unpoisoned(&self.tokens);
            tokens.stream.cancel();
            tokens.exec.cancel();
            tokens.exec = self.hard_abort.child_token();
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let pending = lock_unpoisoned(&self.pending_aborts).len();
        info!(generation, pending_calls = pending, "run cancelled");
        if pending == 0 {
            self.emit(AgentEvent::LastResponseId(String::new()));
        }
        self.emit(AgentEvent::Loading(false));
    }

    /// Cancels and permanently refuses further runs.
    pub fn terminate(&self) {
        if self.is_terminated() {
            return;
        }
        self.cancel();
        self.terminated.store(true, Ordering::SeqCst);
        self.hard_abort.cancel();
        info!(session_id = %self.session_id, "agent loop terminated");
    }

    /// Starts a new generation. A run still in flight is superseded: its
    /// stream and tool executions are cancelled.
    fn begin_run(&self) -> RunContext {
        let stream_token = self.hard_abort.child_token();
        let generation = {
            let mut tokens = lock_unpoisoned(&self.tokens);
            tokens.stream.cancel();
            tokens.exec.cancel();
            tokens.stream = stream_token.clone();
            tokens.exec = self.hard_abort.child_token();
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        self.canceled.store(false, Ordering::SeqCst);
        self.stop_after_current_turn.store(false, Ordering::SeqCst);

        debug!(generation, session_id = %self.session_id, "starting run");
        RunContext {
            generation,
            started: Instant::now(),
            stream_token,
        }
    }

    fn gate(&self, run_generation: u64) -> DeliveryGate {
        DeliveryGate::new(
            Arc::clone(&self.generation),
            run_generation,
            Arc::clone(&self.canceled),
            self.hard_abort.clone(),
        )
    }

    fn is_current(&self, run: &RunContext) -> bool {
        run.generation == self.generation()
    }

    /// True once `run` was cancelled, terminated or replaced by a newer run.
    fn is_interrupted(&self, run: &RunContext) -> bool {
        self.is_canceled() || self.hard_abort.is_cancelled() || !self.is_current(run)
    }

    fn emit(&self, event: AgentEvent) {
        (self.sink)(event);
    }

    async fn run_turns(
        &self,
        run: &RunContext,
        queue: &mut StagingQueue,
        input: Vec<ResponseItem>,
        previous_response_id: &str,
    ) -> Result<RunEnd, AgentError> {
        let stateless = self.config.disable_response_storage;
        let mut state = RunState {
            last_response_id: if stateless {
                String::new()
            } else {
                previous_response_id.to_string()
            },
            prefix_len: 0,
            processed_calls: HashSet::new(),
        };
        let mut turn_input = self.first_turn_input(input, &mut state);
        let tools = tools_for(&self.config);
        let instructions = merged_instructions(&self.config, &self.environment);

        self.emit(AgentEvent::Loading(true));

        while !turn_input.is_empty() {
            if self.is_interrupted(run) {
                return Ok(RunEnd::Interrupted);
            }
            let already_shown = if stateless { state.prefix_len } else { 0 };
            for item in turn_input.iter().skip(already_shown) {
                queue.stage(item.clone());
            }

            let request = self.build_request(&turn_input, &tools, &instructions, &state);
            let mut stream = match self.open_stream(run, &request).await? {
                Ok(stream) => stream,
                Err(end) => return Ok(end),
            };

            let mut stream_retries = 0;
            let next_input = loop {
                match self.consume_stream(run, queue, &mut stream, &mut state).await {
                    Ok(next_input) => break next_input,
                    Err(StreamFailure::Agent(error)) => return Err(error),
                    Err(StreamFailure::Model(error)) => {
                        if is_rate_limit_error(&error) && stream_retries < MAX_STREAM_RETRIES {
                            stream_retries += 1;
                            let delay =
                                exponential_delay(self.config.rate_limit_retry_wait, stream_retries);
                            warn!(
                                attempt = stream_retries,
                                max = MAX_STREAM_RETRIES,
                                delay_ms = delay.as_millis() as u64,
                                "stream rate limited, retrying"
                            );
                            if !sleep_unless_cancelled(run, delay).await {
                                return Ok(RunEnd::Interrupted);
                            }
                            stream = match self.request_stream(run, &request).await {
                                Some(result) => result?,
                                None => return Ok(RunEnd::Interrupted),
                            };
                            continue;
                        }
                        return self.stream_failure_end(run, error);
                    }
                }
            };

            turn_input = if self.stop_after_current_turn.load(Ordering::SeqCst) {
                Vec::new()
            } else {
                next_input
            };
            trace!(items = turn_input.len(), "next turn input");
        }
        Ok(RunEnd::Completed)
    }

    /// Pending aborts answered first, then the caller's input. In stateless
    /// mode the whole transcript leads.
    ///
    /// Each pending call is answered once: the list is emptied here.
    fn first_turn_input(&self, input: Vec<ResponseItem>, state: &mut RunState) -> Vec<ResponseItem> {
        let pending = std::mem::take(&mut *lock_unpoisoned(&self.pending_aborts));
        if !pending.is_empty() {
            debug!(calls = pending.len(), "answering cancelled tool calls as aborted");
        }
        let aborts: Vec<ResponseItem> = pending
            .iter()
            .map(|call_id| {
                ResponseItem::function_call_output(
                    call_id.as_str(),
                    json!({
                        "output": "aborted",
                        "metadata": {"exit_code": 1, "duration_seconds": 0}
                    })
                    .to_string(),
                )
            })
            .collect();

        if !self.config.disable_response_storage {
            return aborts
                .iter()
                .chain(&input)
                .map(ResponseItem::without_internal_fields)
                .collect();
        }

        let mut transcript = lock_unpoisoned(&self.transcript);
        state.prefix_len = transcript.len();
        transcript.extend_input(&input);
        transcript
            .items()
            .iter()
            .chain(&aborts)
            .map(ResponseItem::without_internal_fields)
            .collect()
    }

    fn build_request(
        &self,
        input: &[ResponseItem],
        tools: &[ToolSpec],
        instructions: &str,
        state: &RunState,
    ) -> ModelRequest {
        let mut request = ModelRequest::new(self.config.model.clone(), input.to_vec());
        request.instructions = Some(instructions.to_string());
        request.tools = tools.to_vec();
        request.reasoning = self.config.uses_reasoning().then(|| Reasoning {
            effort: self.config.reasoning_effort.clone(),
            summary: Some("auto".to_string()),
        });
        request.service_tier = self.config.flex_mode.then(|| "flex".to_string());
        if self.config.disable_response_storage {
            request.store = false;
        } else {
            request.store = true;
            request.previous_response_id = (!state.last_response_id.is_empty())
                .then(|| state.last_response_id.clone());
        }
        request
    }

    /// Opens a stream, retrying transient failures and rate limits.
    /// `Ok(Err(end))` means the run ends without a stream.
    async fn open_stream(
        &self,
        run: &RunContext,
        request: &ModelRequest,
    ) -> Result<Result<ResponseStream, RunEnd>, AgentError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.request_stream(run, request).await {
                Some(Ok(stream)) => return Ok(Ok(stream)),
                Some(Err(error)) => error,
                None => return Ok(Err(RunEnd::Interrupted)),
            };

            match classify_request_error(&error, attempt, self.config.rate_limit_retry_wait) {
                RequestErrorAction::RetryNow => {
                    warn!(attempt, max = MAX_RETRIES, %error, "model request failed, retrying");
                }
                RequestErrorAction::RetryAfter(delay) => {
                    warn!(
                        attempt,
                        max = MAX_RETRIES,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, retrying"
                    );
                    if !sleep_unless_cancelled(run, delay).await {
                        return Ok(Err(RunEnd::Interrupted));
                    }
                }
                RequestErrorAction::Notice(notice) => return Ok(Err(RunEnd::Notice(notice))),
                RequestErrorAction::Fatal => return Err(AgentError::Model(error)),
            }
        }
    }

    /// `None` when the run was cancelled before the client answered.
    async fn request_stream(
        &self,
        run: &RunContext,
        request: &ModelRequest,
    ) -> Option<Result<ResponseStream, ModelError>> {
        tokio::select! {
            biased;
            () = run.stream_token.cancelled() => None,
            result = self.client.stream(request.clone()) => Some(result),
        }
    }

    fn stream_failure_end(&self, run: &RunContext, error: ModelError) -> Result<RunEnd, AgentError> {
        match error.kind {
            ModelErrorKind::Aborted if self.is_interrupted(run) => Ok(RunEnd::Interrupted),
            ModelErrorKind::InvalidJson => Ok(RunEnd::Notice(Notice::InvalidJson)),
            _ if is_insufficient_quota(&error) => {
                Ok(RunEnd::Notice(Notice::insufficient_quota(&error)))
            }
            _ => Err(AgentError::Model(error)),
        }
    }

    /// Consumes one response stream. Returns the tool outputs that form the
    /// next turn's input.
    async fn consume_stream(
        &self,
        run: &RunContext,
        queue: &mut StagingQueue,
        stream: &mut ResponseStream,
        state: &mut RunState,
    ) -> Result<Vec<ResponseItem>, StreamFailure> {
        let mut next_input = Vec::new();
        loop {
            let event = tokio::select! {
                biased;
                () = run.stream_token.cancelled() => {
                    return Err(StreamFailure::Model(ModelError::aborted()));
                }
                event = stream.next() => event,
            };
            let Some(event) = event else {
                break;
            };
            let event = event.map_err(StreamFailure::Model)?;
            trace!(event_type = event.event_type(), "response event");

            match event {
                ResponseEvent::OutputItemDone { mut item } => {
                    if let ResponseItem::Reasoning { duration_ms, .. } = &mut item {
                        *duration_ms = Some(run.started.elapsed().as_millis() as u64);
                    }
                    if item.is_tool_call() {
                        if let Some(call_id) = item.tool_call_id() {
                            self.add_pending_abort(call_id);
                        }
                    } else {
                        queue.stage(item);
                    }
                }
                ResponseEvent::Completed { response } => {
                    if self.is_interrupted(run) {
                        debug!(response_id = %response.id, "dropping response of an interrupted run");
                        break;
                    }
                    for item in &response.output {
                        queue.stage(item.clone());
                    }
                    if response
                        .status
                        .is_some_and(|status| status.expects_tool_dispatch())
                    {
                        next_input = self
                            .process_completed_output(run, &response.output, queue, state)
                            .await
                            .map_err(StreamFailure::Agent)?;
                        if self.config.disable_response_storage {
                            queue.settle().await;
                            next_input = self.advance_transcript(&response.output, &next_input, state);
                        }
                        if self.is_interrupted(run) {
                            break;
                        }
                    }
                    debug!(response_id = %response.id, "response completed");
                    state.last_response_id = response.id.clone();
                    self.emit(AgentEvent::LastResponseId(response.id));
                }
                ResponseEvent::OutputTextDelta { .. } | ResponseEvent::Other { .. } => {}
            }
        }
        Ok(next_input)
    }

    fn add_pending_abort(&self, call_id: &str) {
        let mut pending = lock_unpoisoned(&self.pending_aborts);
        if !pending.iter().any(|pending_id| pending_id == call_id) {
            pending.push(call_id.to_string());
        }
    }

    fn advance_transcript(
        &self,
        output: &[ResponseItem],
        tool_outputs: &[ResponseItem],
        state: &mut RunState,
    ) -> Vec<ResponseItem> {
        let mut transcript = lock_unpoisoned(&self.transcript);
        transcript.absorb_output(output);
        let next_input = transcript.next_turn_input(tool_outputs);
        if !next_input.is_empty() {
            state.prefix_len = transcript.len();
        }
        next_input
    }

    /// Dispatches the tool calls of a completed response, staging everything
    /// else.
    ///
    /// Checked before every call: once the run is cancelled or superseded,
    /// the remaining calls are left for the pending-abort answers.
    async fn process_completed_output(
        &self,
        run: &RunContext,
        output: &[ResponseItem],
        queue: &mut StagingQueue,
        state: &mut RunState,
    ) -> Result<Vec<ResponseItem>, AgentError> {
        let mut tool_outputs = Vec::new();
        for item in output {
            if self.is_interrupted(run) {
                debug!(generation = run.generation, "skipping remaining tool calls");
                break;
            }
            match item {
                ResponseItem::FunctionCall { .. } => {
                    if !state.first_dispatch(item) {
                        continue;
                    }
                    let result = self
                        .dispatcher
                        .handle_function_call(item, &self.exec_context())
                        .await;
                    tool_outputs.extend(self.take_result(result));
                }
                ResponseItem::LocalShellCall { .. } => {
                    if !state.first_dispatch(item) {
                        continue;
                    }
                    let result = self
                        .dispatcher
                        .handle_local_shell_call(item, &self.exec_context())
                        .await?;
                    tool_outputs.extend(self.take_result(result));
                }
                _ => match item.single_output_text().and_then(parse_text_tool_call) {
                    Some(call) => {
                        debug!("dispatching tool call written as text");
                        let result = self
                            .dispatcher
                            .handle_local_shell_call(&call, &self.exec_context())
                            .await?;
                        tool_outputs.extend(self.take_result(result));
                    }
                    None => queue.stage(item.clone()),
                },
            }
        }
        Ok(tool_outputs)
    }

    fn take_result(&self, result: ToolResult) -> Vec<ResponseItem> {
        if result.stop_requested {
            self.stop_after_current_turn.store(true, Ordering::SeqCst);
        }
        result.items
    }

    fn exec_context(&self) -> ExecContext {
        ExecContext {
            approval_policy: self.config.approval_policy,
            additional_writable_roots: self.config.additional_writable_roots.clone(),
            confirm: Arc::clone(&self.confirm),
            cancel: lock_unpoisoned(&self.tokens).exec.clone(),
        }
    }
}

/// Sleeps for `delay`. Returns `false` if the run was cancelled first.
async fn sleep_unless_cancelled(run: &RunContext, delay: Duration) -> bool {
    tokio::select! {
        biased;
        () = run.stream_token.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}
