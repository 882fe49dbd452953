#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use agent_protocol::{
    CompletedResponse, ContentItem, ModelClient, ModelError, ModelRequest, ResponseEvent,
    ResponseItem, ResponseStatus, ResponseStream, Role,
};
use async_trait::async_trait;
use coding_agent::{
    AgentConfig, AgentEvent, AgentLoop, EventSink, ExecCollaborator, ExecContext, ExecMetadata,
    ExecOutcome, ExecRequest,
};
use futures_util::stream::{self, StreamExt};
use tokio::time::Instant;

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// One scripted answer to `ModelClient::stream`.
pub enum Script {
    /// The request itself fails.
    Fail(ModelError),
    /// The stream yields these events and ends.
    Events(Vec<Result<ResponseEvent, ModelError>>),
    /// The stream yields these events and then never ends.
    Hang(Vec<Result<ResponseEvent, ModelError>>),
    /// The stream stays silent for the delay, then yields these events.
    Delayed(Duration, Vec<Result<ResponseEvent, ModelError>>),
}

#[derive(Default)]
pub struct ScriptedModelClient {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<(Instant, ModelRequest)>>,
}

impl ScriptedModelClient {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        lock_unpoisoned(&self.requests)
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub fn request_times(&self) -> Vec<Instant> {
        lock_unpoisoned(&self.requests)
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn stream(&self, request: ModelRequest) -> Result<ResponseStream, ModelError> {
        lock_unpoisoned(&self.requests).push((Instant::now(), request));
        let script = lock_unpoisoned(&self.scripts).pop_front();
        match script {
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Events(events)) => Ok(stream::iter(events).boxed()),
            Some(Script::Hang(events)) => Ok(stream::iter(events).chain(stream::pending()).boxed()),
            Some(Script::Delayed(delay, events)) => Ok(stream::once(async move {
                tokio::time::sleep(delay).await;
                stream::iter(events)
            })
            .flatten()
            .boxed()),
            None => Err(ModelError::api(None, "no scripted response left")),
        }
    }
}

/// Exec fake that records requests and answers with a fixed outcome.
pub struct RecordingExec {
    requests: Mutex<Vec<ExecRequest>>,
    outcome: ExecOutcome,
}

impl RecordingExec {
    pub fn new(output: &str) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            outcome: ExecOutcome::new(
                output,
                ExecMetadata {
                    exit_code: 0,
                    duration_seconds: 0.1,
                },
            ),
        })
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        lock_unpoisoned(&self.requests)
            .iter()
            .map(|request| request.command.clone())
            .collect()
    }
}

#[async_trait]
impl ExecCollaborator for RecordingExec {
    async fn exec(&self, request: ExecRequest, _ctx: &ExecContext) -> ExecOutcome {
        lock_unpoisoned(&self.requests).push(request);
        self.outcome.clone()
    }
}

#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<AgentEvent>>>,
}

impl EventLog {
    pub fn sink(&self) -> EventSink {
        let events = Arc::clone(&self.events);
        Arc::new(move |event| lock_unpoisoned(&events).push(event))
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        lock_unpoisoned(&self.events).clone()
    }

    pub fn items(&self) -> Vec<ResponseItem> {
        self.events()
            .iter()
            .filter_map(AgentEvent::item)
            .cloned()
            .collect()
    }

    /// Text of every system message delivered so far.
    pub fn notices(&self) -> Vec<String> {
        self.items()
            .iter()
            .filter(|item| item.is_system_message())
            .filter_map(|item| match item {
                ResponseItem::Message { content, .. } => {
                    content.first().and_then(ContentItem::text).map(str::to_string)
                }
                _ => None,
            })
            .collect()
    }
}

pub struct Harness {
    pub agent: Arc<AgentLoop>,
    pub client: Arc<ScriptedModelClient>,
    pub exec: Arc<RecordingExec>,
    pub log: EventLog,
}

pub fn harness(config: AgentConfig, scripts: Vec<Script>) -> Harness {
    let client = ScriptedModelClient::new(scripts);
    let exec = RecordingExec::new("hi\n");
    let log = EventLog::default();
    let agent = AgentLoop::new(config, client.clone(), exec.clone(), log.sink())
        .with_environment_context("User: tester\nWorkdir: /work\nPlatform: linux\nShell: sh");
    Harness {
        agent: Arc::new(agent),
        client,
        exec,
        log,
    }
}

pub fn assistant_message(id: &str, text: &str) -> ResponseItem {
    ResponseItem::Message {
        id: Some(id.to_string()),
        role: Role::Assistant,
        content: vec![ContentItem::OutputText {
            text: text.to_string(),
        }],
    }
}

pub fn function_call(id: &str, call_id: &str, name: &str, arguments: &str) -> ResponseItem {
    ResponseItem::FunctionCall {
        id: Some(id.to_string()),
        call_id: Some(call_id.to_string()),
        name: Some(name.to_string()),
        arguments: Some(arguments.to_string()),
        function: None,
        status: Some("completed".to_string()),
    }
}

pub fn item_done(item: ResponseItem) -> Result<ResponseEvent, ModelError> {
    Ok(ResponseEvent::OutputItemDone { item })
}

pub fn completed(id: &str, output: Vec<ResponseItem>) -> Result<ResponseEvent, ModelError> {
    Ok(ResponseEvent::Completed {
        response: CompletedResponse {
            id: id.to_string(),
            status: Some(ResponseStatus::Completed),
            output,
        },
    })
}

/// A response carrying a single final assistant message.
pub fn final_answer(response_id: &str, text: &str) -> Script {
    let message = assistant_message(&format!("msg_{response_id}"), text);
    Script::Events(vec![
        item_done(message.clone()),
        completed(response_id, vec![message]),
    ])
}

pub fn output_json(item: &ResponseItem) -> serde_json::Value {
    match item {
        ResponseItem::FunctionCallOutput { output, .. }
        | ResponseItem::LocalShellCallOutput { output, .. } => {
            serde_json::from_str(output).unwrap_or(serde_json::Value::Null)
        }
        other => panic!("not a tool output: {other:?}"),
    }
}
