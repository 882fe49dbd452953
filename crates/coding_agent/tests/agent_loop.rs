mod support;

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use agent_protocol::{LocalShellAction, ModelError, ResponseItem};
use assert_matches::assert_matches;
use async_trait::async_trait;
use coding_agent::{
    AgentConfig, AgentError, AgentEvent, AgentLoop, ExecCollaborator, ExecContext, ExecMetadata,
    ExecOutcome, ExecRequest, GenericToolHandler, GenericToolOutput,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use support::{
    assistant_message, completed, final_answer, function_call, harness, item_done, lock_unpoisoned,
    output_json, EventLog, Script, ScriptedModelClient,
};

fn stateful() -> AgentConfig {
    AgentConfig::new("o3").with_rate_limit_retry_wait(Duration::from_millis(100))
}

fn stateless() -> AgentConfig {
    stateful().with_disable_response_storage(true)
}

#[tokio::test(start_paused = true)]
async fn final_answer_needs_a_single_request() {
    let h = harness(stateful(), vec![final_answer("resp_1", "done")]);

    h.agent
        .run(vec![ResponseItem::user_text("hi")], "")
        .await
        .expect("run succeeds");

    let requests = h.client.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].input, vec![ResponseItem::user_text("hi")]);
    assert_eq!(requests[0].previous_response_id, None);
    assert!(requests[0].store);
    assert_eq!(
        requests[0].reasoning.as_ref().map(|r| r.summary.as_deref()),
        Some(Some("auto"))
    );
    assert!(requests[0]
        .instructions
        .as_deref()
        .is_some_and(|text| text.contains("Workdir: /work")));

    let events = h.log.events();
    assert_eq!(events.first(), Some(&AgentEvent::Loading(true)));
    assert_eq!(events.last(), Some(&AgentEvent::Loading(false)));
    assert!(events.contains(&AgentEvent::LastResponseId("resp_1".to_string())));
    assert_eq!(
        h.log.items(),
        vec![
            ResponseItem::user_text("hi"),
            assistant_message("msg_resp_1", "done"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn tool_output_is_sent_back_with_previous_response_id() {
    let call = function_call("fc_1", "call_1", "shell", r#"{"cmd":["echo","hi"]}"#);
    let h = harness(
        stateful(),
        vec![
            Script::Events(vec![
                item_done(call.clone()),
                completed("resp_1", vec![call]),
            ]),
            final_answer("resp_2", "done"),
        ],
    );

    h.agent
        .run(vec![ResponseItem::user_text("say hi")], "resp_0")
        .await
        .expect("run succeeds");

    assert_eq!(h.exec.commands(), vec![vec!["echo".to_string(), "hi".to_string()]]);
    let requests = h.client.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].previous_response_id.as_deref(), Some("resp_0"));
    assert_eq!(requests[1].previous_response_id.as_deref(), Some("resp_1"));
    assert_eq!(requests[1].input.len(), 1);
    assert_matches!(&requests[1].input[0], ResponseItem::FunctionCallOutput { call_id, .. } => {
        assert_eq!(call_id, "call_1");
    });
    assert_eq!(
        output_json(&requests[1].input[0]),
        json!({"output": "hi\n", "metadata": {"exit_code": 0, "duration_seconds": 0.1}})
    );
    assert!(h.agent.pending_aborts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rate_limited_request_waits_for_suggested_delay() {
    let h = harness(
        stateful(),
        vec![
            Script::Fail(ModelError::api(
                Some(429),
                "Rate limit reached for requests. Please try again in 1.3s.",
            )),
            final_answer("resp_1", "done"),
        ],
    );

    h.agent
        .run(vec![ResponseItem::user_text("hi")], "")
        .await
        .expect("run succeeds");

    let times = h.client.request_times();
    assert_eq!(times.len(), 2);
    let waited = times[1] - times[0];
    assert!(waited >= Duration::from_millis(1300), "waited {waited:?}");
    assert!(waited < Duration::from_millis(1400), "waited {waited:?}");
    assert!(h.log.notices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn mid_stream_rate_limit_reopens_the_same_request() {
    let h = harness(
        stateful(),
        vec![
            Script::Events(vec![Err(ModelError::api(Some(429), "slow down"))]),
            final_answer("resp_1", "done"),
        ],
    );

    h.agent
        .run(vec![ResponseItem::user_text("hi")], "")
        .await
        .expect("run succeeds");

    let requests = h.client.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], requests[1]);
    assert!(h.log.items().contains(&assistant_message("msg_resp_1", "done")));
}

#[tokio::test(start_paused = true)]
async fn server_errors_end_with_network_notice_after_all_attempts() {
    let scripts = (0..8)
        .map(|_| Script::Fail(ModelError::api(Some(503), "service unavailable")))
        .collect();
    let h = harness(stateful(), scripts);

    h.agent
        .run(vec![ResponseItem::user_text("hi")], "")
        .await
        .expect("notices are not errors");

    assert_eq!(h.client.requests().len(), 8);
    let notices = h.log.notices();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].contains("Network error while contacting OpenAI"));
    assert_eq!(h.log.events().last(), Some(&AgentEvent::Loading(false)));
}

#[tokio::test(start_paused = true)]
async fn rejected_request_reports_request_id() {
    let error = ModelError::api(Some(400), "Unsupported parameter")
        .with_type("invalid_request_error")
        .with_request_id("req_42");
    let h = harness(stateful(), vec![Script::Fail(error)]);

    h.agent
        .run(vec![ResponseItem::user_text("hi")], "")
        .await
        .expect("notices are not errors");

    let notices = h.log.notices();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].contains("OpenAI rejected the request (request ID: req_42)"));
    assert_eq!(h.client.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn context_overflow_becomes_a_notice() {
    let error = ModelError::api(Some(400), "max_tokens is too large: 90000")
        .with_type("invalid_request_error");
    let h = harness(stateful(), vec![Script::Fail(error)]);

    h.agent
        .run(vec![ResponseItem::user_text("hi")], "")
        .await
        .expect("notices are not errors");

    let notices = h.log.notices();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].contains("exceeds the maximum context length"));
}

#[tokio::test(start_paused = true)]
async fn stream_failures_map_to_notices() {
    let cases = vec![
        (
            ModelError::api(None, "You exceeded your current quota").with_code("insufficient_quota"),
            "Insufficient quota: You exceeded your current quota",
        ),
        (
            ModelError::invalid_json("unexpected token"),
            "Failed to parse streaming response (invalid JSON)",
        ),
        (
            ModelError::premature_close(),
            "Connection closed prematurely",
        ),
    ];

    for (error, expected) in cases {
        let h = harness(
            stateful(),
            vec![Script::Events(vec![
                item_done(assistant_message("msg_1", "partial")),
                Err(error),
            ])],
        );

        h.agent
            .run(vec![ResponseItem::user_text("hi")], "")
            .await
            .expect("notices are not errors");

        let notices = h.log.notices();
        assert_eq!(notices.len(), 1, "{expected}");
        assert!(notices[0].contains(expected), "{} lacks {expected}", notices[0]);
        assert_eq!(h.log.events().last(), Some(&AgentEvent::Loading(false)));
    }
}

#[tokio::test(start_paused = true)]
async fn unrecognised_errors_surface_to_the_caller() {
    let h = harness(
        stateful(),
        vec![Script::Fail(ModelError::api(None, "unexpected failure"))],
    );

    let result = h.agent.run(vec![ResponseItem::user_text("hi")], "").await;

    assert_matches!(result, Err(AgentError::Model(error)) => {
        assert_eq!(error.message, "unexpected failure");
    });
    assert!(h.log.notices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stateless_mode_stops_when_nothing_new_is_produced() {
    let h = harness(stateless(), vec![final_answer("resp_1", "done")]);

    h.agent
        .run(vec![ResponseItem::user_text("hi")], "resp_ignored")
        .await
        .expect("run succeeds");

    let requests = h.client.requests();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].store);
    assert_eq!(requests[0].previous_response_id, None);
    assert_eq!(
        h.agent.transcript(),
        vec![
            ResponseItem::user_text("hi"),
            assistant_message("msg_resp_1", "done").without_internal_fields(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn stateless_mode_resends_the_transcript_with_tool_output() {
    let call = function_call("fc_1", "call_1", "shell", r#"{"cmd":["echo","hi"]}"#);
    let h = harness(
        stateless(),
        vec![
            Script::Events(vec![completed("resp_1", vec![call.clone()])]),
            final_answer("resp_2", "done"),
        ],
    );

    h.agent
        .run(vec![ResponseItem::user_text("say hi")], "")
        .await
        .expect("run succeeds");

    let requests = h.client.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].input.len(), 3);
    assert_eq!(requests[1].input[0], ResponseItem::user_text("say hi"));
    assert_eq!(requests[1].input[1], call.without_internal_fields());
    assert_matches!(&requests[1].input[2], ResponseItem::FunctionCallOutput { call_id, .. } => {
        assert_eq!(call_id, "call_1");
    });
    assert!(requests.iter().all(|request| request.previous_response_id.is_none()));

    let transcript = h.agent.transcript();
    assert_eq!(transcript.len(), 4);
    assert_eq!(transcript[..3], requests[1].input[..]);
    assert_eq!(
        transcript[3],
        assistant_message("msg_resp_2", "done").without_internal_fields()
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_without_pending_calls_clears_last_response_id() {
    let h = harness(stateful(), Vec::new());

    h.agent.cancel();

    assert!(h.agent.is_canceled());
    assert_eq!(h.agent.generation(), 1);
    assert_eq!(
        h.log.events(),
        vec![
            AgentEvent::LastResponseId(String::new()),
            AgentEvent::Loading(false),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_call_is_answered_with_aborted_output_on_next_run() {
    let call = function_call("fc_1", "call_1", "shell", r#"{"cmd":["sleep","60"]}"#);
    let h = harness(
        stateful(),
        vec![
            Script::Hang(vec![item_done(call)]),
            final_answer("resp_2", "done"),
        ],
    );

    let agent = Arc::clone(&h.agent);
    let first = tokio::spawn(async move {
        agent
            .run(vec![ResponseItem::user_text("wait")], "resp_1")
            .await
    });
    while h.agent.pending_aborts().is_empty() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    h.agent.cancel();
    first
        .await
        .expect("run task joins")
        .expect("cancelled run ends quietly");

    assert!(!h
        .log
        .events()
        .contains(&AgentEvent::LastResponseId(String::new())));

    h.agent
        .run(vec![ResponseItem::user_text("next")], "resp_1")
        .await
        .expect("second run succeeds");

    let requests = h.client.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].previous_response_id.as_deref(), Some("resp_1"));
    assert_eq!(requests[1].input.len(), 2);
    assert_matches!(&requests[1].input[0], ResponseItem::FunctionCallOutput { call_id, .. } => {
        assert_eq!(call_id, "call_1");
    });
    assert_eq!(
        output_json(&requests[1].input[0]),
        json!({"output": "aborted", "metadata": {"exit_code": 1, "duration_seconds": 0}})
    );
    assert_eq!(requests[1].input[1], ResponseItem::user_text("next"));
    assert!(h.agent.pending_aborts().is_empty());
    assert!(h.exec.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn aborted_answers_are_sent_only_once() {
    let call = function_call("fc_1", "call_1", "shell", r#"{"cmd":["sleep","60"]}"#);
    let h = harness(
        stateful(),
        vec![
            Script::Hang(vec![item_done(call)]),
            Script::Hang(Vec::new()),
            final_answer("resp_3", "done"),
        ],
    );

    let agent = Arc::clone(&h.agent);
    let first = tokio::spawn(async move {
        agent
            .run(vec![ResponseItem::user_text("wait")], "resp_1")
            .await
    });
    while h.agent.pending_aborts().is_empty() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    h.agent.cancel();
    first.await.expect("run task joins").expect("first run");

    let agent = Arc::clone(&h.agent);
    let second = tokio::spawn(async move {
        agent
            .run(vec![ResponseItem::user_text("retry")], "resp_1")
            .await
    });
    while h.client.requests().len() < 2 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(h.agent.pending_aborts().is_empty());
    h.agent.cancel();
    second.await.expect("run task joins").expect("second run");

    assert!(h
        .log
        .events()
        .contains(&AgentEvent::LastResponseId(String::new())));

    h.agent
        .run(vec![ResponseItem::user_text("again")], "")
        .await
        .expect("third run succeeds");

    let requests = h.client.requests();
    assert_eq!(requests.len(), 3);
    assert_matches!(&requests[1].input[0], ResponseItem::FunctionCallOutput { call_id, .. } => {
        assert_eq!(call_id, "call_1");
    });
    assert_eq!(requests[2].input, vec![ResponseItem::user_text("again")]);
    assert_eq!(requests[2].previous_response_id, None);
}

#[tokio::test(start_paused = true)]
async fn newer_run_supersedes_the_one_in_flight() {
    let risky = function_call("fc_1", "call_1", "shell", r#"{"cmd":["rm","-rf","build"]}"#);
    let h = harness(
        stateful(),
        vec![
            Script::Delayed(
                Duration::from_millis(500),
                vec![completed("resp_1", vec![risky])],
            ),
            final_answer("resp_2", "done"),
        ],
    );

    let agent = Arc::clone(&h.agent);
    let first = tokio::spawn(async move {
        agent
            .run(vec![ResponseItem::user_text("clean up")], "")
            .await
    });
    while h.client.requests().is_empty() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    h.agent
        .run(vec![ResponseItem::user_text("never mind")], "")
        .await
        .expect("newer run succeeds");
    tokio::time::sleep(Duration::from_secs(1)).await;
    first
        .await
        .expect("run task joins")
        .expect("superseded run ends quietly");

    assert!(h.exec.commands().is_empty());
    assert_eq!(h.client.requests().len(), 2);
    let events = h.log.events();
    assert!(!events.contains(&AgentEvent::LastResponseId("resp_1".to_string())));
    assert_eq!(events.last(), Some(&AgentEvent::Loading(false)));
    assert!(h
        .log
        .items()
        .contains(&assistant_message("msg_resp_2", "done")));
}

/// Exec that cancels its agent loop while running the first command.
#[derive(Default)]
struct CancelDuringExec {
    agent: Mutex<Weak<AgentLoop>>,
    commands: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl ExecCollaborator for CancelDuringExec {
    async fn exec(&self, request: ExecRequest, _ctx: &ExecContext) -> ExecOutcome {
        lock_unpoisoned(&self.commands).push(request.command);
        let agent = lock_unpoisoned(&self.agent).upgrade();
        if let Some(agent) = agent {
            agent.cancel();
        }
        ExecOutcome::new(
            "ok",
            ExecMetadata {
                exit_code: 0,
                duration_seconds: 0.1,
            },
        )
    }
}

#[tokio::test(start_paused = true)]
async fn cancel_between_tool_calls_skips_the_rest() {
    let first_call = function_call("fc_1", "call_1", "shell", r#"{"cmd":["echo","one"]}"#);
    let second_call = function_call("fc_2", "call_2", "shell", r#"{"cmd":["echo","two"]}"#);
    let client = ScriptedModelClient::new(vec![Script::Events(vec![
        item_done(first_call.clone()),
        item_done(second_call.clone()),
        completed("resp_1", vec![first_call, second_call]),
    ])]);
    let exec = Arc::new(CancelDuringExec::default());
    let log = EventLog::default();
    let agent = Arc::new(AgentLoop::new(stateful(), client.clone(), exec.clone(), log.sink()));
    *lock_unpoisoned(&exec.agent) = Arc::downgrade(&agent);

    agent
        .run(vec![ResponseItem::user_text("go")], "")
        .await
        .expect("cancelled run ends quietly");

    assert_eq!(
        lock_unpoisoned(&exec.commands).clone(),
        vec![vec!["echo".to_string(), "one".to_string()]]
    );
    assert_eq!(client.requests().len(), 1);
    assert_eq!(agent.pending_aborts(), vec!["call_1", "call_2"]);
    assert!(!log
        .events()
        .contains(&AgentEvent::LastResponseId("resp_1".to_string())));
}

#[tokio::test(start_paused = true)]
async fn terminated_loop_refuses_to_run() {
    let h = harness(stateful(), vec![final_answer("resp_1", "done")]);

    h.agent.terminate();
    let result = h.agent.run(vec![ResponseItem::user_text("hi")], "").await;

    assert!(h.agent.is_terminated());
    assert_matches!(result, Err(AgentError::Terminated));
    assert!(h.client.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn last_response_tool_ends_the_loop() {
    let shell = function_call("fc_1", "call_1", "shell", r#"{"cmd":["echo","hi"]}"#);
    let stop = function_call("fc_2", "call_2", "last_response", "{}");
    let h = harness(
        stateful(),
        vec![Script::Events(vec![completed("resp_1", vec![shell, stop])])],
    );

    h.agent
        .run(vec![ResponseItem::user_text("hi")], "")
        .await
        .expect("run succeeds");

    assert_eq!(h.client.requests().len(), 1);
    assert_eq!(h.exec.commands().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unsupported_local_shell_action_fails_the_run() {
    let mut action = LocalShellAction::exec(vec!["ls".to_string()], None, None);
    action.kind = "wait".to_string();
    let call = ResponseItem::LocalShellCall {
        id: Some("lsc_1".to_string()),
        call_id: Some("call_1".to_string()),
        status: Some("completed".to_string()),
        action,
    };
    let h = harness(
        AgentConfig::new("codex-mini-latest"),
        vec![Script::Events(vec![completed("resp_1", vec![call])])],
    );

    let result = h.agent.run(vec![ResponseItem::user_text("hi")], "").await;

    assert_matches!(result, Err(AgentError::InvalidActionType(kind)) => {
        assert_eq!(kind, "wait");
    });
}

#[tokio::test(start_paused = true)]
async fn tool_call_written_as_text_is_executed() {
    let h = harness(
        stateful(),
        vec![
            Script::Events(vec![completed(
                "resp_1",
                vec![assistant_message("msg_1", r#"{"cmd": ["echo", "hi"]}"#)],
            )]),
            final_answer("resp_2", "done"),
        ],
    );

    h.agent
        .run(vec![ResponseItem::user_text("hi")], "")
        .await
        .expect("run succeeds");

    assert_eq!(h.exec.commands(), vec![vec!["echo".to_string(), "hi".to_string()]]);
    let requests = h.client.requests();
    assert_eq!(requests.len(), 2);
    assert_matches!(&requests[1].input[..], [ResponseItem::LocalShellCallOutput { .. }]);
}

struct Lookup;

#[async_trait::async_trait]
impl GenericToolHandler for Lookup {
    async fn handle(&self, name: &str, arguments: serde_json::Value) -> GenericToolOutput {
        GenericToolOutput {
            output_text: format!("{name}:{}", arguments["key"].as_str().unwrap_or_default()),
            metadata: None,
            additional_items: Vec::new(),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn unknown_tools_go_to_the_generic_handler() {
    let call = function_call("fc_1", "call_1", "lookup", r#"{"key":"answer"}"#);
    let client = support::ScriptedModelClient::new(vec![
        Script::Events(vec![completed("resp_1", vec![call])]),
        final_answer("resp_2", "done"),
    ]);
    let agent = coding_agent::AgentLoop::new(
        stateful(),
        client.clone(),
        support::RecordingExec::new(""),
        coding_agent::discard_events(),
    )
    .with_generic_tool_handler(Arc::new(Lookup));

    agent
        .run(vec![ResponseItem::user_text("hi")], "")
        .await
        .expect("run succeeds");

    let requests = client.requests();
    assert_eq!(
        output_json(&requests[1].input[0]),
        json!({"output": "lookup:answer", "metadata": {}})
    );
}
