mod support;

use std::fs;
use std::sync::Arc;

use agent_protocol::{LocalShellAction, ResponseItem};
use assert_matches::assert_matches;
use coding_agent::dispatch::NO_FUNCTION_FOUND;
use coding_agent::{
    ApprovalPolicy, CommandConfirmation, ExecCollaborator, ExecContext, ExecRequest, LocalExec,
    StaticConfirmation, ToolDispatcher,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use support::{function_call, output_json, RecordingExec};
use tokio_util::sync::CancellationToken;

fn context(policy: ApprovalPolicy, confirm: StaticConfirmation) -> ExecContext {
    ExecContext {
        approval_policy: policy,
        additional_writable_roots: Vec::new(),
        confirm: Arc::new(confirm),
        cancel: CancellationToken::new(),
    }
}

fn output_text(item: &ResponseItem) -> &str {
    match item {
        ResponseItem::FunctionCallOutput { output, .. } => output,
        other => panic!("not a function output: {other:?}"),
    }
}

#[tokio::test]
async fn shell_argument_errors_are_reported_to_the_model() {
    let exec = RecordingExec::new("unused");
    let dispatcher = ToolDispatcher::new(exec.clone());
    let ctx = context(ApprovalPolicy::FullAuto, StaticConfirmation::approve());

    let result = dispatcher
        .handle_function_call(&function_call("fc_1", "call_1", "shell", r#"{"workdir":"/"}"#), &ctx)
        .await;

    assert_eq!(result.items.len(), 1);
    assert_eq!(output_text(&result.items[0]), "error: missing command");
    assert!(exec.commands().is_empty());
}

#[tokio::test]
async fn apply_patch_tool_runs_the_patch_command() {
    let exec = RecordingExec::new("Done!");
    let dispatcher = ToolDispatcher::new(exec.clone());
    let ctx = context(ApprovalPolicy::FullAuto, StaticConfirmation::approve());
    let patch = "*** Begin Patch\n*** Add File: a.txt\n+hi\n*** End Patch";

    let result = dispatcher
        .handle_function_call(
            &function_call(
                "fc_1",
                "call_1",
                "apply_patch",
                &json!({"patch": patch}).to_string(),
            ),
            &ctx,
        )
        .await;

    assert_eq!(
        exec.commands(),
        vec![vec!["apply_patch".to_string(), patch.to_string()]]
    );
    assert_eq!(output_json(&result.items[0])["output"], json!("Done!"));

    let invalid = dispatcher
        .handle_function_call(&function_call("fc_2", "call_2", "apply_patch", "[]"), &ctx)
        .await;
    assert_eq!(output_text(&invalid.items[0]), "invalid arguments: []");
}

#[tokio::test]
async fn control_tools_and_unnamed_calls() {
    let dispatcher = ToolDispatcher::new(RecordingExec::new(""));
    let ctx = context(ApprovalPolicy::Suggest, StaticConfirmation::deny());

    let keep_going = dispatcher
        .handle_function_call(&function_call("fc_1", "call_1", "continue", "{}"), &ctx)
        .await;
    assert_eq!(output_text(&keep_going.items[0]), "continue");
    assert!(!keep_going.stop_requested);

    let stop = dispatcher
        .handle_function_call(&function_call("fc_2", "call_2", "last_response", "{}"), &ctx)
        .await;
    assert!(stop.stop_requested);
    assert!(stop.items.is_empty());

    let unnamed = dispatcher
        .handle_function_call(&function_call("fc_3", "call_3", "", "{}"), &ctx)
        .await;
    assert_eq!(output_text(&unnamed.items[0]), NO_FUNCTION_FOUND);
}

#[tokio::test]
async fn cancelled_context_dispatches_nothing() {
    let exec = RecordingExec::new("hi");
    let dispatcher = ToolDispatcher::new(exec.clone());
    let ctx = context(ApprovalPolicy::FullAuto, StaticConfirmation::approve());
    ctx.cancel.cancel();

    let result = dispatcher
        .handle_function_call(
            &function_call("fc_1", "call_1", "shell", r#"{"cmd":["ls"]}"#),
            &ctx,
        )
        .await;

    assert!(result.items.is_empty());
    assert!(exec.commands().is_empty());
}

#[tokio::test]
async fn local_shell_call_maps_the_action() {
    let exec = RecordingExec::new("listing");
    let dispatcher = ToolDispatcher::new(exec.clone());
    let ctx = context(ApprovalPolicy::FullAuto, StaticConfirmation::approve());
    let item = ResponseItem::LocalShellCall {
        id: Some("lsc_1".to_string()),
        call_id: Some("call_9".to_string()),
        status: None,
        action: LocalShellAction::exec(vec!["ls".to_string()], Some("/tmp".to_string()), Some(500)),
    };

    let result = dispatcher
        .handle_local_shell_call(&item, &ctx)
        .await
        .expect("exec action");

    assert_eq!(exec.commands(), vec![vec!["ls".to_string()]]);
    assert_matches!(&result.items[..], [ResponseItem::LocalShellCallOutput { call_id, .. }] => {
        assert_eq!(call_id, "call_9");
    });
    assert_eq!(output_json(&result.items[0])["output"], json!("listing"));
}

#[tokio::test]
async fn local_exec_runs_read_only_commands_without_asking() {
    let exec = LocalExec::new();
    let ctx = context(ApprovalPolicy::Suggest, StaticConfirmation::deny());

    let outcome = exec
        .exec(
            ExecRequest::new(vec!["echo".to_string(), "hello".to_string()]),
            &ctx,
        )
        .await;

    assert_eq!(outcome.output_text, "hello\n");
    assert_eq!(outcome.metadata.exit_code, 0);
}

#[tokio::test]
async fn local_exec_denial_adds_the_reason_as_user_message() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exec = LocalExec::new();
    let ctx = context(
        ApprovalPolicy::Suggest,
        StaticConfirmation(CommandConfirmation::deny(Some("use the staging dir".to_string()))),
    );
    let mut request = ExecRequest::new(vec!["touch".to_string(), "created".to_string()]);
    request.workdir = Some(dir.path().display().to_string());

    let outcome = exec.exec(request, &ctx).await;

    assert_eq!(outcome.output_text, "aborted");
    assert_eq!(outcome.metadata.exit_code, 1);
    assert_eq!(
        outcome.additional_items,
        vec![ResponseItem::user_text("use the staging dir")]
    );
    assert!(!dir.path().join("created").exists());
}

#[tokio::test]
async fn local_exec_applies_patches_inside_the_workdir() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("notes.txt"), "alpha\nbeta\n").expect("seed file");
    let exec = LocalExec::new();
    let ctx = context(ApprovalPolicy::AutoEdit, StaticConfirmation::deny());
    let patch = "*** Begin Patch\n*** Update File: notes.txt\n@@\n alpha\n-beta\n+gamma\n*** Add File: new.txt\n+fresh\n*** End Patch";

    let outcome = exec
        .exec(
            ExecRequest::apply_patch(patch, Some(dir.path().display().to_string())),
            &ctx,
        )
        .await;

    assert_eq!(outcome.metadata.exit_code, 0, "{}", outcome.output_text);
    assert_eq!(
        fs::read_to_string(dir.path().join("notes.txt")).expect("read"),
        "alpha\ngamma\n"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("new.txt")).expect("read"),
        "fresh\n"
    );
}

#[tokio::test]
async fn local_exec_times_out_long_commands() {
    let exec = LocalExec::new();
    let ctx = context(ApprovalPolicy::FullAuto, StaticConfirmation::deny());
    let mut request = ExecRequest::new(vec!["sleep".to_string(), "5".to_string()]);
    request.timeout_ms = Some(50);

    let outcome = exec.exec(request, &ctx).await;

    assert_eq!(outcome.output_text, "command timed out after 50 ms");
    assert_eq!(outcome.metadata.exit_code, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_exec_reports_search_replace_failures() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("a.txt"), "old\n").expect("seed file");
    let exec = LocalExec::new();
    let ctx = context(ApprovalPolicy::FullAuto, StaticConfirmation::deny());
    let patch = "*** Begin Patch\n*** Update File: a.txt\n------- SEARCH\nold\n=======\nnew\n*** End Patch";

    let outcome = exec
        .exec(
            ExecRequest::apply_patch(patch, Some(dir.path().display().to_string())),
            &ctx,
        )
        .await;

    assert_eq!(outcome.metadata.exit_code, 1);
    assert!(
        outcome.output_text.contains("Unterminated SEARCH/REPLACE block in a.txt"),
        "{}",
        outcome.output_text
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("a.txt")).expect("read"),
        "old\n"
    );
}
