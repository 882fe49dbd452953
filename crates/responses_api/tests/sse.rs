use agent_protocol::{ModelErrorKind, ResponseEvent, ResponseItem, ResponseStatus, Role};
use pretty_assertions::assert_eq;
use responses_api::SseStreamParser;

#[test]
fn output_items_and_completion_are_decoded() {
    let payload = concat!(
        "event: response.output_item.done\n",
        "data: {\"type\":\"response.output_item.done\",\"item\":{\"type\":\"function_call\",\"id\":\"fc_1\",\"call_id\":\"call_1\",\"name\":\"shell\",\"arguments\":\"{}\"}}\n\n",
        "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_9\",\"status\":\"requires_action\",\"output\":[{\"type\":\"message\",\"role\":\"assistant\",\"content\":[{\"type\":\"output_text\",\"text\":\"ok\"}]}]}}\n\n",
    );

    let events = SseStreamParser::parse_frames(payload);
    assert_eq!(events.len(), 2);

    match &events[0] {
        Ok(ResponseEvent::OutputItemDone { item }) => {
            assert_eq!(item.tool_call_id(), Some("call_1"));
            assert!(item.is_tool_call());
        }
        other => panic!("unexpected first event: {other:?}"),
    }
    match &events[1] {
        Ok(ResponseEvent::Completed { response }) => {
            assert_eq!(response.id, "resp_9");
            assert_eq!(response.status, Some(ResponseStatus::RequiresAction));
            assert_eq!(
                response.output,
                vec![ResponseItem::message(Role::Assistant, "ok")]
            );
        }
        other => panic!("unexpected second event: {other:?}"),
    }
}

#[test]
fn crlf_framing_is_accepted() {
    let events = SseStreamParser::parse_frames(
        "data: {\"type\":\"response.output_text.delta\",\"delta\":\"a\"}\r\n\r\n",
    );
    assert_eq!(
        events,
        vec![Ok(ResponseEvent::OutputTextDelta {
            delta: "a".to_string()
        })]
    );
}

#[test]
fn failed_response_carries_code() {
    let events = SseStreamParser::parse_frames(
        "data: {\"type\":\"response.failed\",\"response\":{\"id\":\"r\",\"error\":{\"code\":\"insufficient_quota\",\"message\":\"You exceeded your current quota\"}}}\n\n",
    );
    let error = events[0].as_ref().expect_err("failed response");
    assert_eq!(error.kind, ModelErrorKind::Api);
    assert_eq!(error.code(), Some("insufficient_quota"));
    assert_eq!(error.message, "You exceeded your current quota");
}

#[test]
fn nested_error_event_is_unwrapped() {
    let events = SseStreamParser::parse_frames(
        "data: {\"type\":\"error\",\"error\":{\"type\":\"server_error\",\"message\":\"boom\"}}\n\n",
    );
    let error = events[0].as_ref().expect_err("error event");
    assert_eq!(error.error_type(), Some("server_error"));
    assert_eq!(error.message, "boom");
}

#[test]
fn unknown_events_pass_through_and_done_is_skipped() {
    let events = SseStreamParser::parse_frames(concat!(
        "data: {\"type\":\"response.created\",\"response\":{}}\n\n",
        "data: [DONE]\n\n",
        ": keep-alive comment\n\n",
    ));
    assert_eq!(
        events,
        vec![Ok(ResponseEvent::Other {
            event_type: "response.created".to_string()
        })]
    );
}

#[test]
fn text_split_inside_a_character_decodes_intact() {
    let payload = "data: {\"type\":\"response.output_text.delta\",\"delta\":\"na\u{ef}ve caf\u{e9}\"}\r\n\r\n";
    let mut parser = SseStreamParser::default();
    let mut events = Vec::new();
    for chunk in payload.as_bytes().chunks(1) {
        events.extend(parser.feed(chunk));
    }

    assert_eq!(
        events,
        vec![Ok(ResponseEvent::OutputTextDelta {
            delta: "na\u{ef}ve caf\u{e9}".to_string()
        })]
    );
    assert!(parser.is_empty_buffer());
}
