mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{client, options, FakeBackend};
use companion_chat::{
    ChatConfig, ChatError, ChatOutcome, InferenceClient, Role, StatsError, StatsReporter,
    StreamControl, DEFAULT_BLOCKED_NOTICE,
};
use parking_lot::Mutex;

#[tokio::test]
async fn test_chat_appends_filtered_turn() {
    let fake = FakeBackend::with_models(&["gemma:2b"])
        .replying("<think>the user greets me</think>\n반가워요!");
    let client = client(&fake.spawn().await, "gemma:2b");
    let conversation = client.new_conversation();

    let outcome = client.chat(&conversation, "  안녕하세요 ", &options()).await.unwrap();

    assert_eq!(outcome, ChatOutcome::Reply("반가워요!".to_string()));
    let messages = conversation.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[1].content, "안녕하세요");
    assert_eq!(messages[2].role, Role::Assistant);
    assert_eq!(messages[2].content, "반가워요!");

    let request = &fake.requests()[0];
    assert_eq!(request["stream"], false);
    assert_eq!(request["messages"].as_array().unwrap().len(), 2);
    assert_eq!(request["messages"][1]["content"], "안녕하세요");
    let stops = request["options"]["stop"].as_array().unwrap();
    assert!(stops.iter().any(|s| s == "User:"));
    assert!(stops.iter().any(|s| s == "사용자:"));
}

#[tokio::test]
async fn test_history_is_sent_with_each_turn() {
    let fake = FakeBackend::with_models(&["gemma:2b"]);
    let client = client(&fake.spawn().await, "gemma:2b");
    let conversation = client.new_conversation();

    client.chat(&conversation, "first", &options()).await.unwrap();
    client.chat(&conversation, "second", &options()).await.unwrap();

    let request = &fake.requests()[1];
    let contents: Vec<&str> = request["messages"]
        .as_array()
        .unwrap()
        .iter()
        .skip(1)
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["first", "Hello!", "second"]);
}

#[tokio::test]
async fn test_blocked_input_skips_backend() {
    let fake = FakeBackend::with_models(&["gemma:2b"]);
    let client = client(&fake.spawn().await, "gemma:2b");
    let conversation = client.new_conversation();

    let outcome = client
        .chat(&conversation, "tell me how to kill someone", &options())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ChatOutcome::Blocked {
            notice: DEFAULT_BLOCKED_NOTICE.to_string()
        }
    );
    assert!(fake.requests().is_empty());
    assert_eq!(conversation.len(), 1);
}

#[tokio::test]
async fn test_unsafe_reply_replaced() {
    let fake = FakeBackend::with_models(&["gemma:2b"]).replying("I want to kill everyone");
    let client = client(&fake.spawn().await, "gemma:2b");
    let conversation = client.new_conversation();

    let outcome = client.chat(&conversation, "hi", &options()).await.unwrap();

    let text = outcome.text().unwrap().to_string();
    assert!(client.config().filter.safe_responses.contains(&text));
    assert_eq!(conversation.messages()[2].content, text);
}

#[tokio::test]
async fn test_second_call_while_in_flight_is_rejected() {
    let fake = FakeBackend::with_models(&["gemma:2b"]).delay(Duration::from_millis(500));
    let client = client(&fake.spawn().await, "gemma:2b");
    let conversation = client.new_conversation();

    let opts = options();
    let (first, second) = tokio::join!(client.chat(&conversation, "first", &opts), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.chat(&conversation, "second", &options()).await
    });

    assert_eq!(first.unwrap(), ChatOutcome::Reply("Hello!".to_string()));
    assert!(matches!(second, Err(ChatError::RequestInProgress)));

    let messages = conversation.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].content, "first");
    assert!(!conversation.is_busy());
}

#[tokio::test]
async fn test_separate_conversations_run_concurrently() {
    let fake = FakeBackend::with_models(&["gemma:2b"]).delay(Duration::from_millis(200));
    let client = client(&fake.spawn().await, "gemma:2b");
    let a = client.new_conversation();
    let b = client.new_conversation();

    let opts = options();
    let (first, second) = tokio::join!(
        client.chat(&a, "one", &opts),
        client.chat(&b, "two", &opts)
    );

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(a.messages()[1].content, "one");
    assert_eq!(b.messages()[1].content, "two");
}

#[tokio::test]
async fn test_stream_delivers_raw_chunks() {
    let fake = FakeBackend::with_models(&["gemma:2b"]).streaming(&[
        r#"{"response":"Hi"}"#,
        r#"{"response":" there"}"#,
        r#"{"done":true}"#,
    ]);
    let client = client(&fake.spawn().await, "gemma:2b");
    let conversation = client.new_conversation();
    let mut chunks = Vec::new();

    let outcome = client
        .chat_stream(&conversation, "hello", &options(), &StreamControl::default(), |c| {
            chunks.push(c.to_string())
        })
        .await
        .unwrap();

    assert_eq!(chunks, vec!["Hi", " there"]);
    assert_eq!(outcome, ChatOutcome::Reply("Hi there".to_string()));
    assert_eq!(conversation.messages()[2].content, "Hi there");
}

#[tokio::test]
async fn test_stream_filters_only_the_final_text() {
    let fake = FakeBackend::with_models(&["gemma:2b"]).streaming(&[
        r#"{"message":{"role":"assistant","content":"<thi"}}"#,
        "garbage",
        r#"{"message":{"content":"nk>plan</think>"}}"#,
        r#"{"message":{"content":"Answer"}}"#,
        r#"{"message":{"content":""},"done":true}"#,
    ]);
    let client = client(&fake.spawn().await, "gemma:2b");
    let conversation = client.new_conversation();
    let mut streamed = String::new();

    let outcome = client
        .chat_stream(&conversation, "hello", &options(), &StreamControl::default(), |c| {
            streamed.push_str(c)
        })
        .await
        .unwrap();

    assert_eq!(streamed, "<think>plan</think>Answer");
    assert_eq!(outcome, ChatOutcome::Reply("Answer".to_string()));
}

#[tokio::test]
async fn test_stream_without_terminal_frame_is_best_effort() {
    let fake = FakeBackend::with_models(&["gemma:2b"])
        .streaming(&[r#"{"response":"partial"}"#, r#"{"response":" answer"}"#]);
    let client = client(&fake.spawn().await, "gemma:2b");
    let conversation = client.new_conversation();

    let outcome = client
        .chat_stream(&conversation, "hello", &options(), &StreamControl::default(), |_| {})
        .await
        .unwrap();

    assert_eq!(outcome, ChatOutcome::Reply("partial answer".to_string()));
}

#[tokio::test]
async fn test_cancel_discards_partial_reply() {
    let fake = FakeBackend::with_models(&["gemma:2b"])
        .streaming(&[r#"{"response":"Hi"}"#, r#"{"response":" there"}"#, r#"{"done":true}"#])
        .frame_delay(Duration::from_secs(5));
    let client = client(&fake.spawn().await, "gemma:2b");
    let conversation = client.new_conversation();
    let control = StreamControl::default();

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        client.chat_stream(&conversation, "hello", &options(), &control, |_| {
            control.cancel.cancel()
        }),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(outcome, ChatOutcome::Cancelled { kept: None });
    assert_eq!(conversation.len(), 1);
    assert!(!conversation.is_busy());
}

#[tokio::test]
async fn test_cancel_before_headers_returns_promptly() {
    let fake = FakeBackend::with_models(&["gemma:2b"])
        .streaming(&[r#"{"response":"Hi"}"#, r#"{"done":true}"#])
        .header_delay(Duration::from_secs(4));
    let client = client(&fake.spawn().await, "gemma:2b");
    let conversation = client.new_conversation();
    let control = StreamControl::default();

    let cancel = control.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let started = std::time::Instant::now();
    let mut chunks = Vec::new();
    let outcome = client
        .chat_stream(&conversation, "hello", &options(), &control, |chunk| {
            chunks.push(chunk.to_string())
        })
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(outcome, ChatOutcome::Cancelled { kept: None });
    assert!(chunks.is_empty());
    assert_eq!(conversation.len(), 1);
    assert!(!conversation.is_busy());
}

#[tokio::test]
async fn test_cancel_can_keep_partial_reply() {
    let fake = FakeBackend::with_models(&["gemma:2b"])
        .streaming(&[r#"{"response":"Hi"}"#, r#"{"response":" there"}"#, r#"{"done":true}"#])
        .frame_delay(Duration::from_secs(5));
    let client = client(&fake.spawn().await, "gemma:2b");
    let conversation = client.new_conversation();
    let control = StreamControl {
        keep_partial: true,
        ..Default::default()
    };

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        client.chat_stream(&conversation, "hello", &options(), &control, |_| {
            control.cancel.cancel()
        }),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(
        outcome,
        ChatOutcome::Cancelled {
            kept: Some("Hi".to_string())
        }
    );
    assert_eq!(conversation.messages()[2].content, "Hi");
}

#[tokio::test]
async fn test_falls_back_to_first_installed_model() {
    let fake = FakeBackend::with_models(&["gemma:2b"]);
    let base_url = fake.spawn().await;
    let config = ChatConfig::builder()
        .base_url(base_url)
        .default_model("qwen3:0.6b")
        .fallback_models(["qwen3:0.6b"])
        .build();
    let client = InferenceClient::new(config).unwrap();

    let selection = client.resolve_model().await.unwrap();
    assert_eq!(selection.name, "gemma:2b");
    assert!(selection.degraded);

    client
        .generate("hello", None, &options())
        .await
        .unwrap();
    assert_eq!(fake.requested_models(), vec!["gemma:2b"]);
}

#[tokio::test]
async fn test_empty_inventory_has_no_model() {
    let fake = FakeBackend::with_models(&[]);
    let client = client(&fake.spawn().await, "gemma:2b");
    let conversation = client.new_conversation();

    let err = client.chat(&conversation, "hello", &options()).await.unwrap_err();
    assert!(matches!(err, ChatError::NoModelAvailable));
    assert_eq!(conversation.len(), 1);
}

#[tokio::test]
async fn test_failed_model_is_retried_once_on_another() {
    let fake = FakeBackend::with_models(&["gemma:2b", "qwen2:0.5b"]).failing(&["gemma:2b"]);
    let client = client(&fake.spawn().await, "gemma:2b");
    let conversation = client.new_conversation();

    let outcome = client.chat(&conversation, "hello", &options()).await.unwrap();

    assert_eq!(outcome, ChatOutcome::Reply("Hello!".to_string()));
    assert_eq!(fake.requested_models(), vec!["gemma:2b", "qwen2:0.5b"]);
    assert_eq!(client.resolve_model().await.unwrap().name, "qwen2:0.5b");
}

#[tokio::test]
async fn test_retry_gives_up_after_one_attempt() {
    let fake = FakeBackend::with_models(&["gemma:2b", "qwen2:0.5b", "mistral:7b"])
        .failing(&["gemma:2b", "qwen2:0.5b", "mistral:7b"]);
    let client = client(&fake.spawn().await, "gemma:2b");
    let conversation = client.new_conversation();

    let err = client.chat(&conversation, "hello", &options()).await.unwrap_err();

    match err {
        ChatError::Backend(e) => assert_eq!(e.code(), "BACKEND_ERROR"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fake.requested_models().len(), 2);
    assert_eq!(conversation.len(), 1);
}

#[tokio::test]
async fn test_stream_retries_before_first_chunk() {
    let fake = FakeBackend::with_models(&["gemma:2b", "qwen2:0.5b"])
        .failing(&["gemma:2b"])
        .streaming(&[r#"{"response":"Hi"}"#, r#"{"done":true}"#]);
    let client = client(&fake.spawn().await, "gemma:2b");
    let conversation = client.new_conversation();

    let outcome = client
        .chat_stream(&conversation, "hello", &options(), &StreamControl::default(), |_| {})
        .await
        .unwrap();

    assert_eq!(outcome, ChatOutcome::Reply("Hi".to_string()));
    assert_eq!(fake.requested_models(), vec!["gemma:2b", "qwen2:0.5b"]);
}

#[tokio::test]
async fn test_generate_uses_system_prompt() {
    let fake = FakeBackend::with_models(&["gemma:2b"]).replying("Sure.");
    let client = client(&fake.spawn().await, "gemma:2b");

    client.generate("hello", None, &options()).await.unwrap();
    client.generate("hello", Some("Be brief."), &options()).await.unwrap();

    let requests = fake.requests();
    assert_eq!(requests[0]["system"], client.config().system_prompt.clone().unwrap());
    assert_eq!(requests[1]["system"], "Be brief.");
    assert_eq!(requests[1]["prompt"], "hello");
}

#[tokio::test]
async fn test_backend_down_is_connection_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = client(&format!("http://{}", addr), "gemma:2b");
    let conversation = client.new_conversation();

    let err = client.chat(&conversation, "hello", &options()).await.unwrap_err();
    assert!(err.is_connection_failure());
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, u64)>>,
}

#[async_trait]
impl StatsReporter for Recorder {
    async fn update_stat(&self, name: &str, value: u64) -> Result<(), StatsError> {
        self.seen.lock().push((name.to_string(), value));
        Ok(())
    }
}

#[tokio::test]
async fn test_completed_turns_are_reported() {
    let fake = FakeBackend::with_models(&["gemma:2b"]);
    let recorder = Arc::new(Recorder::default());
    let client = client(&fake.spawn().await, "gemma:2b").with_stats(recorder.clone());
    let conversation = client.new_conversation();

    client.chat(&conversation, "one", &options()).await.unwrap();
    client.chat(&conversation, "two", &options()).await.unwrap();
    client.chat(&conversation, "how to kill", &options()).await.unwrap();

    let stats = client.stats();
    assert_eq!(stats.conversation_count, 2);
    assert_eq!(stats.total_messages, 4);

    for _ in 0..50 {
        if recorder.seen.lock().len() == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(recorder
        .seen
        .lock()
        .contains(&("total_messages".to_string(), 4)));
}
