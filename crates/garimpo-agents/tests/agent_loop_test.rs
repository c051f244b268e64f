use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use garimpo_agents::runtime::{TOOL_FAILURE_APOLOGY, UNKNOWN_TOOL_APOLOGY};
use garimpo_agents::{
    AgentRequest, AgentRuntime, ChannelSink, ChatMessage, ChatRole, ContentBlock, EventSink,
    LlmProvider, LlmRequest, LlmResponse, LlmStream, LlmStreamResponse, MessagePart, RunStatus,
    StatusNarrator, StreamContent, StreamEvent, ToolContext, ToolHandler, ToolInvocation,
    ToolRegistry, ToolUseDelta, TranscriptRecorder, drive_turn,
};
use garimpo_common::{Error, Result, ThoughtLogEntry};
use serde_json::{Value, json};
use tokio::sync::Notify;

#[derive(Clone)]
enum Step {
    Text(&'static str),
    Tool {
        index: u32,
        name: &'static str,
        args: &'static str,
    },
    Fail,
}

type Responder = Box<dyn Fn(&LlmRequest) -> Vec<Step> + Send + Sync>;

/// Streams scripted turns; falls back to `responder` once the script runs out.
struct ScriptedProvider {
    script: Mutex<VecDeque<Vec<Step>>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedProvider {
    fn new(script: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            responder: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn with_responder(responder: Responder) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            responder: Some(responder),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn to_item(step: Step) -> Result<LlmStreamResponse> {
    let delta = match step {
        Step::Text(text) => StreamContent::Text(text.to_string()),
        Step::Tool { index, name, args } => StreamContent::ToolUse(ToolUseDelta {
            index,
            id: Some(format!("call_{index}")),
            name: Some(name.to_string()),
            input: args.to_string(),
        }),
        Step::Fail => return Err(Error::Agent("upstream connection reset".into())),
    };
    Ok(LlmStreamResponse {
        delta,
        usage: None,
        stop_reason: None,
    })
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse> {
        Err(Error::Agent("scripted provider only streams".into()))
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        self.requests.lock().unwrap().push(request.clone());
        let steps = match self.script.lock().unwrap().pop_front() {
            Some(steps) => steps,
            None => match &self.responder {
                Some(responder) => responder(request),
                None => return Err(Error::Agent("script exhausted".into())),
            },
        };
        let items: Vec<_> = steps.into_iter().map(to_item).collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Narration model that is always down, so status lines use the fallback.
struct OfflineNarrator;

#[async_trait]
impl LlmProvider for OfflineNarrator {
    fn provider_id(&self) -> &str {
        "offline"
    }

    async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse> {
        Err(Error::Agent("narrator offline".into()))
    }

    async fn complete_stream(&self, _request: &LlmRequest) -> Result<LlmStream> {
        Err(Error::Agent("narrator offline".into()))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }
}

#[derive(Default)]
struct StubCatalog {
    finished: Mutex<Vec<String>>,
}

#[async_trait]
impl ToolHandler for StubCatalog {
    async fn handle(&self, invocation: ToolInvocation, _context: &ToolContext) -> Result<Value> {
        let result = match invocation {
            ToolInvocation::GetNowPlayingMovies => Ok(json!([{
                "id": 1,
                "title": "Dune Part Two",
                "overview": "Paul joins the Fremen.",
                "release_date": "2024-02-27",
                "vote_average": 8.2
            }])),
            ToolInvocation::GetMovieDetails { title } => {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok(Value::String(format!("details for {title}")))
            }
            ToolInvocation::GetMovieCast { title } => Ok(json!([{ "name": "Al Pacino", "movie": title }])),
            ToolInvocation::GetPopularMovies => Err(Error::Tool("catalog timed out".into())),
            ToolInvocation::GetTopRatedMovies => Ok(json!("top rated")),
            other => Err(Error::Tool(format!("{:?} not stubbed", other.tool()))),
        };
        self.finished.lock().unwrap().push(format!("{:?}", result.as_ref().ok()));
        result
    }
}

#[derive(Default)]
struct MemoryRecorder {
    saved: Mutex<Vec<(String, String, Vec<ThoughtLogEntry>)>>,
    fail: bool,
}

#[async_trait]
impl TranscriptRecorder for MemoryRecorder {
    async fn record_answer(
        &self,
        conversation_id: &str,
        answer: &str,
        thought_log: &[ThoughtLogEntry],
    ) -> Result<()> {
        if self.fail {
            return Err(Error::Database("disk full".into()));
        }
        self.saved.lock().unwrap().push((
            conversation_id.to_string(),
            answer.to_string(),
            thought_log.to_vec(),
        ));
        Ok(())
    }
}

struct Harness {
    provider: Arc<ScriptedProvider>,
    catalog: Arc<StubCatalog>,
    recorder: Arc<MemoryRecorder>,
    runtime: Arc<AgentRuntime>,
}

impl Harness {
    fn new(provider: Arc<ScriptedProvider>, max_turns: usize) -> Self {
        Self::with_recorder(provider, max_turns, MemoryRecorder::default())
    }

    fn with_recorder(provider: Arc<ScriptedProvider>, max_turns: usize, recorder: MemoryRecorder) -> Self {
        let catalog = Arc::new(StubCatalog::default());
        let registry = Arc::new(ToolRegistry::new(catalog.clone()));
        let narrator = StatusNarrator::new(Arc::new(OfflineNarrator), "narrator");
        let mut runtime = AgentRuntime::new(provider.clone(), registry, narrator, "gpt-4o");
        runtime.set_max_turns(max_turns);
        Self {
            provider,
            catalog,
            recorder: Arc::new(recorder),
            runtime: Arc::new(runtime),
        }
    }

    async fn drive(&self, question: &str) -> Vec<StreamEvent> {
        let (sink, mut rx) = ChannelSink::channel(512);
        let request = AgentRequest {
            process_id: "proc-1".into(),
            conversation_id: "conv-1".into(),
            user_id: "ana".into(),
            messages: vec![ChatMessage::system("persona"), ChatMessage::user(question)],
        };
        drive_turn(
            self.runtime.clone(),
            request,
            Arc::new(sink),
            self.recorder.clone(),
        )
        .await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn saved_answers(&self) -> Vec<String> {
        self.recorder
            .saved
            .lock()
            .unwrap()
            .iter()
            .map(|(_, answer, _)| answer.clone())
            .collect()
    }
}

fn chunks(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

fn kinds_without_status(events: &[StreamEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(StreamEvent::kind)
        .filter(|k| *k != "status")
        .collect()
}

fn assert_single_trailing_close(events: &[StreamEvent]) {
    let closes = events.iter().filter(|e| **e == StreamEvent::Close).count();
    assert_eq!(closes, 1, "exactly one close: {events:?}");
    assert_eq!(events.last(), Some(&StreamEvent::Close));
}

fn tool_results(message_list: &[ChatMessage]) -> Vec<(String, String)> {
    message_list
        .iter()
        .filter(|m| m.role == ChatRole::Tool)
        .filter_map(|m| match &m.content {
            MessagePart::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                } => Some((tool_use_id.clone(), content.clone())),
                _ => None,
            }),
            MessagePart::Text(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn end_to_end_now_playing() {
    let provider = ScriptedProvider::new(vec![
        vec![Step::Tool {
            index: 0,
            name: "get_now_playing_movies",
            args: "",
        }],
        vec![Step::Text("Dune"), Step::Text(" Part Two is in theaters.")],
    ]);
    let harness = Harness::new(provider, 3);

    let events = harness.drive("What's playing in theaters?").await;

    assert_eq!(
        kinds_without_status(&events),
        vec!["process_start", "log_step", "chunk", "chunk", "process_end", "close"]
    );
    assert!(matches!(events[1], StreamEvent::Status { .. }));
    let log_step = events.iter().find(|e| e.kind() == "log_step").unwrap();
    assert_eq!(
        log_step,
        &StreamEvent::LogStep {
            process_id: "proc-1".into(),
            log_type: garimpo_common::LogType::ToolCall,
            payload: json!({"toolName": "get_now_playing_movies", "toolArgs": {}}),
        }
    );

    assert_eq!(chunks(&events), "Dune Part Two is in theaters.");
    assert_eq!(harness.saved_answers(), vec!["Dune Part Two is in theaters."]);

    let saved = harness.recorder.saved.lock().unwrap();
    assert_eq!(saved[0].0, "conv-1");
    assert_eq!(saved[0].2.len(), 1);
    assert_eq!(saved[0].2[0].payload.tool_name, "get_now_playing_movies");
    drop(saved);

    let requests = harness.provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].tools.is_empty());
    let results = tool_results(&requests[1].messages);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "call_0");
    assert!(results[0].1.contains("Dune Part Two"));
}

#[tokio::test]
async fn tool_results_follow_call_index_not_completion_order() {
    let provider = ScriptedProvider::new(vec![
        vec![
            Step::Tool {
                index: 0,
                name: "get_movie_details",
                args: "{\"title\": \"Heat\"}",
            },
            Step::Tool {
                index: 1,
                name: "get_movie_cast",
                args: "{\"title\": \"Heat\"}",
            },
        ],
        vec![Step::Text("Heat is a 1995 crime epic.")],
    ]);
    let harness = Harness::new(provider, 3);

    let events = harness.drive("Tell me about Heat").await;
    assert_single_trailing_close(&events);

    let finished = harness.catalog.finished.lock().unwrap().clone();
    assert_eq!(finished.len(), 2);
    assert!(finished[0].contains("Al Pacino"), "cast finished first: {finished:?}");

    let requests = harness.provider.requests();
    let results = tool_results(&requests[1].messages);
    assert_eq!(
        results.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>(),
        vec!["call_0", "call_1"]
    );
    assert_eq!(results[0].1, "details for Heat");

    let assistant = requests[1]
        .messages
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::Assistant)
        .unwrap();
    let MessagePart::Parts(blocks) = &assistant.content else {
        panic!("assistant turn should carry tool uses");
    };
    assert_eq!(blocks.len(), 2);
}

#[tokio::test]
async fn turn_cap_forces_fallback_answer() {
    let provider = ScriptedProvider::with_responder(Box::new(|request: &LlmRequest| {
        if request.tools.is_empty() {
            vec![Step::Text("Sorry, I couldn't finish that search.")]
        } else {
            vec![Step::Tool {
                index: 0,
                name: "get_top_rated_movies",
                args: "{}",
            }]
        }
    }));
    let harness = Harness::new(provider, 3);

    let events = harness.drive("Find every movie ever").await;

    let requests = harness.provider.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests[..3].iter().all(|r| !r.tools.is_empty()));
    assert!(requests[3].tools.is_empty());
    let last = requests[3].messages.last().unwrap();
    assert_eq!(last.role, ChatRole::System);

    let log_steps = events.iter().filter(|e| e.kind() == "log_step").count();
    assert_eq!(log_steps, 3);
    assert_eq!(chunks(&events), "Sorry, I couldn't finish that search.");
    assert_single_trailing_close(&events);
    assert_eq!(harness.saved_answers(), vec!["Sorry, I couldn't finish that search."]);
}

#[tokio::test]
async fn unknown_tool_short_circuits() {
    let provider = ScriptedProvider::new(vec![
        vec![
            Step::Tool {
                index: 0,
                name: "get_box_office",
                args: "{}",
            },
            Step::Tool {
                index: 1,
                name: "get_top_rated_movies",
                args: "{}",
            },
        ],
        vec![Step::Text("never reached")],
    ]);
    let harness = Harness::new(provider, 3);

    let events = harness.drive("How much did Titanic make?").await;

    assert_eq!(harness.provider.requests().len(), 1);
    assert_eq!(chunks(&events), UNKNOWN_TOOL_APOLOGY);
    assert_single_trailing_close(&events);
    assert!(harness.saved_answers().is_empty());

    // Only the registered tool was logged and run.
    let logged: Vec<&Value> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::LogStep { payload, .. } => Some(payload),
            _ => None,
        })
        .collect();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0]["toolName"], "get_top_rated_movies");
    assert_eq!(harness.catalog.finished.lock().unwrap().len(), 1);

    let Some(StreamEvent::ProcessEnd { thought_log }) =
        events.iter().find(|e| e.kind() == "process_end")
    else {
        panic!("expected process_end: {events:?}");
    };
    assert_eq!(thought_log.len(), 1);
    assert_eq!(thought_log[0].payload.tool_name, "get_top_rated_movies");
}

#[tokio::test]
async fn tool_failure_aborts_without_retry() {
    let provider = ScriptedProvider::new(vec![vec![
        Step::Text("Let me look. "),
        Step::Tool {
            index: 0,
            name: "get_popular_movies",
            args: "",
        },
        Step::Tool {
            index: 1,
            name: "get_now_playing_movies",
            args: "",
        },
    ]]);
    let harness = Harness::new(provider, 3);

    let events = harness.drive("What's hot?").await;

    assert_eq!(harness.provider.requests().len(), 1);
    assert_eq!(chunks(&events), format!("Let me look. {TOOL_FAILURE_APOLOGY}"));
    // Both calls were awaited before the run ended.
    assert_eq!(harness.catalog.finished.lock().unwrap().len(), 2);
    assert_single_trailing_close(&events);
    assert!(harness.saved_answers().is_empty());
}

#[tokio::test]
async fn malformed_arguments_are_a_tool_failure() {
    let provider = ScriptedProvider::new(vec![vec![Step::Tool {
        index: 0,
        name: "get_movie_details",
        args: "{\"title\": ",
    }]]);
    let harness = Harness::new(provider, 3);

    let events = harness.drive("details?").await;
    assert_eq!(chunks(&events), TOOL_FAILURE_APOLOGY);
    assert_single_trailing_close(&events);
}

#[tokio::test]
async fn model_failure_surfaces_error_then_close() {
    let provider = ScriptedProvider::new(vec![vec![Step::Text("Partial"), Step::Fail]]);
    let harness = Harness::new(provider, 3);

    let events = harness.drive("hello").await;

    assert_eq!(
        kinds_without_status(&events),
        vec!["process_start", "chunk", "error", "close"]
    );
    assert!(harness.saved_answers().is_empty());
}

#[tokio::test]
async fn save_failure_reports_error_but_still_closes() {
    let provider = ScriptedProvider::new(vec![vec![Step::Text("Try Central Station.")]]);
    let recorder = MemoryRecorder {
        fail: true,
        ..Default::default()
    };
    let harness = Harness::with_recorder(provider, 3, recorder);

    let events = harness.drive("a Brazilian classic?").await;
    assert_eq!(
        kinds_without_status(&events),
        vec!["process_start", "chunk", "process_end", "error", "close"]
    );
}

#[tokio::test]
async fn disconnected_client_does_not_stop_the_run() {
    let provider = ScriptedProvider::new(vec![
        vec![Step::Tool {
            index: 0,
            name: "get_now_playing_movies",
            args: "",
        }],
        vec![Step::Text("Dune Part Two is in theaters.")],
    ]);
    let harness = Harness::new(provider, 3);

    let (sink, rx) = ChannelSink::channel(8);
    drop(rx);
    let sink: Arc<dyn EventSink> = Arc::new(sink);
    assert!(!sink.is_open());

    let report = drive_turn(
        harness.runtime.clone(),
        AgentRequest {
            process_id: "proc-2".into(),
            conversation_id: "conv-2".into(),
            user_id: "ana".into(),
            messages: vec![ChatMessage::user("What's playing?")],
        },
        sink,
        harness.recorder.clone(),
    )
    .await;

    assert!(report.persisted);
    assert_eq!(report.outcome.unwrap().status, RunStatus::Completed);
    assert_eq!(harness.saved_answers(), vec!["Dune Part Two is in theaters."]);
}

/// First turn emits fragments for calls 0 and 1, then holds the stream open
/// until call 0's handler has run. Later turns answer with text.
struct HeldOpenProvider {
    started: Arc<Notify>,
    turns: Mutex<usize>,
}

#[async_trait]
impl LlmProvider for HeldOpenProvider {
    fn provider_id(&self) -> &str {
        "held-open"
    }

    async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse> {
        Err(Error::Agent("streaming only".into()))
    }

    async fn complete_stream(&self, _request: &LlmRequest) -> Result<LlmStream> {
        let turn = {
            let mut turns = self.turns.lock().unwrap();
            *turns += 1;
            *turns
        };
        if turn > 1 {
            let items = vec![to_item(Step::Text("Heat it is."))];
            return Ok(Box::pin(futures::stream::iter(items)));
        }

        let fragments = vec![
            to_item(Step::Tool {
                index: 0,
                name: "get_movie_details",
                args: "{\"title\": \"Heat\"}",
            }),
            to_item(Step::Tool {
                index: 1,
                name: "get_movie_cast",
                args: "{\"title\": \"Heat\"}",
            }),
        ];
        let started = Arc::clone(&self.started);
        let tail = futures::stream::once(async move {
            match tokio::time::timeout(Duration::from_secs(2), started.notified()).await {
                Ok(()) => to_item(Step::Text("")),
                Err(_) => Err(Error::Agent(
                    "call 0 did not start before the stream ended".into(),
                )),
            }
        });
        Ok(Box::pin(futures::stream::iter(fragments).chain(tail)))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Signals when the details lookup starts.
struct SignallingCatalog {
    started: Arc<Notify>,
}

#[async_trait]
impl ToolHandler for SignallingCatalog {
    async fn handle(&self, invocation: ToolInvocation, _context: &ToolContext) -> Result<Value> {
        match invocation {
            ToolInvocation::GetMovieDetails { title } => {
                self.started.notify_one();
                Ok(Value::String(format!("details for {title}")))
            }
            ToolInvocation::GetMovieCast { .. } => Ok(json!([{ "name": "Robert De Niro" }])),
            other => Err(Error::Tool(format!("{:?} not stubbed", other.tool()))),
        }
    }
}

#[tokio::test]
async fn call_starts_when_next_fragment_arrives_not_at_stream_end() {
    let started = Arc::new(Notify::new());
    let provider = Arc::new(HeldOpenProvider {
        started: Arc::clone(&started),
        turns: Mutex::new(0),
    });
    let registry = Arc::new(ToolRegistry::new(Arc::new(SignallingCatalog {
        started: Arc::clone(&started),
    })));
    let narrator = StatusNarrator::new(Arc::new(OfflineNarrator), "narrator");
    let runtime = AgentRuntime::new(provider, registry, narrator, "gpt-4o");

    let (sink, _rx) = ChannelSink::channel(512);
    let outcome = runtime
        .run(
            AgentRequest {
                process_id: "proc-3".into(),
                conversation_id: "conv-3".into(),
                user_id: "ana".into(),
                messages: vec![ChatMessage::user("Tell me about Heat")],
            },
            Arc::new(sink),
        )
        .await
        .expect("call 0 should run while the stream is still open");

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.answer, "Heat it is.");
    assert_eq!(outcome.thought_log.len(), 2);
}
