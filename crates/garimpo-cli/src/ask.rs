use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use garimpo_agents::conversation::assemble;
use garimpo_agents::{AgentRequest, ChannelSink, StreamEvent, drive_turn};
use garimpo_common::Sender;
use garimpo_config::AppConfig;
use garimpo_gateway::AppState;
use garimpo_gateway::chat::StoreRecorder;
use garimpo_gateway::state::lock;
use garimpo_security::InputValidator;

const EVENT_BUFFER: usize = 256;

/// One question, answered in a fresh conversation. Statuses go to stderr, the answer to stdout.
pub async fn run(config: AppConfig, user: &str, message: &str) -> Result<()> {
    let user_id = InputValidator::identifier(user, "user id")?;
    let message = InputValidator::chat_message(message)?;
    let state = AppState::from_config(config).context("failed to initialize")?;

    let title = state.runtime.narrator().generate_title(&message).await;
    let conversation = lock(&state.conversations)?.create_conversation(&user_id, &title)?;
    lock(&state.conversations)?.append_message(&conversation.id, Sender::User, &message, &[])?;
    let history = lock(&state.conversations)?.get_history(&conversation.id)?;
    let preferences = lock(&state.preferences)?.get(&user_id)?;

    let request = AgentRequest {
        process_id: uuid::Uuid::new_v4().to_string(),
        conversation_id: conversation.id.clone(),
        user_id,
        messages: assemble(&state.persona, preferences.as_ref(), &history),
    };

    let (sink, mut events) = ChannelSink::channel(EVENT_BUFFER);
    let recorder = Arc::new(StoreRecorder::new(Arc::clone(&state.conversations)));
    let driver = tokio::spawn(drive_turn(
        Arc::clone(&state.runtime),
        request,
        Arc::new(sink),
        recorder,
    ));

    let mut stdout = std::io::stdout();
    let mut failure = None;
    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Status { message } => eprintln!("… {message}"),
            StreamEvent::Chunk { content } => {
                print!("{content}");
                stdout.flush().ok();
            }
            StreamEvent::Error { message } => failure = Some(message),
            StreamEvent::Close => break,
            _ => {}
        }
    }
    println!();

    let report = driver.await.context("agent task failed")?;
    if let Some(message) = failure.or(report.error) {
        bail!(message);
    }
    eprintln!("(conversation {} \"{title}\")", conversation.id);
    Ok(())
}
