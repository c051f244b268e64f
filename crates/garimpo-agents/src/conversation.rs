use garimpo_common::{PreferenceCategory, PreferenceSet, Sender, StoredMessage};

use crate::providers::ChatMessage;

const DEFAULT_PERSONA: &str = "You are Garimpo, a warm and witty movie expert who helps people \
find their next favorite film. Always use the available tools to look up real, current \
information about movies, people, releases and where to watch them instead of relying on \
memory. When recommending, explain briefly why each pick fits the user's taste. \
When the user mentions something they like or dislike, save it as a preference. \
Check saved preferences before recommending. Keep answers friendly and concise, \
and format lists with Markdown.";

const PREFERENCES_ACK: &str = "Got it, I saved your preferences! I'll keep them in mind.";

/// System prompt for the agent: the built-in persona (or an override) plus an optional language hint.
pub fn persona(override_text: Option<&str>, language: Option<&str>) -> String {
    let mut prompt = override_text
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or(DEFAULT_PERSONA)
        .to_string();
    if let Some(language) = language.map(str::trim).filter(|l| !l.is_empty()) {
        prompt.push_str(&format!("\n\nAlways answer in {language}."));
    }
    prompt
}

/// Build the message list for one agent run, in fixed order:
/// persona, optional preference exchange, then the persisted history.
pub fn assemble(
    persona: &str,
    preferences: Option<&PreferenceSet>,
    history: &[StoredMessage],
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 3);
    messages.push(ChatMessage::system(persona));

    if let Some(summary) = preferences.and_then(preference_summary) {
        messages.push(ChatMessage::user(summary));
        messages.push(ChatMessage::assistant(PREFERENCES_ACK));
    }

    messages.extend(history.iter().map(|message| match message.sender {
        Sender::User => ChatMessage::user(message.text.clone()),
        Sender::Ai => ChatMessage::assistant(message.text.clone()),
    }));
    messages
}

/// Natural-language summary of the non-empty preference categories, or `None` if nothing is saved.
pub fn preference_summary(preferences: &PreferenceSet) -> Option<String> {
    let mut clauses: Vec<String> = preferences
        .non_empty()
        .map(|(category, values)| clause(category, values))
        .collect();

    if let Some(notes) = preferences
        .other_notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
    {
        clauses.push(format!("Other notes: {notes}"));
    }

    if clauses.is_empty() {
        return None;
    }
    Some(format!("Remember my preferences: {}.", clauses.join("; ")))
}

fn clause(category: PreferenceCategory, values: &[String]) -> String {
    let list = values.join(", ");
    match category {
        PreferenceCategory::FavoriteGenres => format!("I like {list} movies"),
        PreferenceCategory::FavoriteActors => format!("my favorite actors are {list}"),
        PreferenceCategory::FavoriteDirectors => format!("my favorite directors are {list}"),
        PreferenceCategory::FavoriteMovies => "I already saved some favorite movies".to_string(),
        PreferenceCategory::FavoriteDecades => format!("I enjoy movies from the {list}"),
        PreferenceCategory::DislikedGenres => format!("I don't like {list} movies"),
        PreferenceCategory::DislikedActors => format!("I'd rather avoid movies with {list}"),
        PreferenceCategory::MovieMoods => format!("I'm usually in the mood for {list}"),
    }
}
