mod invocation;

pub use invocation::{DiscoverFilters, SortOrder, ToolInvocation};

use async_trait::async_trait;
use garimpo_common::{Error, Result};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::providers::ToolDefinition;

/// Every tool the model may call. Adding a variant forces a schema and a handler arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    SearchMoviesByKeyword,
    GetMovieDetails,
    DiscoverMovies,
    GetPersonFilmography,
    GetNowPlayingMovies,
    GetPopularMovies,
    GetTopRatedMovies,
    GetUpcomingMovies,
    GetSimilarMovies,
    GetMovieCast,
    GetWatchProviders,
    SaveUserPreference,
    RemoveUserPreference,
    GetUserPreferences,
}

impl ToolName {
    pub const ALL: [ToolName; 14] = [
        ToolName::SearchMoviesByKeyword,
        ToolName::GetMovieDetails,
        ToolName::DiscoverMovies,
        ToolName::GetPersonFilmography,
        ToolName::GetNowPlayingMovies,
        ToolName::GetPopularMovies,
        ToolName::GetTopRatedMovies,
        ToolName::GetUpcomingMovies,
        ToolName::GetSimilarMovies,
        ToolName::GetMovieCast,
        ToolName::GetWatchProviders,
        ToolName::SaveUserPreference,
        ToolName::RemoveUserPreference,
        ToolName::GetUserPreferences,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::SearchMoviesByKeyword => "search_movies_by_keyword",
            ToolName::GetMovieDetails => "get_movie_details",
            ToolName::DiscoverMovies => "discover_movies",
            ToolName::GetPersonFilmography => "get_person_filmography",
            ToolName::GetNowPlayingMovies => "get_now_playing_movies",
            ToolName::GetPopularMovies => "get_popular_movies",
            ToolName::GetTopRatedMovies => "get_top_rated_movies",
            ToolName::GetUpcomingMovies => "get_upcoming_movies",
            ToolName::GetSimilarMovies => "get_similar_movies",
            ToolName::GetMovieCast => "get_movie_cast",
            ToolName::GetWatchProviders => "get_watch_providers",
            ToolName::SaveUserPreference => "save_user_preference",
            ToolName::RemoveUserPreference => "remove_user_preference",
            ToolName::GetUserPreferences => "get_user_preferences",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolName::SearchMoviesByKeyword => {
                "Search movies by a keyword or partial title. Returns up to five matches."
            }
            ToolName::GetMovieDetails => {
                "Get full details for one movie: overview, release date, rating, genres, director and main cast."
            }
            ToolName::DiscoverMovies => {
                "Discover movies by genre, rating range and release year. Use for recommendations by criteria."
            }
            ToolName::GetPersonFilmography => {
                "List the best-known movies an actor or director worked on."
            }
            ToolName::GetNowPlayingMovies => "List movies currently playing in theaters.",
            ToolName::GetPopularMovies => "List the movies that are popular right now.",
            ToolName::GetTopRatedMovies => "List the highest rated movies of all time.",
            ToolName::GetUpcomingMovies => {
                "List upcoming releases, optionally only those releasing in a given year."
            }
            ToolName::GetSimilarMovies => "Find movies similar to a given movie.",
            ToolName::GetMovieCast => "List the main cast of a movie and the characters they play.",
            ToolName::GetWatchProviders => {
                "Find where a movie can be streamed, rented or bought in the user's region."
            }
            ToolName::SaveUserPreference => {
                "Remember something the user likes or dislikes (genres, actors, directors, movies, decades, moods)."
            }
            ToolName::RemoveUserPreference => "Forget one previously saved user preference.",
            ToolName::GetUserPreferences => {
                "Read the user's saved preferences before recommending something."
            }
        }
    }

    pub fn input_schema(&self) -> Value {
        let title = json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Movie title exactly as the user wrote it" }
            },
            "required": ["title"]
        });
        let categories: Vec<&str> = garimpo_common::PreferenceCategory::ALL
            .iter()
            .map(|c| c.as_str())
            .collect();
        let preference = json!({
            "type": "object",
            "properties": {
                "category": {
                    "type": "string",
                    "enum": categories
                },
                "value": { "type": "string" }
            },
            "required": ["category", "value"]
        });
        let no_args = json!({ "type": "object", "properties": {} });

        match self {
            ToolName::SearchMoviesByKeyword => json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Keyword or partial title" }
                },
                "required": ["query"]
            }),
            ToolName::GetMovieDetails
            | ToolName::GetSimilarMovies
            | ToolName::GetMovieCast
            | ToolName::GetWatchProviders => title,
            ToolName::DiscoverMovies => json!({
                "type": "object",
                "properties": {
                    "genre_name": { "type": "string", "description": "Genre name, e.g. Comedy" },
                    "min_rating": { "type": "number", "minimum": 0, "maximum": 10 },
                    "max_rating": { "type": "number", "minimum": 0, "maximum": 10 },
                    "year": { "type": "integer", "description": "Primary release year" },
                    "sort_by": {
                        "type": "string",
                        "enum": ["vote_average.desc", "vote_average.asc", "popularity.desc"]
                    }
                }
            }),
            ToolName::GetPersonFilmography => json!({
                "type": "object",
                "properties": {
                    "person_name": { "type": "string", "description": "Actor or director name" }
                },
                "required": ["person_name"]
            }),
            ToolName::GetUpcomingMovies => json!({
                "type": "object",
                "properties": {
                    "target_year": { "type": "integer" }
                }
            }),
            ToolName::SaveUserPreference | ToolName::RemoveUserPreference => preference,
            ToolName::GetNowPlayingMovies
            | ToolName::GetPopularMovies
            | ToolName::GetTopRatedMovies
            | ToolName::GetUserPreferences => no_args,
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.as_str().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ToolName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnknownTool(s.to_string()))
    }
}

/// Who a tool runs on behalf of. Never part of the model-visible arguments.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: String,
    pub conversation_id: String,
}

/// Executes parsed tool invocations.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Returns JSON data, or a JSON string describing why nothing was found.
    async fn handle(&self, invocation: ToolInvocation, context: &ToolContext) -> Result<Value>;
}

/// The set of tools advertised to the model and the handler that runs them.
pub struct ToolRegistry {
    enabled: Vec<ToolName>,
    handler: Arc<dyn ToolHandler>,
}

impl ToolRegistry {
    /// Registry advertising every tool.
    pub fn new(handler: Arc<dyn ToolHandler>) -> Self {
        Self::with_tools(handler, &ToolName::ALL)
    }

    pub fn with_tools(handler: Arc<dyn ToolHandler>, tools: &[ToolName]) -> Self {
        let mut enabled = Vec::with_capacity(tools.len());
        for tool in tools {
            if !enabled.contains(tool) {
                enabled.push(*tool);
            }
        }
        Self { enabled, handler }
    }

    pub fn list_schemas(&self) -> Vec<ToolDefinition> {
        self.enabled.iter().map(ToolName::definition).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    fn resolve(&self, name: &str) -> Result<ToolName> {
        let tool: ToolName = name.parse()?;
        if self.enabled.contains(&tool) {
            Ok(tool)
        } else {
            Err(Error::UnknownTool(name.to_string()))
        }
    }

    /// Run tool `name`. Unregistered names fail with `Error::UnknownTool`;
    /// handler failures propagate untouched.
    pub async fn execute(&self, name: &str, arguments: Value, context: &ToolContext) -> Result<Value> {
        let tool = self.resolve(name)?;
        let invocation = ToolInvocation::parse(tool, arguments)?;
        self.handler.handle(invocation, context).await
    }
}
