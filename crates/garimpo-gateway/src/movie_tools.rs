use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use garimpo_agents::tools::{ToolContext, ToolHandler, ToolInvocation};
use garimpo_common::{Error, Result};
use garimpo_db::PreferenceStore;
use serde_json::{Value, json};
use tracing::info;

use crate::tmdb::TmdbClient;

/// Runs every movie and preference tool on behalf of the calling user.
pub struct MovieToolHandler {
    catalog: Arc<TmdbClient>,
    preferences: Arc<Mutex<PreferenceStore>>,
}

impl MovieToolHandler {
    pub fn new(catalog: Arc<TmdbClient>, preferences: Arc<Mutex<PreferenceStore>>) -> Self {
        Self {
            catalog,
            preferences,
        }
    }

    fn with_preferences<T>(&self, f: impl FnOnce(&mut PreferenceStore) -> Result<T>) -> Result<T> {
        let mut store = self
            .preferences
            .lock()
            .map_err(|_| Error::Database("preference store lock poisoned".into()))?;
        f(&mut store)
    }
}

#[async_trait]
impl ToolHandler for MovieToolHandler {
    async fn handle(&self, invocation: ToolInvocation, context: &ToolContext) -> Result<Value> {
        let user_id = context.user_id.as_str();
        let output = match invocation {
            ToolInvocation::SearchMoviesByKeyword { query } => {
                self.catalog.search_movies(&query).await
            }
            ToolInvocation::GetMovieDetails { title } => self.catalog.movie_details(&title).await,
            ToolInvocation::DiscoverMovies(filters) => self.catalog.discover(&filters).await,
            ToolInvocation::GetPersonFilmography { person_name } => {
                self.catalog.person_filmography(&person_name).await
            }
            ToolInvocation::GetNowPlayingMovies => self.catalog.now_playing().await,
            ToolInvocation::GetPopularMovies => self.catalog.popular().await,
            ToolInvocation::GetTopRatedMovies => self.catalog.top_rated().await,
            ToolInvocation::GetUpcomingMovies { target_year } => {
                self.catalog.upcoming(target_year).await
            }
            ToolInvocation::GetSimilarMovies { title } => self.catalog.similar(&title).await,
            ToolInvocation::GetMovieCast { title } => self.catalog.cast(&title).await,
            ToolInvocation::GetWatchProviders { title } => {
                self.catalog.watch_providers(&title).await
            }
            ToolInvocation::SaveUserPreference { category, value } => {
                self.with_preferences(|store| store.add_item(user_id, category, &value))?;
                info!(category = %category, "saved user preference");
                Value::String(format!("Saved \"{value}\" to {}.", category.label()))
            }
            ToolInvocation::RemoveUserPreference { category, value } => {
                let removed =
                    self.with_preferences(|store| store.remove_item(user_id, category, &value))?;
                if removed {
                    Value::String(format!("Removed \"{value}\" from {}.", category.label()))
                } else {
                    Value::String(format!("\"{value}\" was not in {}.", category.label()))
                }
            }
            ToolInvocation::GetUserPreferences => {
                match self.with_preferences(|store| store.get(user_id))? {
                    Some(prefs) if !prefs.is_empty() => json!(prefs),
                    _ => Value::String(
                        "The user has no saved preferences yet. Ask about their favorite genres, \
                         actors, directors or movies."
                            .to_string(),
                    ),
                }
            }
        };
        Ok(output)
    }
}
