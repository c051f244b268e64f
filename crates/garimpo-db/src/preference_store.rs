use garimpo_common::{DEFAULT_MAX_ITEMS, Error, PreferenceCategory, PreferenceSet, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use tracing::{debug, warn};

use crate::{now_timestamp, open_connection, open_in_memory};

/// Per-user preference storage, one JSON document per user.
pub struct PreferenceStore {
    conn: Connection,
    max_items: usize,
}

impl PreferenceStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let store = Self {
            conn: open_connection(db_path)?,
            max_items: DEFAULT_MAX_ITEMS,
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: open_in_memory()?,
            max_items: DEFAULT_MAX_ITEMS,
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items.max(1);
        self
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS user_preferences (
                    user_id TEXT PRIMARY KEY,
                    data TEXT NOT NULL DEFAULT '{}',
                    updated_at TEXT NOT NULL
                );",
            )
            .map_err(|e| Error::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Preferences for `user_id`, or `None` if the user never saved any.
    pub fn get(&self, user_id: &str) -> Result<Option<PreferenceSet>> {
        load(&self.conn, user_id)
    }

    /// Add one value to a category and return the updated set.
    pub fn add_item(
        &mut self,
        user_id: &str,
        category: PreferenceCategory,
        value: &str,
    ) -> Result<PreferenceSet> {
        let max_items = self.max_items;
        self.modify(user_id, |prefs| {
            if !prefs.add(category, value, max_items) {
                return Err(Error::Validation("preference value must not be empty".into()));
            }
            Ok(())
        })
    }

    /// Remove one value from a category. Returns whether it was present.
    pub fn remove_item(
        &mut self,
        user_id: &str,
        category: PreferenceCategory,
        value: &str,
    ) -> Result<bool> {
        let mut removed = false;
        self.modify(user_id, |prefs| {
            removed = prefs.remove(category, value);
            Ok(())
        })?;
        Ok(removed)
    }

    /// Set or clear the free-text note.
    pub fn set_notes(&mut self, user_id: &str, notes: Option<&str>) -> Result<PreferenceSet> {
        let notes = notes
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        self.modify(user_id, |prefs| {
            prefs.other_notes = notes;
            Ok(())
        })
    }

    fn modify(
        &mut self,
        user_id: &str,
        change: impl FnOnce(&mut PreferenceSet) -> Result<()>,
    ) -> Result<PreferenceSet> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

        let mut prefs = load(&tx, user_id)?.unwrap_or_default();
        change(&mut prefs)?;
        store(&tx, user_id, &prefs)?;

        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit preferences: {e}")))?;
        debug!("updated preferences for user {user_id}");
        Ok(prefs)
    }
}

fn load(conn: &Connection, user_id: &str) -> Result<Option<PreferenceSet>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT data FROM user_preferences WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to load preferences: {e}")))?;

    raw.map(|raw| decode_document(user_id, &raw)).transpose()
}

fn store(conn: &Connection, user_id: &str, prefs: &PreferenceSet) -> Result<()> {
    let data = serde_json::to_string(prefs)
        .map_err(|e| Error::Database(format!("failed to encode preferences: {e}")))?;
    conn.execute(
        "INSERT INTO user_preferences (user_id, data, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET
           data = excluded.data,
           updated_at = excluded.updated_at",
        params![user_id, data, now_timestamp()],
    )
    .map_err(|e| Error::Database(format!("failed to save preferences: {e}")))?;
    Ok(())
}

/// Rebuild a `PreferenceSet` from stored JSON, keeping only known categories.
fn decode_document(user_id: &str, raw: &str) -> Result<PreferenceSet> {
    let doc: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| Error::Database(format!("corrupt preferences for {user_id}: {e}")))?;
    let Some(fields) = doc.as_object() else {
        return Err(Error::Database(format!(
            "preferences for {user_id} are not an object"
        )));
    };

    let mut prefs = PreferenceSet::default();
    for (key, value) in fields {
        if key == "other_notes" {
            prefs.other_notes = value.as_str().map(str::to_string);
            continue;
        }
        let Ok(category) = key.parse::<PreferenceCategory>() else {
            warn!("dropping unknown preference key '{key}' for user {user_id}");
            continue;
        };
        let items = value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        serde_json::Value::String(s) => Some(s.clone()),
                        serde_json::Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        *prefs.list_mut(category) = items;
    }
    Ok(prefs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_write_creates_the_set() {
        let mut store = PreferenceStore::in_memory().unwrap();
        assert!(store.get("ana").unwrap().is_none());

        store
            .add_item("ana", PreferenceCategory::FavoriteGenres, "Drama")
            .unwrap();
        let prefs = store.get("ana").unwrap().unwrap();
        assert_eq!(prefs.favorite_genres, vec!["Drama".to_string()]);
    }

    #[test]
    fn cap_is_applied_on_write() {
        let mut store = PreferenceStore::in_memory().unwrap().with_max_items(3);
        for actor in ["A", "B", "C", "D"] {
            store
                .add_item("ana", PreferenceCategory::FavoriteActors, actor)
                .unwrap();
        }
        let prefs = store.get("ana").unwrap().unwrap();
        assert_eq!(prefs.favorite_actors, vec!["B", "C", "D"]);
    }

    #[test]
    fn blank_value_is_rejected_without_writing() {
        let mut store = PreferenceStore::in_memory().unwrap();
        let err = store
            .add_item("ana", PreferenceCategory::MovieMoods, "  ")
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.get("ana").unwrap().is_none());
    }

    #[test]
    fn remove_item_reports_presence() {
        let mut store = PreferenceStore::in_memory().unwrap();
        store
            .add_item("ana", PreferenceCategory::DislikedGenres, "Horror")
            .unwrap();
        assert!(
            store
                .remove_item("ana", PreferenceCategory::DislikedGenres, "horror")
                .unwrap()
        );
        assert!(
            !store
                .remove_item("ana", PreferenceCategory::DislikedGenres, "horror")
                .unwrap()
        );
    }

    #[test]
    fn notes_can_be_set_and_cleared() {
        let mut store = PreferenceStore::in_memory().unwrap();
        let prefs = store.set_notes("ana", Some(" prefers subtitles ")).unwrap();
        assert_eq!(prefs.other_notes.as_deref(), Some("prefers subtitles"));
        let prefs = store.set_notes("ana", None).unwrap();
        assert!(prefs.other_notes.is_none());
    }

    #[test]
    fn unknown_stored_keys_are_dropped_on_load() {
        let store = PreferenceStore::in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO user_preferences (user_id, data, updated_at) VALUES (?1, ?2, ?3)",
                params![
                    "ana",
                    r#"{"favorite_genres":["Drama"],"is_admin":["true"],"favorite_movies":[603]}"#,
                    now_timestamp()
                ],
            )
            .unwrap();

        let prefs = store.get("ana").unwrap().unwrap();
        assert_eq!(prefs.favorite_genres, vec!["Drama".to_string()]);
        assert_eq!(prefs.favorite_movies, vec!["603".to_string()]);
        let reencoded = serde_json::to_value(&prefs).unwrap();
        assert!(reencoded.get("is_admin").is_none());
    }
}
