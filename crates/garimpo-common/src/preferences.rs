use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default bound on each preference list; the oldest entry is evicted past it.
pub const DEFAULT_MAX_ITEMS: usize = 10;

/// The closed set of preference lists a user can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceCategory {
    FavoriteGenres,
    FavoriteActors,
    FavoriteDirectors,
    FavoriteMovies,
    FavoriteDecades,
    DislikedGenres,
    DislikedActors,
    MovieMoods,
}

impl PreferenceCategory {
    pub const ALL: [PreferenceCategory; 8] = [
        PreferenceCategory::FavoriteGenres,
        PreferenceCategory::FavoriteActors,
        PreferenceCategory::FavoriteDirectors,
        PreferenceCategory::FavoriteMovies,
        PreferenceCategory::FavoriteDecades,
        PreferenceCategory::DislikedGenres,
        PreferenceCategory::DislikedActors,
        PreferenceCategory::MovieMoods,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PreferenceCategory::FavoriteGenres => "favorite_genres",
            PreferenceCategory::FavoriteActors => "favorite_actors",
            PreferenceCategory::FavoriteDirectors => "favorite_directors",
            PreferenceCategory::FavoriteMovies => "favorite_movies",
            PreferenceCategory::FavoriteDecades => "favorite_decades",
            PreferenceCategory::DislikedGenres => "disliked_genres",
            PreferenceCategory::DislikedActors => "disliked_actors",
            PreferenceCategory::MovieMoods => "movie_moods",
        }
    }

    /// Human-readable label used in summaries.
    pub fn label(&self) -> &'static str {
        match self {
            PreferenceCategory::FavoriteGenres => "Favorite genres",
            PreferenceCategory::FavoriteActors => "Favorite actors",
            PreferenceCategory::FavoriteDirectors => "Favorite directors",
            PreferenceCategory::FavoriteMovies => "Favorite movies",
            PreferenceCategory::FavoriteDecades => "Favorite decades",
            PreferenceCategory::DislikedGenres => "Disliked genres",
            PreferenceCategory::DislikedActors => "Disliked actors",
            PreferenceCategory::MovieMoods => "Movie moods",
        }
    }

    /// The list a value must leave when it is added here, if any.
    pub fn opposite(&self) -> Option<PreferenceCategory> {
        match self {
            PreferenceCategory::FavoriteGenres => Some(PreferenceCategory::DislikedGenres),
            PreferenceCategory::DislikedGenres => Some(PreferenceCategory::FavoriteGenres),
            PreferenceCategory::FavoriteActors => Some(PreferenceCategory::DislikedActors),
            PreferenceCategory::DislikedActors => Some(PreferenceCategory::FavoriteActors),
            _ => None,
        }
    }
}

impl std::fmt::Display for PreferenceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PreferenceCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PreferenceCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("'{s}' is not a preference category")))
    }
}

/// A user's preferences: one ordered list per category, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferenceSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub favorite_genres: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub favorite_actors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub favorite_directors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub favorite_movies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub favorite_decades: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disliked_genres: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disliked_actors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub movie_moods: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_notes: Option<String>,
}

impl PreferenceSet {
    pub fn list(&self, category: PreferenceCategory) -> &[String] {
        match category {
            PreferenceCategory::FavoriteGenres => &self.favorite_genres,
            PreferenceCategory::FavoriteActors => &self.favorite_actors,
            PreferenceCategory::FavoriteDirectors => &self.favorite_directors,
            PreferenceCategory::FavoriteMovies => &self.favorite_movies,
            PreferenceCategory::FavoriteDecades => &self.favorite_decades,
            PreferenceCategory::DislikedGenres => &self.disliked_genres,
            PreferenceCategory::DislikedActors => &self.disliked_actors,
            PreferenceCategory::MovieMoods => &self.movie_moods,
        }
    }

    pub fn list_mut(&mut self, category: PreferenceCategory) -> &mut Vec<String> {
        match category {
            PreferenceCategory::FavoriteGenres => &mut self.favorite_genres,
            PreferenceCategory::FavoriteActors => &mut self.favorite_actors,
            PreferenceCategory::FavoriteDirectors => &mut self.favorite_directors,
            PreferenceCategory::FavoriteMovies => &mut self.favorite_movies,
            PreferenceCategory::FavoriteDecades => &mut self.favorite_decades,
            PreferenceCategory::DislikedGenres => &mut self.disliked_genres,
            PreferenceCategory::DislikedActors => &mut self.disliked_actors,
            PreferenceCategory::MovieMoods => &mut self.movie_moods,
        }
    }

    /// Append `value` to the end of `category`.
    ///
    /// An existing match (case-insensitive) is moved to the end instead of duplicated,
    /// the list is trimmed from the front to `max_items`, and the value is dropped from
    /// the opposite list. Returns `false` when the value is blank.
    pub fn add(&mut self, category: PreferenceCategory, value: &str, max_items: usize) -> bool {
        let value = value.trim();
        if value.is_empty() {
            return false;
        }

        if let Some(opposite) = category.opposite() {
            remove_matching(self.list_mut(opposite), value);
        }

        let list = self.list_mut(category);
        remove_matching(list, value);
        list.push(value.to_string());

        let max_items = max_items.max(1);
        if list.len() > max_items {
            let overflow = list.len() - max_items;
            list.drain(..overflow);
        }
        true
    }

    /// Remove `value` from `category`. Returns whether anything was removed.
    pub fn remove(&mut self, category: PreferenceCategory, value: &str) -> bool {
        remove_matching(self.list_mut(category), value.trim())
    }

    /// Non-empty categories in their canonical order.
    pub fn non_empty(&self) -> impl Iterator<Item = (PreferenceCategory, &[String])> {
        PreferenceCategory::ALL
            .into_iter()
            .map(|c| (c, self.list(c)))
            .filter(|(_, values)| !values.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.non_empty().next().is_none()
            && self.other_notes.as_deref().is_none_or(|n| n.trim().is_empty())
    }
}

fn remove_matching(list: &mut Vec<String>, value: &str) -> bool {
    let needle = value.to_lowercase();
    let before = list.len();
    list.retain(|existing| existing.to_lowercase() != needle);
    list.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_only_known_categories() {
        assert_eq!(
            "favorite_genres".parse::<PreferenceCategory>().unwrap(),
            PreferenceCategory::FavoriteGenres
        );
        let err = "password_hash".parse::<PreferenceCategory>().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn eleventh_value_evicts_the_oldest() {
        let mut prefs = PreferenceSet::default();
        for i in 1..=11 {
            prefs.add(PreferenceCategory::FavoriteMovies, &format!("movie {i}"), 10);
        }
        let expected: Vec<String> = (2..=11).map(|i| format!("movie {i}")).collect();
        assert_eq!(prefs.favorite_movies, expected);
    }

    #[test]
    fn re_adding_moves_value_to_the_end() {
        let mut prefs = PreferenceSet::default();
        prefs.add(PreferenceCategory::FavoriteActors, "Fernanda Montenegro", 10);
        prefs.add(PreferenceCategory::FavoriteActors, "Wagner Moura", 10);
        prefs.add(PreferenceCategory::FavoriteActors, "fernanda montenegro", 10);

        assert_eq!(
            prefs.favorite_actors,
            vec!["Wagner Moura".to_string(), "fernanda montenegro".to_string()]
        );
    }

    #[test]
    fn adding_a_favorite_clears_the_dislike() {
        let mut prefs = PreferenceSet::default();
        prefs.add(PreferenceCategory::DislikedGenres, "Horror", 10);
        prefs.add(PreferenceCategory::FavoriteGenres, "horror", 10);

        assert!(prefs.disliked_genres.is_empty());
        assert_eq!(prefs.favorite_genres, vec!["horror".to_string()]);
    }

    #[test]
    fn blank_values_are_ignored() {
        let mut prefs = PreferenceSet::default();
        assert!(!prefs.add(PreferenceCategory::MovieMoods, "   ", 10));
        assert!(prefs.is_empty());
    }

    #[test]
    fn remove_reports_whether_anything_changed() {
        let mut prefs = PreferenceSet::default();
        prefs.add(PreferenceCategory::FavoriteDecades, "1990s", 10);
        assert!(prefs.remove(PreferenceCategory::FavoriteDecades, "1990S"));
        assert!(!prefs.remove(PreferenceCategory::FavoriteDecades, "1990s"));
        assert!(prefs.is_empty());
    }

    #[test]
    fn non_empty_follows_canonical_order() {
        let mut prefs = PreferenceSet::default();
        prefs.add(PreferenceCategory::MovieMoods, "cozy", 10);
        prefs.add(PreferenceCategory::FavoriteGenres, "Drama", 10);
        let order: Vec<_> = prefs.non_empty().map(|(c, _)| c).collect();
        assert_eq!(
            order,
            vec![PreferenceCategory::FavoriteGenres, PreferenceCategory::MovieMoods]
        );
    }
}
