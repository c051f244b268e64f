use garimpo_common::{Error, PreferenceCategory, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::ToolName;

/// A tool call with its arguments decoded into typed fields.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    SearchMoviesByKeyword { query: String },
    GetMovieDetails { title: String },
    DiscoverMovies(DiscoverFilters),
    GetPersonFilmography { person_name: String },
    GetNowPlayingMovies,
    GetPopularMovies,
    GetTopRatedMovies,
    GetUpcomingMovies { target_year: Option<i32> },
    GetSimilarMovies { title: String },
    GetMovieCast { title: String },
    GetWatchProviders { title: String },
    SaveUserPreference { category: PreferenceCategory, value: String },
    RemoveUserPreference { category: PreferenceCategory, value: String },
    GetUserPreferences,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DiscoverFilters {
    #[serde(default, alias = "genreName")]
    pub genre_name: Option<String>,
    #[serde(default, alias = "minRating", deserialize_with = "lenient_f64")]
    pub min_rating: Option<f64>,
    #[serde(default, alias = "maxRating", deserialize_with = "lenient_f64")]
    pub max_rating: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub year: Option<i32>,
    #[serde(default, alias = "sortBy")]
    pub sort_by: Option<SortOrder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SortOrder {
    #[serde(rename = "vote_average.desc")]
    RatingDesc,
    #[serde(rename = "vote_average.asc")]
    RatingAsc,
    #[serde(rename = "popularity.desc")]
    PopularityDesc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::RatingDesc => "vote_average.desc",
            SortOrder::RatingAsc => "vote_average.asc",
            SortOrder::PopularityDesc => "popularity.desc",
        }
    }
}

#[derive(Deserialize)]
struct QueryArgs {
    query: String,
}

#[derive(Deserialize)]
struct TitleArgs {
    title: String,
}

#[derive(Deserialize)]
struct PersonArgs {
    #[serde(alias = "personName")]
    person_name: String,
}

#[derive(Deserialize)]
struct UpcomingArgs {
    #[serde(default, alias = "targetYear", deserialize_with = "lenient_i32")]
    target_year: Option<i32>,
}

#[derive(Deserialize)]
struct PreferenceArgs {
    category: PreferenceCategory,
    value: String,
}

impl ToolInvocation {
    /// Decode model-supplied `arguments` for `tool`. Any mismatch is a tool failure.
    pub fn parse(tool: ToolName, arguments: Value) -> Result<Self> {
        let arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        let invocation = match tool {
            ToolName::SearchMoviesByKeyword => {
                let args: QueryArgs = decode(tool, arguments)?;
                ToolInvocation::SearchMoviesByKeyword {
                    query: required(tool, "query", args.query)?,
                }
            }
            ToolName::GetMovieDetails => ToolInvocation::GetMovieDetails {
                title: title(tool, arguments)?,
            },
            ToolName::DiscoverMovies => ToolInvocation::DiscoverMovies(decode(tool, arguments)?),
            ToolName::GetPersonFilmography => {
                let args: PersonArgs = decode(tool, arguments)?;
                ToolInvocation::GetPersonFilmography {
                    person_name: required(tool, "person_name", args.person_name)?,
                }
            }
            ToolName::GetNowPlayingMovies => ToolInvocation::GetNowPlayingMovies,
            ToolName::GetPopularMovies => ToolInvocation::GetPopularMovies,
            ToolName::GetTopRatedMovies => ToolInvocation::GetTopRatedMovies,
            ToolName::GetUpcomingMovies => {
                let args: UpcomingArgs = decode(tool, arguments)?;
                ToolInvocation::GetUpcomingMovies {
                    target_year: args.target_year,
                }
            }
            ToolName::GetSimilarMovies => ToolInvocation::GetSimilarMovies {
                title: title(tool, arguments)?,
            },
            ToolName::GetMovieCast => ToolInvocation::GetMovieCast {
                title: title(tool, arguments)?,
            },
            ToolName::GetWatchProviders => ToolInvocation::GetWatchProviders {
                title: title(tool, arguments)?,
            },
            ToolName::SaveUserPreference => {
                let args: PreferenceArgs = decode(tool, arguments)?;
                ToolInvocation::SaveUserPreference {
                    category: args.category,
                    value: required(tool, "value", args.value)?,
                }
            }
            ToolName::RemoveUserPreference => {
                let args: PreferenceArgs = decode(tool, arguments)?;
                ToolInvocation::RemoveUserPreference {
                    category: args.category,
                    value: required(tool, "value", args.value)?,
                }
            }
            ToolName::GetUserPreferences => ToolInvocation::GetUserPreferences,
        };
        Ok(invocation)
    }

    pub fn tool(&self) -> ToolName {
        match self {
            ToolInvocation::SearchMoviesByKeyword { .. } => ToolName::SearchMoviesByKeyword,
            ToolInvocation::GetMovieDetails { .. } => ToolName::GetMovieDetails,
            ToolInvocation::DiscoverMovies(_) => ToolName::DiscoverMovies,
            ToolInvocation::GetPersonFilmography { .. } => ToolName::GetPersonFilmography,
            ToolInvocation::GetNowPlayingMovies => ToolName::GetNowPlayingMovies,
            ToolInvocation::GetPopularMovies => ToolName::GetPopularMovies,
            ToolInvocation::GetTopRatedMovies => ToolName::GetTopRatedMovies,
            ToolInvocation::GetUpcomingMovies { .. } => ToolName::GetUpcomingMovies,
            ToolInvocation::GetSimilarMovies { .. } => ToolName::GetSimilarMovies,
            ToolInvocation::GetMovieCast { .. } => ToolName::GetMovieCast,
            ToolInvocation::GetWatchProviders { .. } => ToolName::GetWatchProviders,
            ToolInvocation::SaveUserPreference { .. } => ToolName::SaveUserPreference,
            ToolInvocation::RemoveUserPreference { .. } => ToolName::RemoveUserPreference,
            ToolInvocation::GetUserPreferences => ToolName::GetUserPreferences,
        }
    }
}

fn decode<T: DeserializeOwned>(tool: ToolName, arguments: Value) -> Result<T> {
    serde_json::from_value(arguments)
        .map_err(|e| Error::Tool(format!("invalid arguments for {tool}: {e}")))
}

fn title(tool: ToolName, arguments: Value) -> Result<String> {
    let args: TitleArgs = decode(tool, arguments)?;
    required(tool, "title", args.title)
}

fn required(tool: ToolName, field: &str, value: String) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::Tool(format!("{tool} requires a non-empty {field}")));
    }
    Ok(trimmed.to_string())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<f64>, D::Error> {
    let raw: Option<NumberOrString> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(NumberOrString::Number(n)) => Some(n),
        Some(NumberOrString::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

fn lenient_i32<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<i32>, D::Error> {
    Ok(lenient_f64(deserializer)?.map(|n| n as i32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn discover_accepts_snake_and_camel_case() {
        let snake = ToolInvocation::parse(
            ToolName::DiscoverMovies,
            json!({"genre_name": "Comedy", "min_rating": 7, "year": 1999}),
        )
        .unwrap();
        let camel = ToolInvocation::parse(
            ToolName::DiscoverMovies,
            json!({"genreName": "Comedy", "minRating": "7", "year": "1999"}),
        )
        .unwrap();
        assert_eq!(snake, camel);
        let ToolInvocation::DiscoverMovies(filters) = snake else {
            panic!("expected discover");
        };
        assert_eq!(filters.min_rating, Some(7.0));
        assert_eq!(filters.year, Some(1999));
    }

    #[test]
    fn discover_sort_order_is_closed() {
        let ok = ToolInvocation::parse(
            ToolName::DiscoverMovies,
            json!({"sort_by": "vote_average.asc"}),
        )
        .unwrap();
        assert_eq!(
            ok,
            ToolInvocation::DiscoverMovies(DiscoverFilters {
                sort_by: Some(SortOrder::RatingAsc),
                ..Default::default()
            })
        );
        assert!(
            ToolInvocation::parse(ToolName::DiscoverMovies, json!({"sort_by": "revenue.desc"}))
                .is_err()
        );
    }

    #[test]
    fn no_argument_tools_ignore_null() {
        let parsed = ToolInvocation::parse(ToolName::GetNowPlayingMovies, Value::Null).unwrap();
        assert_eq!(parsed, ToolInvocation::GetNowPlayingMovies);
        assert_eq!(parsed.tool(), ToolName::GetNowPlayingMovies);
    }

    #[test]
    fn blank_title_is_rejected() {
        let err = ToolInvocation::parse(ToolName::GetMovieDetails, json!({"title": "  "}))
            .unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
    }

    #[test]
    fn preference_category_outside_the_set_is_rejected() {
        let err = ToolInvocation::parse(
            ToolName::SaveUserPreference,
            json!({"category": "password", "value": "hunter2"}),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Tool(_)));

        let ok = ToolInvocation::parse(
            ToolName::SaveUserPreference,
            json!({"category": "favorite_directors", "value": " Kleber Mendonça Filho "}),
        )
        .unwrap();
        assert_eq!(
            ok,
            ToolInvocation::SaveUserPreference {
                category: PreferenceCategory::FavoriteDirectors,
                value: "Kleber Mendonça Filho".into(),
            }
        );
    }
}
