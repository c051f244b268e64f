use std::collections::HashMap;

use garimpo_agents::tools::{DiscoverFilters, SortOrder};
use garimpo_common::{Error, Result};
use garimpo_config::CatalogConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

const UPCOMING_LIMIT: usize = 10;
const CAST_LIMIT: usize = 10;
const DETAILS_CAST_LIMIT: usize = 5;

/// Movie record shape returned to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieSummary {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default, skip_serializing)]
    pub popularity: f64,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct GenreList {
    #[serde(default)]
    genres: Vec<Genre>,
}

#[derive(Debug, Deserialize)]
struct Genre {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MovieDetails {
    #[serde(default)]
    title: String,
    #[serde(default)]
    overview: String,
    release_date: Option<String>,
    #[serde(default)]
    vote_average: f64,
    #[serde(default)]
    genres: Vec<Genre>,
    credits: Option<Credits>,
}

#[derive(Debug, Default, Deserialize)]
struct Credits {
    #[serde(default)]
    cast: Vec<CastMember>,
    #[serde(default)]
    crew: Vec<CrewMember>,
}

#[derive(Debug, Deserialize)]
struct CastMember {
    name: String,
    character: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrewMember {
    name: String,
    job: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PersonSummary {
    id: u64,
    name: String,
    #[serde(default)]
    popularity: f64,
}

#[derive(Debug, Deserialize)]
struct PersonCredits {
    #[serde(default)]
    cast: Vec<CreditedMovie>,
    #[serde(default)]
    crew: Vec<CreditedMovie>,
}

#[derive(Debug, Deserialize)]
struct CreditedMovie {
    id: u64,
    title: Option<String>,
    release_date: Option<String>,
    #[serde(default)]
    popularity: f64,
    character: Option<String>,
    job: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WatchProviderResults {
    #[serde(default)]
    results: HashMap<String, RegionProviders>,
}

#[derive(Debug, Deserialize)]
struct RegionProviders {
    link: Option<String>,
    #[serde(default)]
    flatrate: Vec<Provider>,
    #[serde(default)]
    rent: Vec<Provider>,
    #[serde(default)]
    buy: Vec<Provider>,
}

#[derive(Debug, Deserialize)]
struct Provider {
    provider_name: String,
}

/// Client for The Movie Database API.
///
/// Every public lookup returns JSON data or a sentence describing why there is
/// nothing to show. Transport failures never surface as errors.
pub struct TmdbClient {
    http: reqwest::Client,
    api_key: String,
    base_url: Url,
    language: String,
    region: String,
    result_limit: usize,
    filmography_limit: usize,
    min_vote_count: u32,
    genres: OnceCell<HashMap<String, u64>>,
}

impl TmdbClient {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("catalog.api_key (TMDB_API_KEY) is required".into()))?;
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("invalid catalog.base_url: {e}")))?;

        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            base_url,
            language: config.language.clone(),
            region: config.region.clone(),
            result_limit: config.result_limit.max(1),
            filmography_limit: config.filmography_limit.max(1),
            min_vote_count: config.min_vote_count,
            genres: OnceCell::new(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &[&str],
        params: &[(&str, String)],
    ) -> Result<T> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::Catalog("failed to build catalog url path".to_string()))?;
            segments.pop_if_empty();
            segments.extend(path);
        }
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("api_key", &self.api_key);
            qp.append_pair("language", &self.language);
            for (key, value) in params {
                qp.append_pair(key, value);
            }
        }

        debug!(path = %path.join("/"), "catalog request");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Catalog(format!("catalog request failed: {}", e.without_url())))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(Error::Catalog(format!(
                "catalog request /{} failed ({status})",
                path.join("/")
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| Error::Catalog(format!("failed to parse catalog response: {}", e.without_url())))
    }

    /// Lowercased genre name to id. Fetched once; a failed fetch is retried next time.
    async fn genre_map(&self) -> Result<&HashMap<String, u64>> {
        self.genres
            .get_or_try_init(|| async {
                let list: GenreList = self.get_json(&["genre", "movie", "list"], &[]).await?;
                info!(count = list.genres.len(), "cached catalog genre table");
                Ok(list
                    .genres
                    .into_iter()
                    .map(|g| (g.name.to_lowercase(), g.id))
                    .collect())
            })
            .await
    }

    /// Most popular movie matching `title`.
    async fn resolve_movie(&self, title: &str) -> Result<Option<MovieSummary>> {
        let page: Page<MovieSummary> = self
            .get_json(&["search", "movie"], &[("query", title.to_string())])
            .await?;
        Ok(most_popular(page.results, |m| m.popularity))
    }

    pub async fn search_movies(&self, query: &str) -> Value {
        let result = self
            .get_json::<Page<MovieSummary>>(&["search", "movie"], &[("query", query.to_string())])
            .await
            .map(|page| {
                movie_list(
                    page.results,
                    self.result_limit,
                    format!("No movies found for \"{query}\"."),
                )
            });
        degrade(result, format!("Something went wrong while searching for \"{query}\"."))
    }

    pub async fn movie_details(&self, title: &str) -> Value {
        let result: Result<Value> = async {
            let Some(movie) = self.resolve_movie(title).await? else {
                return Ok(not_found_title(title));
            };
            let id = movie.id.to_string();
            let details: MovieDetails = self
                .get_json(&["movie", &id], &[("append_to_response", "credits".to_string())])
                .await?;
            let credits = details.credits.unwrap_or_default();
            let director = credits
                .crew
                .iter()
                .find(|p| p.job.as_deref() == Some("Director"))
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "Unknown".to_string());

            Ok(json!({
                "title": details.title,
                "overview": details.overview,
                "release_date": details.release_date,
                "vote_average": details.vote_average,
                "genres": details.genres.into_iter().map(|g| g.name).collect::<Vec<_>>(),
                "director": director,
                "cast": credits
                    .cast
                    .into_iter()
                    .take(DETAILS_CAST_LIMIT)
                    .map(|c| c.name)
                    .collect::<Vec<_>>(),
            }))
        }
        .await;
        degrade(result, format!("Something went wrong while looking up \"{title}\"."))
    }

    pub async fn discover(&self, filters: &DiscoverFilters) -> Value {
        let result: Result<Value> = async {
            let mut params = vec![
                (
                    "sort_by",
                    filters
                        .sort_by
                        .unwrap_or(SortOrder::RatingDesc)
                        .as_str()
                        .to_string(),
                ),
                ("vote_count.gte", self.min_vote_count.to_string()),
            ];

            if let Some(genre) = filters.genre_name.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
                let genres = self.genre_map().await?;
                match genres.get(&genre.to_lowercase()) {
                    Some(id) => params.push(("with_genres", id.to_string())),
                    None => {
                        let mut known: Vec<&str> = genres.keys().map(String::as_str).collect();
                        known.sort_unstable();
                        return Ok(Value::String(format!(
                            "I don't know a genre called \"{genre}\". Known genres: {}.",
                            known.join(", ")
                        )));
                    }
                }
            }
            if let Some(year) = filters.year {
                params.push(("primary_release_year", year.to_string()));
            }
            if let Some(min) = filters.min_rating {
                params.push(("vote_average.gte", min.to_string()));
            }
            if let Some(max) = filters.max_rating {
                params.push(("vote_average.lte", max.to_string()));
            }

            let page: Page<MovieSummary> = self.get_json(&["discover", "movie"], &params).await?;
            Ok(movie_list(
                page.results,
                self.result_limit,
                "No movies matched those filters. Try a broader search!".to_string(),
            ))
        }
        .await;
        degrade(result, "Something went wrong while discovering movies with those filters.".to_string())
    }

    pub async fn person_filmography(&self, person_name: &str) -> Value {
        let result: Result<Value> = async {
            let people: Page<PersonSummary> = self
                .get_json(&["search", "person"], &[("query", person_name.to_string())])
                .await?;
            let Some(person) = most_popular(people.results, |p| p.popularity) else {
                return Ok(Value::String(format!(
                    "I couldn't find anyone called \"{person_name}\"."
                )));
            };

            let id = person.id.to_string();
            let credits: PersonCredits = self
                .get_json(&["person", &id, "movie_credits"], &[])
                .await?;
            let films = merge_credits(credits, self.filmography_limit);
            if films.is_empty() {
                return Ok(Value::String(format!(
                    "I found {} but no movies associated with them.",
                    person.name
                )));
            }
            Ok(Value::Array(films))
        }
        .await;
        degrade(
            result,
            format!("Something went wrong while fetching the filmography of \"{person_name}\"."),
        )
    }

    pub async fn now_playing(&self) -> Value {
        self.regional_list("now_playing", "No movies are playing in theaters right now.")
            .await
    }

    pub async fn popular(&self) -> Value {
        self.regional_list("popular", "No popular movies found right now.").await
    }

    pub async fn top_rated(&self) -> Value {
        self.regional_list("top_rated", "Couldn't find the top rated movies.").await
    }

    pub async fn upcoming(&self, target_year: Option<i32>) -> Value {
        let result = self
            .get_json::<Page<MovieSummary>>(&["movie", "upcoming"], &[("region", self.region.clone())])
            .await
            .map(|page| {
                let movies: Vec<MovieSummary> = match target_year {
                    Some(year) => page
                        .results
                        .into_iter()
                        .filter(|m| release_year(m.release_date.as_deref()) == Some(year))
                        .collect(),
                    None => page.results,
                };
                let empty = match target_year {
                    Some(year) => format!("No upcoming releases found for {year}."),
                    None => "No upcoming releases found.".to_string(),
                };
                movie_list(movies, UPCOMING_LIMIT, empty)
            });
        degrade(result, "Something went wrong while fetching upcoming releases.".to_string())
    }

    pub async fn similar(&self, title: &str) -> Value {
        let result: Result<Value> = async {
            let Some(movie) = self.resolve_movie(title).await? else {
                return Ok(not_found_title(title));
            };
            let id = movie.id.to_string();
            let page: Page<MovieSummary> = self.get_json(&["movie", &id, "similar"], &[]).await?;
            Ok(movie_list(
                page.results,
                self.result_limit,
                format!("No movies similar to \"{}\" were found.", movie.title),
            ))
        }
        .await;
        degrade(result, format!("Something went wrong while finding movies like \"{title}\"."))
    }

    pub async fn cast(&self, title: &str) -> Value {
        let result: Result<Value> = async {
            let Some(movie) = self.resolve_movie(title).await? else {
                return Ok(not_found_title(title));
            };
            let id = movie.id.to_string();
            let credits: Credits = self.get_json(&["movie", &id, "credits"], &[]).await?;
            if credits.cast.is_empty() {
                return Ok(Value::String(format!("No cast listed for \"{}\".", movie.title)));
            }
            Ok(Value::Array(
                credits
                    .cast
                    .into_iter()
                    .take(CAST_LIMIT)
                    .map(|c| json!({ "name": c.name, "character": c.character }))
                    .collect(),
            ))
        }
        .await;
        degrade(result, format!("Something went wrong while fetching the cast of \"{title}\"."))
    }

    pub async fn watch_providers(&self, title: &str) -> Value {
        let result: Result<Value> = async {
            let Some(movie) = self.resolve_movie(title).await? else {
                return Ok(not_found_title(title));
            };
            let id = movie.id.to_string();
            let mut providers: WatchProviderResults = self
                .get_json(&["movie", &id, "watch", "providers"], &[])
                .await?;
            let Some(region) = providers.results.remove(&self.region) else {
                return Ok(Value::String(format!(
                    "\"{}\" is not available to stream, rent or buy in {}.",
                    movie.title, self.region
                )));
            };
            Ok(json!({
                "title": movie.title,
                "region": self.region,
                "stream": names(region.flatrate),
                "rent": names(region.rent),
                "buy": names(region.buy),
                "link": region.link,
            }))
        }
        .await;
        degrade(
            result,
            format!("Something went wrong while checking where to watch \"{title}\"."),
        )
    }

    async fn regional_list(&self, endpoint: &str, empty: &str) -> Value {
        let result = self
            .get_json::<Page<MovieSummary>>(&["movie", endpoint], &[("region", self.region.clone())])
            .await
            .map(|page| movie_list(page.results, self.result_limit, empty.to_string()));
        degrade(result, format!("Something went wrong while fetching {} movies.", endpoint.replace('_', " ")))
    }
}

fn movie_list(movies: Vec<MovieSummary>, limit: usize, empty: String) -> Value {
    if movies.is_empty() {
        return Value::String(empty);
    }
    let movies: Vec<MovieSummary> = movies.into_iter().take(limit).collect();
    serde_json::to_value(movies).unwrap_or(Value::String(empty))
}

fn degrade(result: Result<Value>, message: String) -> Value {
    result.unwrap_or_else(|e| {
        warn!("catalog lookup failed: {e}");
        Value::String(message)
    })
}

fn not_found_title(title: &str) -> Value {
    Value::String(format!(
        "I couldn't find a movie called \"{title}\". Is the title spelled correctly?"
    ))
}

/// Highest popularity wins; ties keep the earlier search result.
fn most_popular<T>(items: Vec<T>, popularity: impl Fn(&T) -> f64) -> Option<T> {
    let mut best: Option<T> = None;
    for item in items {
        let better = match &best {
            Some(current) => popularity(&item) > popularity(current),
            None => true,
        };
        if better {
            best = Some(item);
        }
    }
    best
}

fn merge_credits(credits: PersonCredits, limit: usize) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    let mut films: Vec<CreditedMovie> = credits
        .cast
        .into_iter()
        .chain(credits.crew)
        .filter(|film| seen.insert(film.id))
        .collect();
    films.sort_by(|a, b| b.popularity.total_cmp(&a.popularity));
    films
        .into_iter()
        .take(limit)
        .map(|film| {
            let role = film
                .character
                .filter(|c| !c.is_empty())
                .or(film.job);
            json!({
                "title": film.title,
                "release_date": film.release_date,
                "role": role,
            })
        })
        .collect()
}

fn release_year(date: Option<&str>) -> Option<i32> {
    date?.get(..4)?.parse().ok()
}

fn names(providers: Vec<Provider>) -> Vec<String> {
    providers.into_iter().map(|p| p.provider_name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credited(id: u64, popularity: f64, character: Option<&str>, job: Option<&str>) -> CreditedMovie {
        CreditedMovie {
            id,
            title: Some(format!("Movie {id}")),
            release_date: Some("2001-01-01".into()),
            popularity,
            character: character.map(str::to_string),
            job: job.map(str::to_string),
        }
    }

    #[test]
    fn most_popular_prefers_highest_then_first() {
        let picked = most_popular(vec![(1, 3.0), (2, 9.0), (3, 9.0)], |x| x.1);
        assert_eq!(picked, Some((2, 9.0)));
        assert_eq!(most_popular(Vec::<(u8, f64)>::new(), |x| x.1), None);
    }

    #[test]
    fn filmography_merges_dedupes_and_sorts() {
        let credits = PersonCredits {
            cast: vec![credited(1, 5.0, Some("Hero"), None), credited(2, 50.0, Some(""), None)],
            crew: vec![credited(1, 5.0, None, Some("Director")), credited(3, 20.0, None, Some("Writer"))],
        };
        let films = merge_credits(credits, 10);
        assert_eq!(films.len(), 3);
        assert_eq!(films[0]["title"], "Movie 2");
        assert_eq!(films[0]["role"], Value::Null);
        assert_eq!(films[1]["role"], "Writer");
        assert_eq!(films[2]["role"], "Hero");
    }

    #[test]
    fn release_year_reads_prefix() {
        assert_eq!(release_year(Some("2025-11-20")), Some(2025));
        assert_eq!(release_year(Some("")), None);
        assert_eq!(release_year(None), None);
    }

    #[test]
    fn popularity_is_not_sent_to_the_model() {
        let movie = MovieSummary {
            id: 1,
            title: "Dune".into(),
            overview: String::new(),
            release_date: None,
            vote_average: 8.0,
            popularity: 99.0,
        };
        let value = serde_json::to_value(movie).unwrap();
        assert!(value.get("popularity").is_none());
        assert_eq!(value["title"], "Dune");
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let config = CatalogConfig::default();
        assert!(matches!(TmdbClient::new(&config), Err(Error::Config(_))));
    }
}
