// TMDB metadata scanner
// API Documentation: https://developer.themoviedb.org/reference/intro/getting-started

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use sqlx::SqlitePool;

use super::merge::{FieldValue, MergeEngine};
use super::registry::{
    self, MetadataScanner, ScanOutcome, store_external_id, store_series_external_id,
    stored_external_id, stored_series_external_id,
};
use crate::models::{CatalogRecord, RecordKind};

const TMDB_API_BASE: &str = "https://api.themoviedb.org/3";
pub const SOURCE: &str = "tmdb";

/// Minimum title similarity for a search hit to count as a match.
const MIN_TITLE_SIMILARITY: f64 = 0.6;
/// Similarity above which a TV hit for a movie record signals a type change.
const TYPE_CHANGE_SIMILARITY: f64 = 0.9;

pub struct TmdbScanner {
    client: Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct MovieSearchResults {
    results: Vec<MovieSearchResult>,
}

#[derive(Debug, Clone, Deserialize)]
struct MovieSearchResult {
    id: i64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct TvSearchResults {
    results: Vec<TvSearchResult>,
}

#[derive(Debug, Clone, Deserialize)]
struct TvSearchResult {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MovieDetails {
    title: Option<String>,
    original_title: Option<String>,
    overview: Option<String>,
    release_date: Option<String>,
    vote_average: Option<f64>,
    runtime: Option<i64>,
    genres: Option<Vec<Genre>>,
    production_companies: Option<Vec<Company>>,
    imdb_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EpisodeDetails {
    name: Option<String>,
    overview: Option<String>,
    air_date: Option<String>,
    vote_average: Option<f64>,
    runtime: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Genre {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Company {
    name: String,
}

impl TmdbScanner {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
        }
    }

    async fn search_movie(
        &self,
        query: &str,
        year: Option<i64>,
    ) -> Result<Option<MovieSearchResult>> {
        let mut url = format!(
            "{}/search/movie?api_key={}&query={}&include_adult=false",
            TMDB_API_BASE,
            self.api_key,
            urlencoding::encode(query)
        );
        if let Some(y) = year {
            url.push_str(&format!("&year={}", y));
        }

        let response: MovieSearchResults = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to search TMDB for movies")?
            .json()
            .await
            .context("Failed to parse TMDB movie search response")?;

        Ok(best_match(response.results, query, |r| r.title.clone()))
    }

    async fn search_tv(&self, query: &str, year: Option<i64>) -> Result<Option<TvSearchResult>> {
        let mut url = format!(
            "{}/search/tv?api_key={}&query={}&include_adult=false",
            TMDB_API_BASE,
            self.api_key,
            urlencoding::encode(query)
        );
        if let Some(y) = year {
            url.push_str(&format!("&first_air_date_year={}", y));
        }

        let response: TvSearchResults = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to search TMDB for TV shows")?
            .json()
            .await
            .context("Failed to parse TMDB TV search response")?;

        Ok(best_match(response.results, query, |r| r.name.clone()))
    }

    async fn movie_details(&self, tmdb_id: &str) -> Result<MovieDetails> {
        let url = format!(
            "{}/movie/{}?api_key={}",
            TMDB_API_BASE, tmdb_id, self.api_key
        );
        let details = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch TMDB movie details")?
            .json()
            .await
            .context("Failed to parse TMDB movie details")?;
        Ok(details)
    }

    async fn episode_details(
        &self,
        tv_id: &str,
        season: i64,
        episode: i64,
    ) -> Result<Option<EpisodeDetails>> {
        let url = format!(
            "{}/tv/{}/season/{}/episode/{}?api_key={}",
            TMDB_API_BASE, tv_id, season, episode, self.api_key
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch TMDB episode details")?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let details = response
            .json()
            .await
            .context("Failed to parse TMDB episode details")?;
        Ok(Some(details))
    }

    async fn resolve_movie_id(
        &self,
        pool: &SqlitePool,
        record: &CatalogRecord,
    ) -> Result<Option<String>> {
        if let Some(id) = stored_external_id(pool, record.id, SOURCE).await? {
            return Ok(Some(id));
        }
        let Some(hit) = self.search_movie(&record.title, record.year).await? else {
            return Ok(None);
        };
        let id = hit.id.to_string();
        store_external_id(pool, record.id, SOURCE, &id).await?;
        Ok(Some(id))
    }

    /// TMDB id of the series an episode record belongs to, resolving and
    /// storing it on first use.
    async fn resolve_series_id(
        &self,
        pool: &SqlitePool,
        record: &CatalogRecord,
    ) -> Result<Option<String>> {
        let Some(series) = registry::series_for_record(pool, record).await? else {
            return Ok(None);
        };
        if let Some(id) = stored_series_external_id(pool, series.id, SOURCE).await? {
            return Ok(Some(id));
        }
        let Some(hit) = self.search_tv(&series.title, series.year).await? else {
            return Ok(None);
        };
        let id = hit.id.to_string();
        store_series_external_id(pool, series.id, SOURCE, &id).await?;
        Ok(Some(id))
    }

    async fn scan_movie(
        &self,
        pool: &SqlitePool,
        record: &CatalogRecord,
        merge: &MergeEngine,
    ) -> Result<ScanOutcome> {
        let Some(tmdb_id) = self.resolve_movie_id(pool, record).await? else {
            // A strong TV match for an unresolvable movie means the record is
            // really a series episode container.
            if let Some(hit) = self.search_tv(&record.title, record.year).await? {
                if similarity(&record.title, &hit.name) >= TYPE_CHANGE_SIMILARITY {
                    return Ok(ScanOutcome::TypeChange(RecordKind::Episode));
                }
            }
            return Ok(ScanOutcome::MissingId);
        };

        let details = self.movie_details(&tmdb_id).await?;

        if let Some(imdb_id) = details.imdb_id.as_deref().filter(|s| !s.is_empty()) {
            store_external_id(pool, record.id, "imdb", imdb_id).await?;
        }

        let mut fields: Vec<(&'static str, FieldValue)> = Vec::new();
        if let Some(title) = details.title {
            fields.push(("title", FieldValue::Text(title)));
        }
        if let Some(original) = details.original_title {
            fields.push(("original_title", FieldValue::Text(original)));
        }
        if let Some(overview) = details.overview {
            fields.push(("plot", FieldValue::Text(overview)));
        }
        if let Some(date) = details.release_date.filter(|d| !d.is_empty()) {
            if let Some(year) = parse_year(&date) {
                fields.push(("year", FieldValue::Int(year)));
            }
            fields.push(("premiere_date", FieldValue::Text(date)));
        }
        if let Some(rating) = details.vote_average {
            fields.push(("rating", FieldValue::Float(rating)));
        }
        if let Some(runtime) = details.runtime {
            fields.push(("runtime_minutes", FieldValue::Int(runtime)));
        }
        if let Some(genres) = details.genres.filter(|g| !g.is_empty()) {
            let names: Vec<String> = genres.into_iter().map(|g| g.name).collect();
            fields.push(("genres", FieldValue::Text(serde_json::to_string(&names)?)));
        }
        if let Some(studio) = details
            .production_companies
            .and_then(|c| c.into_iter().next())
        {
            fields.push(("studio", FieldValue::Text(studio.name)));
        }

        merge.apply_fields(pool, record.id, fields, SOURCE).await?;
        Ok(ScanOutcome::Ok)
    }

    async fn scan_episode(
        &self,
        pool: &SqlitePool,
        record: &CatalogRecord,
        merge: &MergeEngine,
    ) -> Result<ScanOutcome> {
        let Some(tv_id) = self.resolve_series_id(pool, record).await? else {
            return Ok(ScanOutcome::MissingId);
        };
        let (Some(season), Some(episode)) = (record.season_number, record.episode_number) else {
            return Ok(ScanOutcome::MissingId);
        };

        store_external_id(pool, record.id, SOURCE, &format!("{}/{}/{}", tv_id, season, episode))
            .await?;

        let Some(details) = self.episode_details(&tv_id, season, episode).await? else {
            return Ok(ScanOutcome::MissingId);
        };

        let mut fields: Vec<(&'static str, FieldValue)> = Vec::new();
        if let Some(name) = details.name {
            fields.push(("title", FieldValue::Text(name)));
        }
        if let Some(overview) = details.overview {
            fields.push(("plot", FieldValue::Text(overview)));
        }
        if let Some(date) = details.air_date.filter(|d| !d.is_empty()) {
            if let Some(year) = parse_year(&date) {
                fields.push(("year", FieldValue::Int(year)));
            }
            fields.push(("premiere_date", FieldValue::Text(date)));
        }
        if let Some(rating) = details.vote_average {
            fields.push(("rating", FieldValue::Float(rating)));
        }
        if let Some(runtime) = details.runtime {
            fields.push(("runtime_minutes", FieldValue::Int(runtime)));
        }

        merge.apply_fields(pool, record.id, fields, SOURCE).await?;
        Ok(ScanOutcome::Ok)
    }
}

#[async_trait]
impl MetadataScanner for TmdbScanner {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn supports(&self, kind: RecordKind) -> bool {
        matches!(kind, RecordKind::Movie | RecordKind::Episode)
    }

    async fn resolve_external_id(
        &self,
        pool: &SqlitePool,
        record: &CatalogRecord,
    ) -> Result<Option<String>> {
        match record.kind {
            RecordKind::Movie => self.resolve_movie_id(pool, record).await,
            RecordKind::Episode => self.resolve_series_id(pool, record).await,
        }
    }

    async fn scan(
        &self,
        pool: &SqlitePool,
        record: &CatalogRecord,
        merge: &MergeEngine,
    ) -> ScanOutcome {
        let result = match record.kind {
            RecordKind::Movie => self.scan_movie(pool, record, merge).await,
            RecordKind::Episode => self.scan_episode(pool, record, merge).await,
        };
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("TMDB scan failed for '{}': {}", record.title, e);
                ScanOutcome::Error
            }
        }
    }
}

fn similarity(a: &str, b: &str) -> f64 {
    strsim::jaro_winkler(&a.to_lowercase(), &b.to_lowercase())
}

fn parse_year(date: &str) -> Option<i64> {
    date.split('-').next()?.parse().ok()
}

/// Pick the search hit whose title is closest to the query; hits below the
/// similarity floor are rejected entirely.
fn best_match<T>(results: Vec<T>, query: &str, title_of: impl Fn(&T) -> String) -> Option<T> {
    let mut best: Option<(f64, T)> = None;
    for result in results {
        let score = similarity(query, &title_of(&result));
        if score < MIN_TITLE_SIMILARITY {
            continue;
        }
        match &best {
            Some((best_score, _)) if *best_score >= score => {}
            _ => best = Some((score, result)),
        }
    }
    best.map(|(_, result)| result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("2009-12-18"), Some(2009));
        assert_eq!(parse_year("1999"), Some(1999));
        assert_eq!(parse_year(""), None);
        assert_eq!(parse_year("not-a-date"), None);
    }

    #[test]
    fn test_best_match_picks_closest_title() {
        let results = vec![
            MovieSearchResult {
                id: 1,
                title: "Avatar: The Way of Water".to_string(),
            },
            MovieSearchResult {
                id: 2,
                title: "Avatar".to_string(),
            },
        ];
        let hit = best_match(results, "Avatar", |r| r.title.clone()).expect("match");
        assert_eq!(hit.id, 2);
    }

    #[test]
    fn test_best_match_rejects_unrelated_titles() {
        let results = vec![MovieSearchResult {
            id: 1,
            title: "Completely Different".to_string(),
        }];
        assert!(best_match(results, "Avatar", |r| r.title.clone()).is_none());
    }
}
