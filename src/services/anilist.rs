// AniList metadata scanner (GraphQL, no API key needed)

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::merge::{FieldValue, MergeEngine};
use super::registry::{MetadataScanner, ScanOutcome, store_external_id, stored_external_id};
use crate::models::{CatalogRecord, RecordKind};

const ANILIST_API_URL: &str = "https://graphql.anilist.co";
pub const SOURCE: &str = "anilist";

pub struct AniListScanner {
    client: Client,
}

/// GraphQL request wrapper
#[derive(Debug, Serialize)]
struct GraphQLRequest {
    query: String,
    variables: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GraphQLResponse {
    data: Option<ResponseData>,
}

#[derive(Debug, Deserialize)]
struct ResponseData {
    #[serde(rename = "Page")]
    page: Option<PageData>,
    #[serde(rename = "Media")]
    media: Option<MediaData>,
}

#[derive(Debug, Deserialize)]
struct PageData {
    media: Option<Vec<MediaData>>,
}

#[derive(Debug, Clone, Deserialize)]
struct MediaData {
    id: i64,
    title: Option<TitleData>,
    description: Option<String>,
    #[serde(rename = "startDate")]
    start_date: Option<FuzzyDate>,
    #[serde(rename = "averageScore")]
    average_score: Option<i64>,
    duration: Option<i64>,
    genres: Option<Vec<String>>,
    studios: Option<StudioConnection>,
    #[serde(rename = "seasonYear")]
    season_year: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct TitleData {
    romaji: Option<String>,
    english: Option<String>,
    native: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FuzzyDate {
    year: Option<i64>,
    month: Option<i64>,
    day: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct StudioConnection {
    nodes: Option<Vec<Studio>>,
}

#[derive(Debug, Clone, Deserialize)]
struct Studio {
    name: String,
}

const MEDIA_FIELDS: &str = r#"
    id
    title {
        romaji
        english
        native
    }
    description(asHtml: false)
    startDate {
        year
        month
        day
    }
    averageScore
    duration
    genres
    studios(isMain: true) {
        nodes {
            name
        }
    }
    seasonYear
"#;

impl AniListScanner {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    async fn graphql(&self, query: String, variables: serde_json::Value) -> Result<ResponseData> {
        let request = GraphQLRequest { query, variables };
        let response: GraphQLResponse = self
            .client
            .post(ANILIST_API_URL)
            .json(&request)
            .send()
            .await
            .context("Failed to query AniList")?
            .json()
            .await
            .context("Failed to parse AniList response")?;
        response
            .data
            .ok_or_else(|| anyhow::anyhow!("AniList response carried no data"))
    }

    async fn search_media(&self, title: &str, year: Option<i64>) -> Result<Option<MediaData>> {
        let query = format!(
            r#"query ($search: String, $year: Int) {{
                Page(page: 1, perPage: 5) {{
                    media(search: $search, seasonYear: $year, type: ANIME, sort: SEARCH_MATCH) {{
                        {MEDIA_FIELDS}
                    }}
                }}
            }}"#
        );
        let variables = serde_json::json!({ "search": title, "year": year });
        let data = self.graphql(query, variables).await?;
        Ok(data
            .page
            .and_then(|p| p.media)
            .and_then(|m| m.into_iter().next()))
    }

    async fn media_by_id(&self, anilist_id: i64) -> Result<Option<MediaData>> {
        let query = format!(
            r#"query ($id: Int) {{
                Media(id: $id, type: ANIME) {{
                    {MEDIA_FIELDS}
                }}
            }}"#
        );
        let variables = serde_json::json!({ "id": anilist_id });
        let data = self.graphql(query, variables).await?;
        Ok(data.media)
    }

    async fn resolve_id(
        &self,
        pool: &SqlitePool,
        record: &CatalogRecord,
    ) -> Result<Option<String>> {
        if let Some(id) = stored_external_id(pool, record.id, SOURCE).await? {
            return Ok(Some(id));
        }
        let Some(media) = self.search_media(&record.title, record.year).await? else {
            return Ok(None);
        };
        let id = media.id.to_string();
        store_external_id(pool, record.id, SOURCE, &id).await?;
        Ok(Some(id))
    }

    async fn scan_inner(
        &self,
        pool: &SqlitePool,
        record: &CatalogRecord,
        merge: &MergeEngine,
    ) -> Result<ScanOutcome> {
        let Some(id) = self.resolve_id(pool, record).await? else {
            return Ok(ScanOutcome::MissingId);
        };
        let anilist_id: i64 = id
            .parse()
            .with_context(|| format!("Stored AniList id '{}' is not numeric", id))?;

        let Some(media) = self.media_by_id(anilist_id).await? else {
            return Ok(ScanOutcome::MissingId);
        };

        let mut fields: Vec<(&'static str, FieldValue)> = Vec::new();
        if let Some(title) = &media.title {
            if let Some(name) = title.english.clone().or_else(|| title.romaji.clone()) {
                fields.push(("title", FieldValue::Text(name)));
            }
            if let Some(native) = title.native.clone().or_else(|| title.romaji.clone()) {
                fields.push(("original_title", FieldValue::Text(native)));
            }
        }
        if let Some(description) = media.description {
            fields.push(("plot", FieldValue::Text(strip_html(&description))));
        }
        if let Some(year) = media
            .season_year
            .or(media.start_date.as_ref().and_then(|d| d.year))
        {
            fields.push(("year", FieldValue::Int(year)));
        }
        if let Some(date) = media.start_date.as_ref().and_then(format_fuzzy_date) {
            fields.push(("premiere_date", FieldValue::Text(date)));
        }
        if let Some(score) = media.average_score {
            // AniList scores are 0-100; records carry a 0-10 rating.
            fields.push(("rating", FieldValue::Float(score as f64 / 10.0)));
        }
        if let Some(duration) = media.duration {
            fields.push(("runtime_minutes", FieldValue::Int(duration)));
        }
        if let Some(genres) = media.genres.filter(|g| !g.is_empty()) {
            fields.push(("genres", FieldValue::Text(serde_json::to_string(&genres)?)));
        }
        if let Some(studio) = media
            .studios
            .and_then(|s| s.nodes)
            .and_then(|n| n.into_iter().next())
        {
            fields.push(("studio", FieldValue::Text(studio.name)));
        }

        merge.apply_fields(pool, record.id, fields, SOURCE).await?;
        Ok(ScanOutcome::Ok)
    }
}

impl Default for AniListScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataScanner for AniListScanner {
    fn name(&self) -> &'static str {
        SOURCE
    }

    /// AniList has no per-episode endpoint, so it only handles movies.
    fn supports(&self, kind: RecordKind) -> bool {
        matches!(kind, RecordKind::Movie)
    }

    async fn resolve_external_id(
        &self,
        pool: &SqlitePool,
        record: &CatalogRecord,
    ) -> Result<Option<String>> {
        self.resolve_id(pool, record).await
    }

    async fn scan(
        &self,
        pool: &SqlitePool,
        record: &CatalogRecord,
        merge: &MergeEngine,
    ) -> ScanOutcome {
        match self.scan_inner(pool, record, merge).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("AniList scan failed for '{}': {}", record.title, e);
                ScanOutcome::Error
            }
        }
    }
}

/// AniList descriptions embed simple HTML; keep the plain text.
fn strip_html(text: &str) -> String {
    let text = text.replace("<br>", "\n").replace("<br/>", "\n");
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

fn format_fuzzy_date(date: &FuzzyDate) -> Option<String> {
    Some(format!("{:04}-{:02}-{:02}", date.year?, date.month?, date.day?))
}
