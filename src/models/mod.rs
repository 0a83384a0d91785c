use serde::{Deserialize, Serialize};

/// Classification of a staged file by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    #[sqlx(rename = "video")]
    Video,
    #[sqlx(rename = "image")]
    Image,
    #[sqlx(rename = "subtitle")]
    Subtitle,
    #[sqlx(rename = "nfo")]
    Nfo,
    #[sqlx(rename = "other")]
    Other,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Video => "video",
            FileKind::Image => "image",
            FileKind::Subtitle => "subtitle",
            FileKind::Nfo => "nfo",
            FileKind::Other => "other",
        }
    }
}

/// Lifecycle status of a staged file.
///
/// PROCESS is the transient state a row is flipped to by the scheduler's
/// atomic claim; it keeps a second scheduler from claiming the same row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
#[serde(rename_all = "UPPERCASE")]
pub enum FileStatus {
    #[sqlx(rename = "NEW")]
    New,
    #[sqlx(rename = "UPDATED")]
    Updated,
    #[sqlx(rename = "PROCESS")]
    Process,
    #[sqlx(rename = "DUPLICATE")]
    Duplicate,
    #[sqlx(rename = "DONE")]
    Done,
    #[sqlx(rename = "ERROR")]
    Error,
    #[sqlx(rename = "DELETED")]
    Deleted,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::New => "NEW",
            FileStatus::Updated => "UPDATED",
            FileStatus::Process => "PROCESS",
            FileStatus::Duplicate => "DUPLICATE",
            FileStatus::Done => "DONE",
            FileStatus::Error => "ERROR",
            FileStatus::Deleted => "DELETED",
        }
    }
}

/// Lifecycle status of a catalog record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordStatus {
    #[sqlx(rename = "NEW")]
    New,
    #[sqlx(rename = "UPDATED")]
    Updated,
    #[sqlx(rename = "DONE")]
    Done,
    #[sqlx(rename = "ERROR")]
    Error,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::New => "NEW",
            RecordStatus::Updated => "UPDATED",
            RecordStatus::Done => "DONE",
            RecordStatus::Error => "ERROR",
        }
    }
}

/// Kind of a catalog record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    #[sqlx(rename = "movie")]
    Movie,
    #[sqlx(rename = "episode")]
    Episode,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Movie => "movie",
            RecordKind::Episode => "episode",
        }
    }
}

/// A single file discovered by the external scanning collaborator, tracked
/// through its status lifecycle. Unique on (directory, file_name).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StagedFile {
    pub id: i64,
    pub directory: String,
    pub file_name: String,
    pub extension: Option<String>,
    pub file_kind: FileKind,
    pub size: i64,
    /// Modification time as unix seconds, as reported by the collaborator.
    pub modified_at: i64,
    pub container_info: Option<String>,
    pub nfo_text: Option<String>,
    pub status: FileStatus,
    pub part: Option<i64>,
    pub media_file_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl StagedFile {
    pub fn full_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.directory).join(&self.file_name)
    }
}

/// One physical container, binding 1..N staged-file parts to 1..N catalog
/// records.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MediaFile {
    pub id: i64,
    pub identifier: String,
    pub container: Option<String>,
    pub resolution: Option<String>,
    pub source_tag: Option<String>,
    pub video_codec: Option<String>,
    pub duration_secs: Option<i64>,
    pub created_at: String,
}

/// A movie or single TV episode's reconciled metadata record.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CatalogRecord {
    pub id: i64,
    pub identifier: String,
    pub kind: RecordKind,
    pub title: String,
    pub original_title: Option<String>,
    pub plot: Option<String>,
    pub year: Option<i64>,
    pub premiere_date: Option<String>,
    pub rating: Option<f64>,
    pub runtime_minutes: Option<i64>,
    pub genres: Option<String>,
    pub studio: Option<String>,
    pub season_number: Option<i64>,
    pub episode_number: Option<i64>,
    pub season_id: Option<i64>,
    pub status: RecordStatus,
    pub scan_attempts: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Series {
    pub id: i64,
    pub identifier: String,
    pub title: String,
    pub year: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Season {
    pub id: i64,
    pub series_id: i64,
    pub season_number: i64,
    pub created_at: String,
}

/// Container metadata pre-extracted by the scanning collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub duration_secs: Option<i64>,
    pub video_codec: Option<String>,
}

/// One file reported by the scanning collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    pub size: i64,
    /// Unix seconds.
    pub modified_at: i64,
    #[serde(default)]
    pub container: Option<ContainerInfo>,
    #[serde(default)]
    pub nfo_text: Option<String>,
}

/// One directory reported by the scanning collaborator, with its files.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryDescriptor {
    pub path: String,
    /// Unix seconds.
    pub modified_at: i64,
    #[serde(default)]
    pub files: Vec<FileDescriptor>,
}
