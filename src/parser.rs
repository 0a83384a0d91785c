use regex::Regex;
use std::sync::LazyLock;

use crate::models::{FileKind, RecordKind};

pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "ts", "m2ts", "vob",
];
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tbn"];
pub const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "sub", "ssa", "ass", "vtt", "idx", "smi"];

static RE_GROUP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[.*?\]\s*[\-]?\s*").unwrap());
static RE_SEASON_EP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bS(\d{1,2})[\s._-]*((?:E\d{1,3}[\s._-]*)+)").unwrap()
});
static RE_EP_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)E(\d{1,3})").unwrap());
static RE_NXM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,2})x(\d{1,3})(?:-(\d{1,3}))?\b").unwrap());
static RE_EP_OF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,3})\s*of\s*\d{1,3}\b").unwrap());
static RE_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[\s._-](?:cd|disc|disk|part|pt)[\s._-]?(\d{1,2})\b").unwrap()
});
static RE_TRAILING_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)[\s.\-]*[\(\[]?((?:19|20)\d{2})[\)\]]?\s*$").unwrap()
});
static RE_SPACE_COLLAPSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Dictionaries of technical tags matched against filename tokens. The
/// defaults cover common release naming; the config file can replace them.
#[derive(Debug, Clone)]
pub struct TagDictionaries {
    pub resolutions: Vec<String>,
    pub sources: Vec<String>,
    pub codecs: Vec<String>,
}

impl Default for TagDictionaries {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            resolutions: list(&["2160p", "4k", "1080p", "1080i", "720p", "576p", "480p"]),
            sources: list(&[
                "bluray", "blu-ray", "bdrip", "brrip", "webrip", "web-dl", "webdl", "hdtv",
                "dvdrip", "dvd", "remux", "hddvd", "sdtv", "cam",
            ]),
            codecs: list(&[
                "x264", "x265", "h264", "h265", "h.264", "h.265", "hevc", "avc", "xvid", "divx",
                "av1", "vp9",
            ]),
        }
    }
}

impl TagDictionaries {
    fn contains(list: &[String], token: &str) -> bool {
        list.iter().any(|t| t.eq_ignore_ascii_case(token))
    }

    fn is_technical(&self, token: &str) -> bool {
        Self::contains(&self.resolutions, token)
            || Self::contains(&self.sources, token)
            || Self::contains(&self.codecs, token)
    }
}

/// Parsed identity of a single video file name.
#[derive(Debug, Clone)]
pub struct ParsedVideo {
    pub kind: RecordKind,
    pub title: String,
    pub year: Option<i32>,
    pub season: Option<i32>,
    /// Multi-episode files carry more than one number; movies carry none.
    pub episodes: Vec<i32>,
    pub part: Option<i32>,
    pub container: Option<String>,
    pub resolution: Option<String>,
    pub source_tag: Option<String>,
    pub video_codec: Option<String>,
}

/// Classify a file by extension into the staged-file kinds.
pub fn classify_file(name: &str) -> FileKind {
    let Some(ext) = extension_of(name) else {
        return FileKind::Other;
    };
    let ext = ext.to_lowercase();
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Video
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Image
    } else if SUBTITLE_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Subtitle
    } else if ext == "nfo" {
        FileKind::Nfo
    } else {
        FileKind::Other
    }
}

pub fn extension_of(name: &str) -> Option<&str> {
    name.rsplit_once('.').map(|(_, ext)| ext)
}

/// Parse a video file name into its identity descriptor.
///
/// Season/episode markers are searched first (`SxxEyy`, `SxxEyyEzz`, `NxM`,
/// `x of y`); a name without any such marker is a movie. Ambiguous bare
/// numbers are never treated as episode markers.
pub fn parse_video_name(name: &str, dict: &TagDictionaries) -> ParsedVideo {
    let container = extension_of(name)
        .filter(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .map(|ext| ext.to_lowercase());

    let stem = match container {
        Some(_) => name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name),
        None => name,
    };

    // Release-group prefix ("[Group] Title - ...") carries no identity.
    let stem = RE_GROUP_TAG.replace(stem, "").to_string();

    let (resolution, source_tag, video_codec) = match_technical_tags(&stem, dict);

    let mut stem = stem;
    let part_match = RE_PART.captures(&stem).and_then(|caps| {
        let num: i32 = caps.get(1)?.as_str().parse().ok()?;
        Some((caps.get(0)?.range(), num))
    });
    let part = part_match.map(|(range, num)| {
        stem.replace_range(range, " ");
        num
    });

    if let Some((season, episodes, head)) = match_episode_marker(&stem) {
        let (title, year) = split_trailing_year(&clean_title(&head, dict));
        return ParsedVideo {
            kind: RecordKind::Episode,
            title,
            year,
            season: Some(season),
            episodes,
            part,
            container,
            resolution,
            source_tag,
            video_codec,
        };
    }

    let (title, year) = split_trailing_year(&clean_title(&stem, dict));
    ParsedVideo {
        kind: RecordKind::Movie,
        title,
        year,
        season: None,
        episodes: Vec::new(),
        part,
        container,
        resolution,
        source_tag,
        video_codec,
    }
}

/// Detect a season/episode pattern. Returns (season, episode numbers, text
/// before the marker) or None when the name reads as a movie.
fn match_episode_marker(stem: &str) -> Option<(i32, Vec<i32>, String)> {
    if let Some(caps) = RE_SEASON_EP.captures(stem) {
        let season: i32 = caps.get(1)?.as_str().parse().ok()?;
        let episodes: Vec<i32> = RE_EP_NUMBER
            .captures_iter(caps.get(2)?.as_str())
            .filter_map(|c| c.get(1)?.as_str().parse().ok())
            .collect();
        if !episodes.is_empty() {
            let head = stem[..caps.get(0)?.start()].to_string();
            return Some((season, episodes, head));
        }
    }

    if let Some(caps) = RE_NXM.captures(stem) {
        let season: i32 = caps.get(1)?.as_str().parse().ok()?;
        let first: i32 = caps.get(2)?.as_str().parse().ok()?;
        if (1..=50).contains(&season) && (1..=999).contains(&first) {
            let mut episodes = vec![first];
            if let Some(last) = caps.get(3).and_then(|m| m.as_str().parse::<i32>().ok()) {
                if last > first && last - first < 10 {
                    episodes.extend(first + 1..=last);
                }
            }
            let head = stem[..caps.get(0)?.start()].to_string();
            return Some((season, episodes, head));
        }
    }

    if let Some(caps) = RE_EP_OF.captures(stem) {
        let episode: i32 = caps.get(1)?.as_str().parse().ok()?;
        if (1..=999).contains(&episode) {
            let head = stem[..caps.get(0)?.start()].to_string();
            return Some((1, vec![episode], head));
        }
    }

    None
}

/// Strip technical tags and trailing separators from a title candidate.
fn clean_title(text: &str, dict: &TagDictionaries) -> String {
    let text = text.replace(['.', '_', '[', ']'], " ");

    // Cut the title at the first technical token; release names put all
    // quality/source/codec info after the title.
    let mut kept = Vec::new();
    for token in text.split_whitespace() {
        let bare = token.trim_matches(|c| matches!(c, '[' | ']' | '(' | ')'));
        if dict.is_technical(bare) {
            break;
        }
        kept.push(token);
    }

    let joined = kept.join(" ");
    let trimmed = joined.trim_end_matches(['-', ' ', '_']);
    RE_SPACE_COLLAPSE.replace_all(trimmed, " ").trim().to_string()
}

/// Extract a trailing "(YYYY)" / "YYYY" from a title, e.g.
/// "Avatar (2009)" -> ("Avatar", Some(2009)).
fn split_trailing_year(title: &str) -> (String, Option<i32>) {
    if let Some(caps) = RE_TRAILING_YEAR.captures(title) {
        let head = caps
            .get(1)
            .map(|m| m.as_str().trim_end_matches(['-', ' ', '.']))
            .unwrap_or(title);
        let year = caps.get(2).and_then(|m| m.as_str().parse().ok());
        if !head.is_empty() {
            return (head.to_string(), year);
        }
    }
    (title.trim().to_string(), None)
}

fn match_technical_tags(
    stem: &str,
    dict: &TagDictionaries,
) -> (Option<String>, Option<String>, Option<String>) {
    let mut resolution = None;
    let mut source_tag = None;
    let mut video_codec = None;

    // '-' is not a separator here so hyphenated tags ("blu-ray", "web-dl")
    // stay whole.
    for token in stem.split(|c: char| {
        c.is_whitespace() || matches!(c, '.' | '_' | '[' | ']' | '(' | ')')
    }) {
        let bare = token;
        if bare.is_empty() {
            continue;
        }
        if resolution.is_none() && TagDictionaries::contains(&dict.resolutions, bare) {
            resolution = Some(bare.to_lowercase());
        } else if source_tag.is_none() && TagDictionaries::contains(&dict.sources, bare) {
            source_tag = Some(bare.to_lowercase());
        } else if video_codec.is_none() && TagDictionaries::contains(&dict.codecs, bare) {
            video_codec = Some(bare.to_lowercase());
        }
    }

    (resolution, source_tag, video_codec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(name: &str) -> ParsedVideo {
        parse_video_name(name, &TagDictionaries::default())
    }

    #[test]
    fn test_parse_movie_with_year() {
        let parsed = parse("Avatar (2009) 1080p.mkv");
        assert_eq!(parsed.kind, RecordKind::Movie);
        assert_eq!(parsed.title, "Avatar");
        assert_eq!(parsed.year, Some(2009));
        assert_eq!(parsed.resolution.as_deref(), Some("1080p"));
        assert_eq!(parsed.container.as_deref(), Some("mkv"));
        assert!(parsed.episodes.is_empty());
    }

    #[test]
    fn test_parse_standard_episode() {
        let parsed = parse("Show.Name.S02E05.mkv");
        assert_eq!(parsed.kind, RecordKind::Episode);
        assert_eq!(parsed.title, "Show Name");
        assert_eq!(parsed.season, Some(2));
        assert_eq!(parsed.episodes, vec![5]);
    }

    #[test]
    fn test_parse_multi_episode() {
        let parsed = parse("Show Name S01E01E02.mkv");
        assert_eq!(parsed.season, Some(1));
        assert_eq!(parsed.episodes, vec![1, 2]);

        let parsed = parse("Show.Name.S03E07-E08.720p.mkv");
        assert_eq!(parsed.season, Some(3));
        assert_eq!(parsed.episodes, vec![7, 8]);
        assert_eq!(parsed.resolution.as_deref(), Some("720p"));
    }

    #[test]
    fn test_parse_nxm_episode() {
        let parsed = parse("Show Name 2x05.avi");
        assert_eq!(parsed.kind, RecordKind::Episode);
        assert_eq!(parsed.season, Some(2));
        assert_eq!(parsed.episodes, vec![5]);

        let parsed = parse("Show Name 1x01-03.avi");
        assert_eq!(parsed.episodes, vec![1, 2, 3]);
    }

    #[test]
    fn test_parse_episode_of_form() {
        let parsed = parse("Documentary 2 of 6.mkv");
        assert_eq!(parsed.kind, RecordKind::Episode);
        assert_eq!(parsed.season, Some(1));
        assert_eq!(parsed.episodes, vec![2]);
        assert_eq!(parsed.title, "Documentary");
    }

    #[test]
    fn test_ambiguous_number_is_movie() {
        // A bare number is not an episode marker.
        let parsed = parse("2012.mkv");
        assert_eq!(parsed.kind, RecordKind::Movie);

        let parsed = parse("Ocean's 11 (2001).mkv");
        assert_eq!(parsed.kind, RecordKind::Movie);
        assert_eq!(parsed.year, Some(2001));
    }

    #[test]
    fn test_parse_part_number() {
        let parsed = parse("Long Movie (1968) cd1.mkv");
        assert_eq!(parsed.kind, RecordKind::Movie);
        assert_eq!(parsed.title, "Long Movie");
        assert_eq!(parsed.year, Some(1968));
        assert_eq!(parsed.part, Some(1));

        let parsed = parse("Long Movie (1968) part2.mkv");
        assert_eq!(parsed.part, Some(2));
    }

    #[test]
    fn test_parse_group_tag_and_release_info() {
        let parsed = parse("[Group] Show Name - S01E05 [1080p][x265].mkv");
        assert_eq!(parsed.kind, RecordKind::Episode);
        assert_eq!(parsed.title, "Show Name");
        assert_eq!(parsed.episodes, vec![5]);
        assert_eq!(parsed.video_codec.as_deref(), Some("x265"));

        let parsed = parse("The.Matrix.1999.1080p.BluRay.x264.mkv");
        assert_eq!(parsed.kind, RecordKind::Movie);
        assert_eq!(parsed.title, "The Matrix");
        assert_eq!(parsed.year, Some(1999));
        assert_eq!(parsed.source_tag.as_deref(), Some("bluray"));
        assert_eq!(parsed.video_codec.as_deref(), Some("x264"));
    }

    #[test]
    fn test_episode_with_series_year() {
        let parsed = parse("Show Name (2008) S01E01.mkv");
        assert_eq!(parsed.title, "Show Name");
        assert_eq!(parsed.year, Some(2008));
        assert_eq!(parsed.season, Some(1));
    }

    #[test]
    fn test_classify_file() {
        assert_eq!(classify_file("movie.mkv"), FileKind::Video);
        assert_eq!(classify_file("poster.jpg"), FileKind::Image);
        assert_eq!(classify_file("movie.srt"), FileKind::Subtitle);
        assert_eq!(classify_file("movie.nfo"), FileKind::Nfo);
        assert_eq!(classify_file("notes.txt"), FileKind::Other);
        assert_eq!(classify_file("no_extension"), FileKind::Other);
    }
}
