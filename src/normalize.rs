// Title normalization and stable identifier derivation.
//
// Identifiers must survive re-scans of the same file unchanged, so every step
// here is deterministic and the whole pipeline is idempotent.

use deunicode::deunicode;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Characters that survive normalization verbatim.
fn is_kept(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '(' | ')')
}

/// Characters that separate tokens and collapse to a single space.
fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '.' | '_' | '/' | '\\' | '+' | '|')
}

/// Token delimiters considered when capitalizing the first letter of a token.
fn is_delimiter(c: char) -> bool {
    is_separator(c) || matches!(c, '-' | '(')
}

/// Title normalizer with an optional transliteration pass for non-Latin
/// scripts (off by default, toggled by `normalize.transliterate`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    pub transliterate: bool,
}

impl Normalizer {
    pub fn new(transliterate: bool) -> Self {
        Self { transliterate }
    }

    /// Canonicalize a free-text title. Blank input yields an empty string.
    ///
    /// Steps, in fixed order: optional transliteration, sharp-s replacement,
    /// diacritic stripping, per-token capitalization, punctuation removal,
    /// separator collapsing, trim.
    pub fn normalize(&self, raw: &str) -> String {
        let raw = raw.trim();
        if raw.is_empty() {
            return String::new();
        }

        let text = if self.transliterate && !raw.is_ascii() {
            deunicode(raw)
        } else {
            raw.to_string()
        };

        let text = text.replace('ß', "ss").replace('ẞ', "SS");

        // NFD decomposition, then drop combining marks ("é" -> "e").
        let text: String = text.nfd().filter(|c| !is_combining_mark(*c)).collect();

        let text = capitalize_tokens(&text);

        // Keep alphanumerics, hyphens and parentheses; fold separator runs to
        // one space; drop remaining punctuation and symbols entirely so that
        // "Don't" becomes "Dont" rather than "Don t".
        let mut out = String::with_capacity(text.len());
        let mut pending_space = false;
        for c in text.chars() {
            if is_kept(c) {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c);
            } else if is_separator(c) {
                pending_space = true;
            }
        }

        out.trim_matches(|c: char| c.is_whitespace()).to_string()
    }

    /// Reduce a title to its bare identifier form: normalized, with every
    /// non-alphanumeric character removed ("Show Name" -> "ShowName").
    pub fn identifier(&self, title: &str) -> String {
        self.normalize(title)
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect()
    }

    /// Stable identifier for a movie record, e.g. ("Avatar", 2009) -> "Avatar2009".
    pub fn movie_identifier(&self, title: &str, year: Option<i32>) -> String {
        let mut id = self.identifier(title);
        if let Some(year) = year {
            id.push_str(&year.to_string());
        }
        id
    }

    /// Stable identifier for a series, e.g. ("Show Name", None) -> "ShowName".
    pub fn series_identifier(&self, title: &str, year: Option<i32>) -> String {
        self.movie_identifier(title, year)
    }

    /// Stable identifier for an episode record:
    /// ("Show Name", None, 2, 5) -> "ShowNameS02E05".
    pub fn episode_identifier(
        &self,
        series_title: &str,
        year: Option<i32>,
        season: i32,
        episode: i32,
    ) -> String {
        format!(
            "{}S{:02}E{:02}",
            self.series_identifier(series_title, year),
            season,
            episode
        )
    }
}

/// Uppercase the first letter of every token. The rest of each token is left
/// untouched so already-capitalized input passes through unchanged.
fn capitalize_tokens(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_token_start = true;
    for c in text.chars() {
        if is_delimiter(c) {
            at_token_start = true;
            out.push(c);
        } else if at_token_start {
            out.extend(c.to_uppercase());
            at_token_start = false;
        } else {
            out.push(c);
        }
    }
    out
}
