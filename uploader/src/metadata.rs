//! Titles, descriptions and tags for a video, in every language we publish in.

use crate::config::{Config, Privacy};
use crate::record::{Language, VideoRecord};
use jiff::Timestamp;
use jiff::tz::TimeZone;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// What gets sent when a video is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy: Privacy,
    /// Only set for a publish time that is still in the future.
    pub publish_at: Option<Timestamp>,
}

/// Title and description in one language.
///
/// See: <https://developers.google.com/youtube/v3/docs/videos#localizations>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub title: String,
    pub description: String,
}

/// Localized texts keyed by language code (`zh-TW`, `ja`, ...).
pub type Localizations = BTreeMap<String, LocalizedText>;

/// Derives [`VideoMetadata`] and [`Localizations`] from a [`VideoRecord`].
///
/// Pure: everything it knows comes from the configuration it was built from.
#[derive(Debug, Clone)]
pub struct MetadataBuilder {
    hashtags: String,
    footer: String,
    keywords: Vec<String>,
    category_id: String,
    privacy: Privacy,
    vocabulary: HashMap<Language, Vec<(String, String)>>,
    time_zone: TimeZone,
}

impl MetadataBuilder {
    pub fn from_config(config: &Config) -> Self {
        let vocabulary = Language::ALL
            .into_iter()
            .map(|language| (language, config.vocabulary.terms(language).to_vec()))
            .collect();
        Self {
            hashtags: config.description.hashtags.clone(),
            footer: config.description.footer.clone(),
            keywords: config
                .upload
                .keywords
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect(),
            category_id: config.upload.category_id.clone(),
            privacy: config.upload.privacy,
            vocabulary,
            time_zone: TimeZone::system(),
        }
    }

    /// Interprets publish times in `time_zone` instead of the system zone.
    pub fn with_time_zone(mut self, time_zone: TimeZone) -> Self {
        self.time_zone = time_zone;
        self
    }

    /// Replaces every whole-word English term in `text` with its `language` counterpart.
    ///
    /// A term only matches where it is not glued to other ASCII letters or digits, so
    /// `Protossian` is left alone. The text is scanned once, left to right, and at each position
    /// the longest matching term wins, so replacements never feed into each other.
    pub fn translate_title(&self, text: &str, language: Language) -> String {
        match self.vocabulary.get(&language) {
            Some(terms) if !terms.is_empty() => substitute(text, terms),
            _ => text.to_string(),
        }
    }

    /// `hashtags`, the title, `RP : {url}` if there is a replay link, then the footer.
    pub fn build_description(&self, title: &str, replay_url: Option<&str>) -> String {
        let mut lines = vec![self.hashtags.as_str(), title];
        let replay_line;
        if let Some(url) = replay_url.filter(|u| !u.is_empty()) {
            replay_line = format!("RP : {url}");
            lines.push(&replay_line);
        }
        if !self.footer.is_empty() {
            lines.push(&self.footer);
        }
        lines.retain(|l| !l.is_empty());
        lines.join("\n")
    }

    /// Configured keywords, plus the game name unless it is already one of them.
    pub fn tags(&self, game_name: &str) -> Vec<String> {
        let mut tags = self.keywords.clone();
        let game_name = game_name.trim();
        if !game_name.is_empty() && !tags.iter().any(|t| t == game_name) {
            tags.push(game_name.to_string());
        }
        tags
    }

    /// Metadata for creating `record`'s video, as of `now`.
    pub fn video_metadata(
        &self,
        record: &VideoRecord,
        replay_url: Option<&str>,
        now: Timestamp,
    ) -> VideoMetadata {
        let publish_at = match record.publish_at.to_zoned(self.time_zone.clone()) {
            Ok(zoned) if zoned.timestamp() > now => Some(zoned.timestamp()),
            Ok(_) => {
                tracing::info!(
                    publish_at = %record.publish_at,
                    "publish time already passed, not scheduling"
                );
                None
            }
            Err(e) => {
                tracing::warn!(publish_at = %record.publish_at, error = %e, "unusable publish time");
                None
            }
        };
        VideoMetadata {
            title: record.title.clone(),
            description: self.build_description(&record.title, replay_url),
            tags: self.tags(&record.game_name),
            category_id: self.category_id.clone(),
            // Scheduled publishing only works on private videos.
            privacy: if publish_at.is_some() {
                Privacy::Private
            } else {
                self.privacy
            },
            publish_at,
        }
    }

    /// Localized title and description for each of `record`'s subtitle languages.
    pub fn localizations(&self, record: &VideoRecord, replay_url: Option<&str>) -> Localizations {
        record
            .subtitle_languages
            .iter()
            .map(|&language| {
                let title = self.translate_title(&record.title, language);
                let description = self.build_description(&title, replay_url);
                (language.code().to_string(), LocalizedText { title, description })
            })
            .collect()
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
}

fn substitute(text: &str, terms: &[(String, String)]) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        if i == 0 || !is_word_byte(bytes[i - 1]) {
            let rest = &text[i..];
            let longest = terms
                .iter()
                .filter(|(from, _)| {
                    !from.is_empty()
                        && rest.starts_with(from.as_str())
                        && bytes.get(i + from.len()).is_none_or(|&b| !is_word_byte(b))
                })
                .min_by_key(|(from, _)| std::cmp::Reverse(from.len()));
            if let Some((from, to)) = longest {
                out.push_str(to);
                i += from.len();
                continue;
            }
        }
        let Some(ch) = text[i..].chars().next() else {
            break;
        };
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}
