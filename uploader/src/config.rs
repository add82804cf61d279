//! `sc2-upload.toml`: everything that used to be a hard-coded constant.

use crate::engine::DEFAULT_MAX_RETRIES;
use crate::google_api::resumable::{DEFAULT_CHUNK_SIZE, normalize_chunk_size};
use crate::record::{Language, Matchup};
use eyre::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "sc2-upload.toml";

const DEFAULT_KEYWORDS: &str = "StarCraft II, Starcraft 2, SC2, 星海爭霸2, Ladder, 天梯, \
Ranked Match, Protoss, 神族, Zerg, 蟲族, Terran, 人族, Nzx, Gameplay, SC2 Strategy, PvP, PvZ, \
PvT, IEM, ESL, KR Server";

const DEFAULT_HASHTAGS: &str = "#starcraft2 #星海爭霸2 #gaming";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub oauth: OAuthConfig,
    pub upload: UploadConfig,
    pub description: DescriptionConfig,
    pub drive: DriveConfig,
    pub playlists: PlaylistConfig,
    pub vocabulary: Vocabulary,
}

impl Config {
    /// Reads `path`, falling back to the built-in defaults if it does not exist.
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("read config file {}", path.display()));
            }
        };
        let config = Self::from_toml(&text)
            .with_context(|| format!("load config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> eyre::Result<Self> {
        let mut config: Self = toml::from_str(text).context("parse TOML")?;
        config.validate()?;
        config.vocabulary = config.vocabulary.over_defaults();
        Ok(config)
    }

    fn validate(&self) -> eyre::Result<()> {
        for key in self.playlists.matchup.keys() {
            if key.parse::<Matchup>().is_err() {
                eyre::bail!("playlists.matchup: unknown matchup `{key}`");
            }
        }
        for key in self.vocabulary.0.keys() {
            if key.parse::<Language>().is_err() {
                eyre::bail!("vocabulary: unknown language `{key}`");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Desktop-app client registered in the Google Cloud console.
    pub client_id: String,
    pub client_secret: String,
    /// Where `youtube_token.json` and `google_drive_token.json` live.
    pub token_dir: PathBuf,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    YouTube,
    Bilibili,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    #[default]
    Private,
    Unlisted,
    Public,
}

impl Privacy {
    pub fn as_str(self) -> &'static str {
        match self {
            Privacy::Private => "private",
            Privacy::Unlisted => "unlisted",
            Privacy::Public => "public",
        }
    }
}

impl fmt::Display for Privacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub platform: Platform,
    /// YouTube video category; 20 is Gaming.
    pub category_id: String,
    pub privacy: Privacy,
    /// Comma-separated tag list.
    pub keywords: String,
    pub max_retries: u32,
    /// Bytes per resumable-upload request; rounded down to a multiple of 256 KiB.
    pub chunk_size: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            platform: Platform::YouTube,
            category_id: "20".to_string(),
            privacy: Privacy::Private,
            keywords: DEFAULT_KEYWORDS.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl UploadConfig {
    pub fn chunk_size(&self) -> u64 {
        normalize_chunk_size(self.chunk_size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptionConfig {
    pub hashtags: String,
    /// Appended verbatim to every description (social links and the like).
    pub footer: String,
}

impl Default for DescriptionConfig {
    fn default() -> Self {
        Self {
            hashtags: DEFAULT_HASHTAGS.to_string(),
            footer: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Drive folder replays are backed up into; the Drive root if unset.
    pub replay_folder_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistConfig {
    /// Playlist per matchup, keyed `PVP`, `PVZ`, `PVT`, `PVR`.
    pub matchup: BTreeMap<String, String>,
    /// Added to every video that gets default playlists.
    pub ranked: Option<String>,
}

impl PlaylistConfig {
    /// Playlists for a video whose manifest entry names none.
    pub fn defaults_for(&self, matchup: Matchup) -> Vec<String> {
        self.matchup
            .get(matchup.as_str())
            .into_iter()
            .chain(self.ranked.as_ref())
            .cloned()
            .collect()
    }
}

/// English term → localized term, per language, in table order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary(pub BTreeMap<String, Vec<(String, String)>>);

impl Vocabulary {
    pub fn terms(&self, language: Language) -> &[(String, String)] {
        self.0
            .get(language.code())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Built-in tables with these ones swapped in, one language at a time.
    pub fn over_defaults(self) -> Self {
        let mut merged = Self::default();
        merged.0.extend(self.0);
        merged
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        let table = |terms: [(&str, &str); 4]| {
            terms
                .into_iter()
                .map(|(en, local)| (en.to_string(), local.to_string()))
                .collect()
        };
        Self(BTreeMap::from([
            (
                Language::TraditionalChinese.code().to_string(),
                table([
                    ("Protoss", "神族"),
                    ("Zerg", "蟲族"),
                    ("Terran", "人族"),
                    ("Random", "隨機"),
                ]),
            ),
            (
                Language::Japanese.code().to_string(),
                table([
                    ("Protoss", "プロトス"),
                    ("Zerg", "ザーグ"),
                    ("Terran", "テラン"),
                    ("Random", "ランダム"),
                ]),
            ),
            (
                Language::Korean.code().to_string(),
                table([
                    ("Protoss", "프로토스"),
                    ("Zerg", "저그"),
                    ("Terran", "테란"),
                    ("Random", "랜덤"),
                ]),
            ),
            (
                Language::SimplifiedChinese.code().to_string(),
                table([
                    ("Protoss", "神族"),
                    ("Zerg", "虫族"),
                    ("Terran", "人类"),
                    ("Random", "随机"),
                ]),
            ),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.upload.category_id, "20");
        assert_eq!(config.upload.max_retries, 10);
        assert_eq!(config.upload.privacy, Privacy::Private);
        assert_eq!(
            config.vocabulary.terms(Language::Korean)[0],
            ("Protoss".to_string(), "프로토스".to_string())
        );
        assert!(config.vocabulary.terms(Language::English).is_empty());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [oauth]
            client_id = "abc.apps.googleusercontent.com"
            token_dir = "/home/nzs/.sc2-upload"

            [upload]
            privacy = "unlisted"
            chunk_size = 1000000

            [playlists]
            ranked = "PLrank"

            [playlists.matchup]
            PVZ = "PLpvz"
            "#,
        )
        .unwrap();
        assert_eq!(config.oauth.client_id, "abc.apps.googleusercontent.com");
        assert_eq!(config.oauth.client_secret, "");
        assert_eq!(config.oauth.token_dir, PathBuf::from("/home/nzs/.sc2-upload"));
        assert_eq!(config.upload.privacy, Privacy::Unlisted);
        assert_eq!(config.upload.category_id, "20");
        assert_eq!(config.upload.chunk_size(), 3 * 256 * 1024);
        assert_eq!(config.description, DescriptionConfig::default());
        assert_eq!(
            config.playlists.defaults_for(Matchup::Pvz),
            vec!["PLpvz".to_string(), "PLrank".to_string()]
        );
        assert_eq!(
            config.playlists.defaults_for(Matchup::Unknown),
            vec!["PLrank".to_string()]
        );
    }

    #[test]
    fn vocabulary_overrides_one_language_at_a_time() {
        let config = Config::from_toml(
            r#"
            [vocabulary]
            "zh-TW" = [["Protoss", "星靈"], ["Zerg", "異蟲"]]
            "#,
        )
        .unwrap();
        assert_eq!(
            config.vocabulary.terms(Language::TraditionalChinese),
            [
                ("Protoss".to_string(), "星靈".to_string()),
                ("Zerg".to_string(), "異蟲".to_string())
            ]
        );
        assert_eq!(
            config.vocabulary.terms(Language::Japanese),
            Vocabulary::default().terms(Language::Japanese)
        );
        assert_eq!(config.vocabulary.terms(Language::Japanese).len(), 4);
    }

    #[test]
    fn vocabulary_language_can_be_emptied() {
        let config = Config::from_toml("[vocabulary]
ko = []
").unwrap();
        assert!(config.vocabulary.terms(Language::Korean).is_empty());
        assert!(!config.vocabulary.terms(Language::Japanese).is_empty());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_toml("[playlists.matchup]\nZVZ = \"PL\"\n").unwrap_err();
        assert!(format!("{err:#}").contains("ZVZ"), "{err:#}");
        let err = Config::from_toml("[vocabulary]\nfr = []\n").unwrap_err();
        assert!(format!("{err:#}").contains("fr"), "{err:#}");
    }

    #[test]
    fn defaults_survive_toml_round_trip() {
        let text = toml::to_string(&Config::default()).unwrap();
        assert_eq!(Config::from_toml(&text).unwrap(), Config::default());
    }
}
