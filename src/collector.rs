use crate::models::{Game, Key, Platform};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

pub const DEFAULT_SOURCE: &str =
    "https://raw.githubusercontent.com/ugoogalizer/autoshift-codes/main/shiftcodes.json";

static GOLDEN_KEYS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+) (?:gold|skelet).*key").expect("Failed to compile golden key regex")
});

#[derive(Debug)]
pub enum CollectorError {
    Reqwest(reqwest::Error),
    Io(std::io::Error),
    SerdeJsonError(serde_json::Error),
    EmptyFeed,
}

impl From<reqwest::Error> for CollectorError {
    fn from(err: reqwest::Error) -> Self {
        CollectorError::Reqwest(err)
    }
}

impl From<std::io::Error> for CollectorError {
    fn from(err: std::io::Error) -> Self {
        CollectorError::Io(err)
    }
}

impl From<serde_json::Error> for CollectorError {
    fn from(err: serde_json::Error) -> Self {
        CollectorError::SerdeJsonError(err)
    }
}

impl std::fmt::Display for CollectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorError::Reqwest(e) => write!(f, "Error querying for new keys: {}", e),
            CollectorError::Io(e) => write!(f, "Error reading key source: {}", e),
            CollectorError::SerdeJsonError(e) => write!(f, "Invalid key source: {}", e),
            CollectorError::EmptyFeed => write!(f, "Invalid key source: no code list found"),
        }
    }
}

impl std::error::Error for CollectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectorError::Reqwest(e) => Some(e),
            CollectorError::Io(e) => Some(e),
            CollectorError::SerdeJsonError(e) => Some(e),
            CollectorError::EmptyFeed => None,
        }
    }
}

/// One code as listed by the public feed, before cleaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawCode {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub game: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub reward: String,
}

#[derive(Debug, Deserialize)]
struct FeedSection {
    #[serde(default)]
    codes: Vec<RawCode>,
}

/// Parses the feed document: a list whose first entry holds the `codes` array.
pub fn parse_feed(content: &str) -> Result<Vec<RawCode>, CollectorError> {
    let sections: Vec<FeedSection> = serde_json::from_str(content)?;
    let first = sections.into_iter().next().ok_or(CollectorError::EmptyFeed)?;
    Ok(first.codes)
}

/// Reads raw codes from an http(s) URL or a local JSON file.
pub async fn fetch_codes(source: &str) -> Result<Vec<RawCode>, CollectorError> {
    let start_time = Instant::now();
    let content = if source.starts_with("http://") || source.starts_with("https://") {
        reqwest::get(source).await?.error_for_status()?.text().await?
    } else {
        tokio::fs::read_to_string(Path::new(source)).await?
    };
    info!("[TIMING] fetching codes from {} took {:.2?}", source, start_time.elapsed());
    parse_feed(&content)
}

/// Number of golden/skeleton keys a reward text promises.
pub fn golden_key_count(reward: &str) -> Option<u32> {
    let captures = GOLDEN_KEYS_RE.captures(reward)?;
    let count: u32 = captures.get(1)?.as_str().parse().ok()?;
    // event names like "SDCC 2024 Golden Keys" are not counts
    Some(if count > 2000 { 1 } else { count })
}

fn platforms_for(raw: &str) -> Vec<Platform> {
    match raw.trim().to_lowercase().as_str() {
        "universal" => Platform::ALL.to_vec(),
        "pc" => vec![Platform::Steam, Platform::Epic],
        other => other.parse::<Platform>().into_iter().collect(),
    }
}

/// Turns raw feed entries into storable records.
///
/// Unknown games and platforms are dropped, "universal" codes are expanded to every
/// platform and duplicates of the same (code, game, platform) are removed.
pub fn clean_codes(raw: &[RawCode]) -> Vec<Key> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for entry in raw {
        let code = entry.code.trim();
        if code.is_empty() {
            continue;
        }
        let game = match entry.game.parse::<Game>() {
            Ok(Game::Unknown) | Err(_) => {
                debug!("skipping {} for unrecognised game '{}'", code, entry.game);
                continue;
            }
            Ok(game) => game,
        };
        let platforms = platforms_for(&entry.platform);
        if platforms.is_empty() {
            debug!("skipping {} for unrecognised platform '{}'", code, entry.platform);
        }
        for platform in platforms {
            if !seen.insert((code.to_string(), game, platform)) {
                continue;
            }
            let mut key = Key::new(code, game, platform).with_reward(entry.reward.trim());
            key.num_golden = golden_key_count(&key.reward);
            keys.push(key);
        }
    }
    keys
}
