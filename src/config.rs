use crate::collector::DEFAULT_SOURCE;
use crate::models::{Game, Platform};
use crate::network_client::DEFAULT_BASE_URL;
use crate::store::GamePlatformMap;
use std::fs;
use std::path::PathBuf;

pub const COOKIE_FILE_NAME: &str = ".cookies.json";
pub const DB_FILE_NAME: &str = "keys.json";

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub user: Option<String>,
    pub password: Option<String>,
    pub data_dir: PathBuf,
    pub cookie_file: PathBuf,
    pub db_file: PathBuf,
    /// URL or file to import new codes from; `None` disables importing.
    pub source: Option<String>,
    pub base_url: String,
}

impl Settings {
    /// Fills in the paths derived from `data_dir` and normalises the code source.
    pub fn new(
        user: Option<String>,
        password: Option<String>,
        data_dir: PathBuf,
        cookie_file: Option<PathBuf>,
        db_file: Option<PathBuf>,
        source: Option<String>,
        base_url: Option<String>,
    ) -> Self {
        let source = match source {
            None => Some(DEFAULT_SOURCE.to_string()),
            Some(s) if s.trim().is_empty() || s.eq_ignore_ascii_case("none") => None,
            Some(s) => Some(s),
        };
        Settings {
            user: user.filter(|u| !u.is_empty()),
            password: password.filter(|p| !p.is_empty()),
            cookie_file: cookie_file.unwrap_or_else(|| data_dir.join(COOKIE_FILE_NAME)),
            db_file: db_file.unwrap_or_else(|| data_dir.join(DB_FILE_NAME)),
            data_dir,
            source,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    /// Creates the directories the session and key files live in.
    pub fn prepare_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        for file in [&self.cookie_file, &self.db_file] {
            if let Some(parent) = file.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }
        Ok(())
    }
}

/// Every selected game paired with every selected platform.
///
/// No games means every known game; no platforms means every platform.
pub fn target_map(games: &[Game], platforms: &[Platform]) -> GamePlatformMap {
    let games: Vec<Game> = if games.is_empty() {
        Game::ALL.into_iter().filter(|g| *g != Game::Unknown).collect()
    } else {
        games.to_vec()
    };
    let platforms: Vec<Platform> = if platforms.is_empty() {
        Platform::ALL.to_vec()
    } else {
        platforms.to_vec()
    };
    games.into_iter().map(|g| (g, platforms.clone())).collect()
}
