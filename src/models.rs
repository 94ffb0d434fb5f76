use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug)]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl std::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Games the redemption site knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Game {
    Bl1,
    Bl2,
    Bl3,
    Bl4,
    Blps,
    Ttw,
    Gdfll,
    Unknown,
}

impl Game {
    pub const ALL: [Game; 8] = [
        Game::Bl1,
        Game::Bl2,
        Game::Bl3,
        Game::Bl4,
        Game::Blps,
        Game::Ttw,
        Game::Gdfll,
        Game::Unknown,
    ];

    pub fn short_name(&self) -> &'static str {
        match self {
            Game::Bl1 => "bl1",
            Game::Bl2 => "bl2",
            Game::Bl3 => "bl3",
            Game::Bl4 => "bl4",
            Game::Blps => "blps",
            Game::Ttw => "ttw",
            Game::Gdfll => "gdfll",
            Game::Unknown => "unknown",
        }
    }

    /// Display name as the site prints it in the headings of the redemption page.
    pub fn long_name(&self) -> &'static str {
        match self {
            Game::Bl1 => "Borderlands: Game of the Year Edition",
            Game::Bl2 => "Borderlands 2",
            Game::Bl3 => "Borderlands 3",
            Game::Bl4 => "Borderlands 4",
            Game::Blps => "Borderlands The Pre-Sequel",
            Game::Ttw => "Tiny Tina's Wonderlands",
            Game::Gdfll => "Godfall",
            Game::Unknown => "Unknown",
        }
    }

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Game::Bl1 => &["Borderlands 1", "bl"],
            _ => &[],
        }
    }
}

impl std::fmt::Display for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for Game {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Game::ALL
            .into_iter()
            .find(|g| {
                g.short_name().eq_ignore_ascii_case(wanted)
                    || g.long_name().eq_ignore_ascii_case(wanted)
                    || g.aliases().iter().any(|a| a.eq_ignore_ascii_case(wanted))
            })
            .ok_or_else(|| UnknownVariant {
                kind: "game",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Steam,
    Epic,
    Psn,
    Xboxlive,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Steam,
        Platform::Epic,
        Platform::Psn,
        Platform::Xboxlive,
    ];

    /// Identifier the site embeds in the `service` field of a redemption form.
    pub fn site_id(&self) -> &'static str {
        match self {
            Platform::Steam => "steam",
            Platform::Epic => "epic",
            Platform::Psn => "psn",
            Platform::Xboxlive => "xboxlive",
        }
    }

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Platform::Psn => &["playstation", "ps"],
            Platform::Xboxlive => &["xbox"],
            _ => &[],
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.site_id())
    }
}

impl FromStr for Platform {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Platform::ALL
            .into_iter()
            .find(|p| {
                p.site_id().eq_ignore_ascii_case(wanted)
                    || p.aliases().iter().any(|a| a.eq_ignore_ascii_case(wanted))
            })
            .ok_or_else(|| UnknownVariant {
                kind: "platform",
                value: s.to_string(),
            })
    }
}

/// A stored code record. Owned by the key store; the redemption core only reads
/// `code`/`game`/`platform` and hands back an outcome for the flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub code: String,
    pub game: Game,
    pub platform: Platform,
    #[serde(default)]
    pub reward: String,
    #[serde(default)]
    pub num_golden: Option<u32>,
    #[serde(default)]
    pub redeemed: bool,
    #[serde(default)]
    pub expired: bool,
}

impl Key {
    pub fn new(code: impl Into<String>, game: Game, platform: Platform) -> Self {
        Key {
            code: code.into(),
            game,
            platform,
            reward: String::new(),
            num_golden: None,
            redeemed: false,
            expired: false,
        }
    }

    pub fn with_reward(mut self, reward: impl Into<String>) -> Self {
        self.reward = reward.into();
        self
    }

    /// Whether `self` and `other` describe the same (code, game, platform) triple.
    pub fn same_slot(&self, other: &Key) -> bool {
        self.code == other.code && self.game == other.game && self.platform == other.platform
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_parses_short_long_and_alias_names() {
        assert_eq!("bl3".parse::<Game>().unwrap(), Game::Bl3);
        assert_eq!("Borderlands 4".parse::<Game>().unwrap(), Game::Bl4);
        assert_eq!("borderlands 1".parse::<Game>().unwrap(), Game::Bl1);
        assert_eq!(
            "Tiny Tina's Wonderlands".parse::<Game>().unwrap(),
            Game::Ttw
        );
        assert!("Halo".parse::<Game>().is_err());
    }

    #[test]
    fn platform_parses_aliases() {
        assert_eq!("PlayStation".parse::<Platform>().unwrap(), Platform::Psn);
        assert_eq!("xbox".parse::<Platform>().unwrap(), Platform::Xboxlive);
        assert_eq!("steam".parse::<Platform>().unwrap(), Platform::Steam);
        assert!("switch".parse::<Platform>().is_err());
    }

    #[test]
    fn key_serializes_with_short_names() {
        let key = Key::new("ABC", Game::Blps, Platform::Xboxlive);
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["game"], "blps");
        assert_eq!(json["platform"], "xboxlive");
    }
}
