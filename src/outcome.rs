use crate::models::Key;

/// Result of a single redemption attempt.
///
/// `PendingRedirect` only ever lives inside the status resolver's loop; callers of
/// `RedemptionClient::redeem` never see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    AlreadyRedeemed,
    Expired,
    Invalid(String),
    RateLimited,
    TryLater,
    Unknown(String),
    PendingRedirect(String),
}

impl Outcome {
    /// The human-readable message template for this outcome.
    ///
    /// Placeholders: `{code}`, `{reward}` and `{msg}`.
    pub fn template(&self) -> &'static str {
        match self {
            Outcome::Success => "Redeemed {reward}",
            Outcome::AlreadyRedeemed => "Already redeemed {reward}",
            Outcome::Expired => "This code expired by now.. ({reward})",
            Outcome::Invalid(_) => "The code `{code}` is invalid ({msg})",
            Outcome::RateLimited => "Too many requests",
            Outcome::TryLater => {
                "To continue to redeem SHiFT codes, please launch a SHiFT-enabled title first!"
            }
            Outcome::Unknown(_) => "An unknown Error occured: {msg}",
            Outcome::PendingRedirect(_) => "Following redirect to {msg}",
        }
    }

    /// Fills the template with the code/reward of `key` and the payload of the outcome.
    ///
    /// Any placeholder that cannot be filled makes the whole message fall back to the
    /// unfilled template.
    pub fn message(&self, key: Option<&Key>) -> String {
        let template = self.template();
        let msg = match self {
            Outcome::Invalid(m) | Outcome::Unknown(m) | Outcome::PendingRedirect(m) => {
                Some(m.as_str())
            }
            _ => None,
        };
        let code = key.map(|k| k.code.as_str());
        let reward = key.map(|k| k.reward.as_str()).filter(|r| !r.is_empty());

        let mut filled = template.to_string();
        for (placeholder, value) in [("{code}", code), ("{reward}", reward), ("{msg}", msg)] {
            if !filled.contains(placeholder) {
                continue;
            }
            match value {
                Some(v) => filled = filled.replace(placeholder, v),
                None => return template.to_string(),
            }
        }
        filled
    }

    /// Whether a record should be flagged as redeemed after this outcome.
    pub fn marks_redeemed(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::AlreadyRedeemed)
    }

    /// Whether a record (and every record sharing its code) should be flagged as expired.
    pub fn marks_expired(&self) -> bool {
        matches!(self, Outcome::Expired | Outcome::Invalid(_))
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "Success"),
            Outcome::AlreadyRedeemed => write!(f, "AlreadyRedeemed"),
            Outcome::Expired => write!(f, "Expired"),
            Outcome::Invalid(m) => write!(f, "Invalid({})", m),
            Outcome::RateLimited => write!(f, "RateLimited"),
            Outcome::TryLater => write!(f, "TryLater"),
            Outcome::Unknown(m) => write!(f, "Unknown({})", m),
            Outcome::PendingRedirect(l) => write!(f, "PendingRedirect({})", l),
        }
    }
}

/// Classifies a status text reported by the site (status widget or poll payload).
///
/// `None` means the text carries no usable signal.
pub fn classify_status_text(text: &str) -> Option<Outcome> {
    let lower = text.to_lowercase();
    if lower.contains("success") {
        Some(Outcome::Success)
    } else if lower.contains("failed") || lower.contains("been redeemed") {
        Some(Outcome::AlreadyRedeemed)
    } else {
        None
    }
}

/// Classifies the body of a code lookup that did not contain a redemption form.
pub fn classify_lookup_text(text: &str) -> Outcome {
    let lower = text.to_lowercase();
    if lower.contains("expired") {
        Outcome::Expired
    } else if lower.contains("not available") || lower.contains("does not exist") {
        Outcome::Invalid(text.trim().to_string())
    } else if lower.contains("already been redeemed") {
        Outcome::AlreadyRedeemed
    } else {
        Outcome::Unknown(text.trim().to_string())
    }
}
