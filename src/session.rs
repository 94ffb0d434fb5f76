use log::{debug, warn};
use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

/// Cookie the site only issues after a successful login.
pub const SESSION_MARKER_COOKIE: &str = "si";

#[derive(Debug)]
pub enum SessionError {
    Io(std::io::Error),
    SerdeJsonError(serde_json::Error),
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> SessionError {
        SessionError::Io(err)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> SessionError {
        SessionError::SerdeJsonError(err)
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Io(e) => write!(f, "session file error: {}", e),
            SessionError::SerdeJsonError(e) => write!(f, "session file is corrupt: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Io(e) => Some(e),
            SessionError::SerdeJsonError(e) => Some(e),
        }
    }
}

/// One cookie with the scope it was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    /// Host-only cookies (no `Domain` attribute) match the exact host only.
    pub host_only: bool,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    /// Absolute expiry as a unix timestamp; `None` for session cookies.
    #[serde(default)]
    pub expires: Option<i64>,
}

impl StoredCookie {
    fn is_expired(&self, now: i64) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }

    fn same_identity(&self, other: &StoredCookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }

    fn matches(&self, url: &Url, now: i64) -> bool {
        if self.is_expired(now) {
            return false;
        }
        if self.secure && url.scheme() != "https" {
            return false;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_match(&host, &self.domain)
        };
        domain_ok && path_match(url.path(), &self.path)
    }

    /// Parses one `Set-Cookie` header received from `url`.
    ///
    /// Returns `None` for unparseable headers and for cookies scoped to a domain the
    /// responding host does not belong to.
    pub fn parse(header: &str, url: &Url, now: i64) -> Option<StoredCookie> {
        let parsed = cookie::Cookie::parse(header.to_string()).ok()?;
        let host = url.host_str()?.to_ascii_lowercase();

        let (domain, host_only) = match parsed.domain() {
            Some(d) if !d.is_empty() => {
                let d = d.trim_start_matches('.').to_ascii_lowercase();
                if !domain_match(&host, &d) {
                    return None;
                }
                (d, false)
            }
            _ => (host, true),
        };

        let path = match parsed.path() {
            Some(p) if p.starts_with('/') => p.to_string(),
            _ => default_path(url.path()),
        };

        let expires = match parsed.max_age() {
            Some(age) => Some(now.saturating_add(age.whole_seconds())),
            None => parsed.expires_datetime().map(|at| at.unix_timestamp()),
        };

        Some(StoredCookie {
            name: parsed.name().to_string(),
            value: parsed.value().to_string(),
            domain,
            host_only,
            path,
            secure: parsed.secure().unwrap_or(false),
            expires,
        })
    }
}

fn domain_match(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}

fn path_match(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}

fn default_path(request_path: &str) -> String {
    if !request_path.starts_with('/') {
        return "/".to_string();
    }
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => request_path[..idx].to_string(),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Cookie jar shared by every request of the redemption client.
///
/// Implements reqwest's `CookieStore` so the client keeps it current, and can be
/// snapshotted to disk by [`SessionStore`].
#[derive(Debug, Default)]
pub struct SessionJar {
    cookies: RwLock<Vec<StoredCookie>>,
}

impl SessionJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cookies(cookies: Vec<StoredCookie>) -> Self {
        let jar = Self::new();
        jar.replace(cookies);
        jar
    }

    pub fn replace(&self, cookies: Vec<StoredCookie>) {
        let now = unix_now();
        let mut guard = self.cookies.write().unwrap_or_else(|e| e.into_inner());
        *guard = cookies.into_iter().filter(|c| !c.is_expired(now)).collect();
    }

    pub fn insert(&self, cookie: StoredCookie) {
        let now = unix_now();
        let mut guard = self.cookies.write().unwrap_or_else(|e| e.into_inner());
        guard.retain(|c| !c.same_identity(&cookie));
        if !cookie.is_expired(now) {
            guard.push(cookie);
        }
    }

    pub fn snapshot(&self) -> Vec<StoredCookie> {
        let now = unix_now();
        self.cookies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| !c.is_expired(now))
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Whether an unexpired cookie called `name` is present for any domain.
    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().iter().any(|c| c.name == name)
    }

    /// A session is only usable when the login marker cookie is present.
    pub fn has_login_marker(&self) -> bool {
        self.contains(SESSION_MARKER_COOKIE)
    }

    pub fn clear(&self) {
        self.cookies
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl CookieStore for SessionJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let now = unix_now();
        for header in cookie_headers {
            let Ok(raw) = header.to_str() else {
                continue;
            };
            match StoredCookie::parse(raw, url, now) {
                Some(cookie) => {
                    debug!("[COOKIE] set {} for {}{}", cookie.name, cookie.domain, cookie.path);
                    self.insert(cookie);
                }
                None => debug!("[COOKIE] ignored Set-Cookie from {}", url),
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let now = unix_now();
        let guard = self.cookies.read().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<&StoredCookie> = guard.iter().filter(|c| c.matches(url, now)).collect();
        if matching.is_empty() {
            return None;
        }
        // Longer paths first.
        matching.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        let header = matching
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_str(&header).ok()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    cookies: Vec<StoredCookie>,
}

/// Persists the session jar across runs.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Loads the saved cookies. A missing or empty file is an empty session.
    pub fn load(&self) -> Result<Vec<StoredCookie>, SessionError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let file: SessionFile = serde_json::from_str(&content)?;
        debug!("Loaded {} cookies from {}", file.cookies.len(), self.path.display());
        Ok(file.cookies)
    }

    /// Like [`SessionStore::load`], but a corrupt file is logged and treated as empty.
    pub fn load_or_empty(&self) -> Vec<StoredCookie> {
        match self.load() {
            Ok(cookies) => cookies,
            Err(SessionError::SerdeJsonError(e)) => {
                warn!("Ignoring unreadable session file {}: {}", self.path.display(), e);
                Vec::new()
            }
            Err(e) => {
                warn!("{}", e);
                Vec::new()
            }
        }
    }

    pub fn save(&self, jar: &SessionJar) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = SessionFile {
            cookies: jar.snapshot(),
        };
        fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        debug!("Saved {} cookies to {}", file.cookies.len(), self.path.display());
        Ok(())
    }

    pub fn clear(&self) -> Result<(), SessionError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
