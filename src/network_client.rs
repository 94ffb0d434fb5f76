use crate::session::SessionJar;
use log::{debug, info};
use once_cell::sync::Lazy;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONNECTION,
    LOCATION, PRAGMA, REFERER, USER_AGENT,
};
use reqwest::redirect::Policy;
use reqwest::{Client, Error as ReqwestError, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://shift.gearboxsoftware.com";

pub const HOME_PATH: &str = "home";
pub const REWARDS_PATH: &str = "rewards";
pub const SESSIONS_PATH: &str = "sessions";
pub const LOOKUP_PATH: &str = "entitlement_offer_codes";
pub const REDEMPTIONS_PATH: &str = "code_redemptions";

const MAX_PAGE_REDIRECTS: usize = 10;

static BASE_HEADERS: Lazy<HeaderMap> = Lazy::new(|| {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(HeaderName::from_static("sec-gpc"), HeaderValue::from_static("1"));
    headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36"));
    headers
});

#[derive(Debug)]
pub enum NetworkError {
    Reqwest(ReqwestError),
    UrlParseError(url::ParseError),
    InvalidHeader(String),
    TooManyRedirects(String),
}

impl From<ReqwestError> for NetworkError {
    fn from(err: ReqwestError) -> NetworkError {
        NetworkError::Reqwest(err)
    }
}

impl From<url::ParseError> for NetworkError {
    fn from(err: url::ParseError) -> NetworkError {
        NetworkError::UrlParseError(err)
    }
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkError::Reqwest(e) => write!(f, "HTTP request error: {}", e),
            NetworkError::UrlParseError(e) => write!(f, "URL parsing error: {}", e),
            NetworkError::InvalidHeader(h) => write!(f, "Invalid header value for {}", h),
            NetworkError::TooManyRedirects(url) => write!(f, "Too many redirects starting at {}", url),
        }
    }
}

impl std::error::Error for NetworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NetworkError::Reqwest(e) => Some(e),
            NetworkError::UrlParseError(e) => Some(e),
            _ => None,
        }
    }
}

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub status: StatusCode,
    /// Raw `Location` header of redirect responses.
    pub location: Option<String>,
    pub body: String,
}

impl Page {
    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection() && self.location.is_some()
    }
}

/// Headers the site expects on XHR-style requests.
pub fn json_headers(token: &str) -> Result<HeaderMap, NetworkError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("x-csrf-token"),
        HeaderValue::from_str(token).map_err(|_| NetworkError::InvalidHeader("x-csrf-token".to_string()))?,
    );
    headers.insert(
        HeaderName::from_static("x-requested-with"),
        HeaderValue::from_static("XMLHttpRequest"),
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"));
    Ok(headers)
}

/// The one HTTP client shared by authentication, form resolution and status resolution.
///
/// Redirects are never followed by reqwest itself; callers decide per request.
pub struct SiteClient {
    http: Client,
    base: Url,
    jar: Arc<SessionJar>,
}

impl SiteClient {
    pub fn new(base_url: &str, jar: Arc<SessionJar>) -> Result<Self, NetworkError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut headers = BASE_HEADERS.clone();
        if let Ok(origin_val) = HeaderValue::from_str(&base.origin().unicode_serialization()) {
            headers.insert(reqwest::header::ORIGIN, origin_val);
        }

        let http = Client::builder()
            .default_headers(headers)
            .cookie_provider(jar.clone())
            .redirect(Policy::none())
            .build()?;

        Ok(Self { http, base, jar })
    }

    pub fn jar(&self) -> &SessionJar {
        &self.jar
    }

    /// Resolves a path or URL (absolute, root-relative or relative) against the site base.
    pub fn url(&self, path: &str) -> Result<Url, NetworkError> {
        let trimmed = path.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Ok(Url::parse(trimmed)?);
        }
        Ok(self.base.join(trimmed.trim_start_matches('/'))?)
    }

    /// GET without following redirects.
    pub async fn get(&self, url: Url, headers: HeaderMap) -> Result<Page, NetworkError> {
        let start_time = Instant::now();
        let response_result = self.http.get(url.clone()).headers(headers).send().await;
        let duration = start_time.elapsed();
        info!("[TIMING] GET {} took {:.2?}", url, duration);
        read_page(url, response_result?).await
    }

    /// GET, following up to ten redirects by hand so every hop goes through the jar.
    pub async fn get_following(&self, url: Url) -> Result<Page, NetworkError> {
        let mut current = url.clone();
        for _ in 0..=MAX_PAGE_REDIRECTS {
            let page = self.get(current.clone(), HeaderMap::new()).await?;
            match page.location.as_deref() {
                Some(location) if page.status.is_redirection() => {
                    debug!("[API] {} redirected to {}", current, location);
                    current = current.join(location)?;
                }
                _ => return Ok(page),
            }
        }
        Err(NetworkError::TooManyRedirects(url.to_string()))
    }

    /// POST a url-encoded form without following redirects.
    pub async fn post_form<T: Serialize + ?Sized>(
        &self,
        url: Url,
        form: &T,
        referer: &Url,
    ) -> Result<Page, NetworkError> {
        let mut headers = HeaderMap::new();
        if let Ok(referer_val) = HeaderValue::from_str(referer.as_str()) {
            headers.insert(REFERER, referer_val);
        }

        let start_time = Instant::now();
        let response_result = self
            .http
            .post(url.clone())
            .headers(headers)
            .form(form)
            .send()
            .await;
        let duration = start_time.elapsed();
        info!("[TIMING] POST {} took {:.2?}", url, duration);
        read_page(url, response_result?).await
    }
}

async fn read_page(url: Url, response: reqwest::Response) -> Result<Page, NetworkError> {
    let status = response.status();
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());
    let body = response.text().await?;
    debug!("[API] {} -> {} ({} bytes)", url, status, body.len());
    Ok(Page {
        url,
        status,
        location,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_against_base_with_or_without_slashes() {
        let client = SiteClient::new("https://shift.example.com", Arc::new(SessionJar::new())).unwrap();
        assert_eq!(
            client.url("/code_redemptions/abc/status").unwrap().as_str(),
            "https://shift.example.com/code_redemptions/abc/status"
        );
        assert_eq!(
            client.url("rewards").unwrap().as_str(),
            "https://shift.example.com/rewards"
        );
        assert_eq!(
            client.url("https://other.example.com/x").unwrap().as_str(),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn json_headers_carry_token() {
        let headers = json_headers("tok").unwrap();
        assert_eq!(headers.get("x-csrf-token").unwrap(), "tok");
        assert_eq!(headers.get("x-requested-with").unwrap(), "XMLHttpRequest");
        assert!(json_headers("bad\ntoken").is_err());
    }
}
