use crate::html_parser;
use crate::network_client::{json_headers, NetworkError, Page, SiteClient, REWARDS_PATH};
use crate::outcome::{classify_status_text, Outcome};
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Polls beyond this many retries give up and fall back to the widget's fallback URL.
pub const MAX_POLL_ATTEMPTS: u32 = 5;
/// Only reached for codes the site actually processed.
pub const REDEMPTION_ROUTE_MARKER: &str = "code_redemptions/";
/// Redirect hops after which the resolver stops following.
pub const MAX_FOLLOWS: usize = 20;

#[derive(Debug, Default, Deserialize)]
struct StatusPayload {
    #[serde(default)]
    in_progress: Option<bool>,
    #[serde(default)]
    text: Option<String>,
}

impl StatusPayload {
    /// Parses `body` as a status payload; any other JSON or HTML yields `None`.
    fn parse(body: &str) -> Option<StatusPayload> {
        serde_json::from_str::<StatusPayload>(body)
            .ok()
            .filter(|p| p.in_progress.is_some() || p.text.is_some())
    }
}

/// `Done(None)` means the site gave no usable signal.
#[derive(Debug)]
enum State {
    Start(Page),
    Poll {
        url: Url,
        fallback: Option<String>,
        token: String,
        attempt: u32,
    },
    Follow(Url),
    Done(Option<Outcome>),
}

/// Follows a submitted redemption through redirects and status polling to its outcome.
pub struct StatusResolver<'a> {
    site: &'a SiteClient,
    poll_interval: Duration,
}

impl<'a> StatusResolver<'a> {
    pub fn new(site: &'a SiteClient) -> Self {
        Self {
            site,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Drives the state machine from the raw submission response.
    ///
    /// Never returns `Outcome::PendingRedirect`. When the site never states a result,
    /// having passed through a `code_redemptions/...` route means the code was already
    /// processed (`AlreadyRedeemed`); otherwise the caller should wait (`TryLater`).
    pub async fn resolve(&self, initial: Page) -> Result<Outcome, NetworkError> {
        let mut visited_redemption = false;
        let mut follows = 0usize;
        let mut state = State::Start(initial);

        let signal = loop {
            state = match state {
                State::Start(page) => self.start(page)?,
                State::Poll {
                    url,
                    fallback,
                    token,
                    attempt,
                } => self.poll(url, fallback, token, attempt).await?,
                State::Follow(url) => {
                    follows += 1;
                    if follows > MAX_FOLLOWS {
                        warn!("Gave up after {} redirects", MAX_FOLLOWS);
                        State::Done(None)
                    } else {
                        if url.path().contains(REDEMPTION_ROUTE_MARKER) {
                            visited_redemption = true;
                        }
                        self.follow(url).await?
                    }
                }
                State::Done(Some(Outcome::PendingRedirect(fallback))) => {
                    if fallback.is_empty() {
                        State::Done(None)
                    } else {
                        State::Follow(self.site.url(&fallback)?)
                    }
                }
                State::Done(signal) => break signal,
            };
        };

        Ok(match signal {
            Some(outcome) => outcome,
            None if visited_redemption => Outcome::AlreadyRedeemed,
            None => Outcome::TryLater,
        })
    }

    fn start(&self, page: Page) -> Result<State, NetworkError> {
        if page.is_redirect() {
            let location = page.location.unwrap_or_default();
            debug!("redirect to '{}'", location);
            if location.trim().is_empty() {
                return Ok(State::Done(None));
            }
            // Location is relative to the response that sent it.
            return Ok(State::Follow(page.url.join(location.trim())?));
        }

        let Some(widget) = html_parser::find_status_widget(&page.body) else {
            debug!("no status widget on {}", page.url);
            return Ok(State::Done(None));
        };
        info!("{}", widget.text);

        match widget.url {
            None => Ok(State::Done(classify_status_text(&widget.text))),
            Some(url) => Ok(State::Poll {
                url: self.site.url(&url)?,
                fallback: widget.fallback_url,
                token: html_parser::extract_csrf_token(&page.body).unwrap_or_default(),
                attempt: 0,
            }),
        }
    }

    async fn poll(
        &self,
        url: Url,
        fallback: Option<String>,
        token: String,
        attempt: u32,
    ) -> Result<State, NetworkError> {
        if attempt > MAX_POLL_ATTEMPTS {
            debug!("status still pending after {} polls", attempt);
            return Ok(State::Done(Some(Outcome::PendingRedirect(
                fallback.unwrap_or_default(),
            ))));
        }

        debug!("get {}", url);
        let page = self.site.get(url.clone(), json_headers(&token)?).await?;
        if page.is_redirect() {
            return self.start(page);
        }
        debug!("Raw json text: {}", page.body);

        let payload: StatusPayload = match serde_json::from_str(&page.body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Malformed status payload from {}: {}", url, e);
                return Ok(State::Done(Some(Outcome::Unknown(page.body.trim().to_string()))));
            }
        };
        if let Some(text) = payload.text {
            return Ok(State::Done(classify_status_text(&text)));
        }

        tokio::time::sleep(self.poll_interval).await;
        Ok(State::Poll {
            url,
            fallback,
            token,
            attempt: attempt + 1,
        })
    }

    async fn follow(&self, url: Url) -> Result<State, NetworkError> {
        let mut page = self.site.get(url.clone(), self.referer_headers()?).await?;

        let mut waited = 0u32;
        while let Some(payload) = StatusPayload::parse(&page.body) {
            if let Some(text) = payload.text {
                return Ok(State::Done(classify_status_text(&text)));
            }
            if payload.in_progress != Some(true) || waited >= MAX_POLL_ATTEMPTS {
                return Ok(State::Done(None));
            }
            tokio::time::sleep(self.poll_interval).await;
            waited += 1;
            page = self.site.get(url.clone(), self.referer_headers()?).await?;
        }

        Ok(State::Start(page))
    }

    fn referer_headers(&self) -> Result<HeaderMap, NetworkError> {
        let mut headers = HeaderMap::new();
        let referer = self.site.url(REWARDS_PATH)?;
        if let Ok(value) = HeaderValue::from_str(referer.as_str()) {
            headers.insert(REFERER, value);
        }
        Ok(headers)
    }
}
