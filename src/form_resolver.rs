use crate::html_parser::{self, ParseError};
use crate::models::{Game, Platform};
use crate::network_client::{json_headers, NetworkError, SiteClient, LOOKUP_PATH, REWARDS_PATH};
use crate::outcome::{classify_lookup_text, Outcome};
use log::{debug, warn};
use reqwest::StatusCode;
use url::Url;

pub const NOT_FOR_PLATFORM: &str = "This code is not available for your platform";
pub const NO_TOKEN: &str = "Could not retrieve token";

/// Fields to POST for one (code, platform) redemption. Built per attempt, never reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionForm {
    pub fields: Vec<(String, String)>,
    /// Token of the page the form was resolved from.
    pub token: String,
    pub referer: Url,
}

impl RedemptionForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Either the form to submit or the outcome that ends the attempt without submitting.
pub type Resolution = Result<RedemptionForm, Outcome>;

pub struct FormResolver<'a> {
    site: &'a SiteClient,
}

impl<'a> FormResolver<'a> {
    pub fn new(site: &'a SiteClient) -> Self {
        Self { site }
    }

    /// Looks the code up on the site and picks the form matching `game` and `platform`.
    ///
    /// Transport failures are the only errors; every classification the site makes
    /// comes back as `Ok(Err(outcome))`.
    pub async fn resolve(
        &self,
        code: &str,
        game: Game,
        platform: Platform,
    ) -> Result<Resolution, NetworkError> {
        let landing = self.site.url(REWARDS_PATH)?;
        let landing_page = self.site.get_following(landing.clone()).await?;
        let token = match html_parser::extract_csrf_token(&landing_page.body) {
            Ok(token) => token,
            Err(_) => {
                debug!("no token on {} ({})", landing_page.url, landing_page.status);
                return Ok(Err(Outcome::Unknown(NO_TOKEN.to_string())));
            }
        };

        let mut lookup = self.site.url(LOOKUP_PATH)?;
        lookup.query_pairs_mut().append_pair("code", code);
        let page = self.site.get(lookup, json_headers(&token)?).await?;
        debug!("lookup {} -> {}", code, page.status);

        if page.status.is_server_error() {
            return Ok(Err(Outcome::Invalid(format!(
                "lookup failed with {}",
                page.status
            ))));
        }
        if page.status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(Err(Outcome::RateLimited));
        }

        match html_parser::extract_redemption_form(&page.body, game.long_name(), platform.site_id()) {
            Ok(Some(fields)) => Ok(Ok(RedemptionForm {
                fields,
                token,
                referer: landing,
            })),
            Ok(None) => Ok(Err(Outcome::Invalid(NOT_FOR_PLATFORM.to_string()))),
            Err(ParseError::FormNotFound) => {
                debug!("no redemption form: {}", page.body.trim());
                Ok(Err(classify_lookup_text(&page.body)))
            }
            Err(e) => {
                warn!("Unexpected redemption page for {}: {}", code, e);
                Ok(Err(Outcome::Unknown(e.to_string())))
            }
        }
    }
}
