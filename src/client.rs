use crate::form_resolver::FormResolver;
use crate::models::Key;
use crate::network_client::{NetworkError, SiteClient, REDEMPTIONS_PATH};
use crate::outcome::Outcome;
use crate::status_resolver::{StatusResolver, POLL_INTERVAL};
use log::{debug, info};
use std::time::Duration;

/// Turns one code record into one outcome.
pub struct RedemptionClient<'a> {
    site: &'a SiteClient,
    poll_interval: Duration,
    last_status: Option<Outcome>,
}

impl<'a> RedemptionClient<'a> {
    pub fn new(site: &'a SiteClient) -> Self {
        Self {
            site,
            poll_interval: POLL_INTERVAL,
            last_status: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Outcome of the most recent `redeem` call.
    pub fn last_status(&self) -> Option<&Outcome> {
        self.last_status.as_ref()
    }

    /// Resolves the redemption form for `key`, submits it and follows the response to
    /// a final outcome.
    ///
    /// The key's flags are left untouched; persisting them is up to the caller.
    pub async fn redeem(&mut self, key: &Key) -> Result<Outcome, NetworkError> {
        info!("Trying to redeem {} ({})", key.reward, key.code);
        let outcome = self.attempt(key).await?;
        debug!("Status: {}", outcome);
        self.last_status = Some(outcome.clone());
        Ok(outcome)
    }

    async fn attempt(&self, key: &Key) -> Result<Outcome, NetworkError> {
        let form = match FormResolver::new(self.site)
            .resolve(&key.code, key.game, key.platform)
            .await?
        {
            Ok(form) => form,
            Err(outcome) => return Ok(outcome),
        };

        let response = self
            .site
            .post_form(self.site.url(REDEMPTIONS_PATH)?, &form.fields[..], &form.referer)
            .await?;
        debug!("POST {} {}", response.url, response.status);

        StatusResolver::new(self.site)
            .with_poll_interval(self.poll_interval)
            .resolve(response)
            .await
    }
}
