use crate::html_parser::{self, ParseError};
use crate::network_client::{NetworkError, SiteClient, HOME_PATH, REWARDS_PATH, SESSIONS_PATH};
use crate::session::{SessionError, SessionStore};
use log::{debug, info, warn};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::io::{BufRead, IsTerminal, Write};

#[derive(Debug)]
pub enum AuthError {
    /// No credentials were given and there is no terminal to ask for them.
    Config(String),
    TokenMissing,
    LoginFailed,
    Session(SessionError),
    Network(NetworkError),
    Io(std::io::Error),
}

impl From<NetworkError> for AuthError {
    fn from(err: NetworkError) -> Self {
        AuthError::Network(err)
    }
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        AuthError::Session(err)
    }
}

impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        AuthError::Io(err)
    }
}

impl From<ParseError> for AuthError {
    fn from(_: ParseError) -> Self {
        AuthError::TokenMissing
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Config(msg) => write!(f, "Missing login configuration: {}", msg),
            AuthError::TokenMissing => write!(f, "Could not retrieve a login token"),
            AuthError::LoginFailed => write!(f, "Couldn't log in. Are your credentials correct?"),
            AuthError::Session(e) => write!(f, "{}", e),
            AuthError::Network(e) => write!(f, "{}", e),
            AuthError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AuthError::Session(e) => Some(e),
            AuthError::Network(e) => Some(e),
            AuthError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Source of credentials when none were configured.
pub trait CredentialPrompt {
    fn username(&mut self) -> Result<String, AuthError>;
    fn password(&mut self) -> Result<String, AuthError>;
}

/// Asks on the controlling terminal; the password is read without echo.
pub struct TerminalPrompt;

impl CredentialPrompt for TerminalPrompt {
    fn username(&mut self) -> Result<String, AuthError> {
        if !std::io::stdin().is_terminal() {
            return Err(AuthError::Config(
                "no username configured and stdin is not a terminal".to_string(),
            ));
        }
        print!("Username: ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }

    fn password(&mut self) -> Result<String, AuthError> {
        if !std::io::stdin().is_terminal() {
            return Err(AuthError::Config(
                "no password configured and stdin is not a terminal".to_string(),
            ));
        }
        Ok(rpassword::prompt_password("Password: ")?)
    }
}

/// Never prompts; missing credentials are a configuration error.
pub struct NoPrompt;

impl CredentialPrompt for NoPrompt {
    fn username(&mut self) -> Result<String, AuthError> {
        Err(AuthError::Config("no username configured".to_string()))
    }

    fn password(&mut self) -> Result<String, AuthError> {
        Err(AuthError::Config("no password configured".to_string()))
    }
}

/// Establishes a logged-in session on the shared client.
pub struct Authenticator<'a> {
    site: &'a SiteClient,
    store: SessionStore,
    logged_in: bool,
}

impl<'a> Authenticator<'a> {
    /// Creates the authenticator and restores any saved session into the client's jar.
    pub fn new(site: &'a SiteClient, store: SessionStore) -> Self {
        let cookies = store.load_or_empty();
        if !cookies.is_empty() {
            site.jar().replace(cookies);
        }
        Self {
            site,
            store,
            logged_in: false,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// Logs in, reusing the saved session when the site still accepts it.
    ///
    /// Credentials are only needed (and only prompted for) when there is no valid
    /// session. `AuthError::Config` and `AuthError::LoginFailed` require a human and
    /// must not be retried automatically.
    pub async fn login(
        &mut self,
        user: Option<&str>,
        password: Option<&str>,
        prompt: &mut dyn CredentialPrompt,
    ) -> Result<(), AuthError> {
        if self.logged_in {
            return Ok(());
        }
        if self.validate_session().await? {
            info!("Restored saved session");
            self.logged_in = true;
            return Ok(());
        }
        if self.store.exists() {
            info!("Saved session is no longer valid");
            self.store.clear()?;
        }
        self.site.jar().clear();

        let user = match user.filter(|u| !u.is_empty()) {
            Some(u) => u.to_string(),
            None => prompt.username()?,
        };
        let password = match password.filter(|p| !p.is_empty()) {
            Some(p) => p.to_string(),
            None => prompt.password()?,
        };

        self.submit_login(&user, &password).await?;

        if !self.site.jar().has_login_marker() {
            warn!("Login response did not set the session cookie");
            return Err(AuthError::LoginFailed);
        }
        self.store.save(self.site.jar())?;
        info!("Login Successful");
        self.logged_in = true;
        Ok(())
    }

    /// A saved session is valid when it holds the login marker and an authenticated
    /// page renders as signed in.
    pub async fn validate_session(&self) -> Result<bool, AuthError> {
        let jar = self.site.jar();
        if jar.is_empty() {
            debug!("No saved session");
            return Ok(false);
        }
        if !jar.has_login_marker() {
            debug!("Saved session lacks the login marker cookie");
            return Ok(false);
        }
        let page = self.site.get(self.site.url(REWARDS_PATH)?, HeaderMap::new()).await?;
        let valid = page.status == StatusCode::OK && html_parser::is_signed_in(&page.body);
        debug!("Saved session check: {} (signed in: {})", page.status, valid);
        Ok(valid)
    }

    async fn submit_login(&self, user: &str, password: &str) -> Result<(), AuthError> {
        let home = self.site.url(HOME_PATH)?;
        let page = self.site.get_following(home.clone()).await?;
        let token = html_parser::extract_csrf_token(&page.body)?;
        debug!("Login token received");

        let form = [
            ("authenticity_token", token.as_str()),
            ("user[email]", user),
            ("user[password]", password),
        ];
        debug!("Attempting login for user={:?}, password=<hidden>", user);
        let response = self
            .site
            .post_form(self.site.url(SESSIONS_PATH)?, &form[..], &home)
            .await?;
        debug!("POST {} -> {}", response.url, response.status);
        Ok(())
    }
}
