//! Redeems SHiFT codes against the rewards site by scraping its pages.
//!
//! The site has no API. A redemption resolves the code to one of the forms on the
//! redemption page, submits it and then follows redirects and status polls until the
//! site reports (or implies) an outcome.

pub mod auth;
pub mod client;
pub mod collector;
pub mod config;
pub mod form_resolver;
pub mod html_parser;
pub mod models;
pub mod network_client;
pub mod outcome;
pub mod runner;
pub mod session;
pub mod status_resolver;
pub mod store;

pub use auth::{AuthError, Authenticator, CredentialPrompt, NoPrompt, TerminalPrompt};
pub use client::RedemptionClient;
pub use models::{Game, Key, Platform};
pub use network_client::{NetworkError, SiteClient};
pub use outcome::Outcome;
pub use session::{SessionJar, SessionStore};
pub use store::{JsonKeyStore, KeyStore};
