#![allow(dead_code)]

use shift_redeemer::{SessionJar, SiteClient};
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "csrf-token-value";

pub fn html_page(body: &str) -> String {
    format!(
        r#"<!DOCTYPE html><html><head><meta name="csrf-token" content="{}"></head><body>{}</body></html>"#,
        TOKEN, body
    )
}

pub fn html(status: u16, body: String) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_raw(body, "text/html; charset=utf-8")
}

pub fn json(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "application/json")
}

pub fn redirect(location: &str) -> ResponseTemplate {
    ResponseTemplate::new(302).insert_header("Location", location)
}

/// Redemption page offering one form per (game heading, service) pair; consecutive
/// pairs for the same game share a heading.
pub fn redemption_page(forms: &[(&str, &str)]) -> String {
    let mut body = String::new();
    let mut last_game = "";
    for (game, service) in forms {
        if *game != last_game {
            body.push_str(&format!("<h2>{}</h2>", game));
            last_game = *game;
        }
        body.push_str(&format!(
            r#"<form class="new_archway_code_redemption" id="new_archway_code_redemption" action="/code_redemptions" method="post">
                 <input name="authenticity_token" value="{token}">
                 <input name="archway_code_redemption[code]" value="CODE">
                 <input id="archway_code_redemption_service" name="archway_code_redemption[service]" value="{service}">
                 <input name="archway_code_redemption[title]" value="{game}">
                 <input type="submit" value="Redeem for {service}">
               </form>"#,
            token = TOKEN,
            service = service,
            game = game,
        ));
    }
    body
}

pub fn site_for(server: &MockServer) -> SiteClient {
    SiteClient::new(&server.uri(), Arc::new(SessionJar::new())).unwrap()
}

/// Landing page with a token plus a lookup that returns `lookup`.
pub async fn mount_lookup(server: &MockServer, code: &str, lookup: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/rewards"))
        .respond_with(html(200, html_page("<a href=\"/logout\">Sign Out</a>")))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/entitlement_offer_codes"))
        .and(query_param("code", code))
        .respond_with(lookup)
        .mount(server)
        .await;
}

/// Lookup that offers a steam form for Borderlands 3.
pub async fn mount_steam_form(server: &MockServer, code: &str) {
    mount_lookup(
        server,
        code,
        html(200, redemption_page(&[("Borderlands 3", "steam")])),
    )
    .await;
}
