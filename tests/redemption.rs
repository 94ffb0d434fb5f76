mod common;

use common::*;
use pretty_assertions::assert_eq;
use shift_redeemer::form_resolver::{FormResolver, NOT_FOR_PLATFORM, NO_TOKEN};
use shift_redeemer::status_resolver::{MAX_FOLLOWS, MAX_POLL_ATTEMPTS};
use shift_redeemer::{Game, Key, NetworkError, Outcome, Platform, RedemptionClient, SessionJar, SiteClient};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CODE: &str = "KBWBT-SRCBR-5BTBJ-JT3TT-9X9ZW";

fn bl3_steam() -> Key {
    Key::new(CODE, Game::Bl3, Platform::Steam).with_reward("3 Golden Keys")
}

async fn redeem(server: &MockServer, key: &Key) -> Outcome {
    let site = site_for(server);
    let mut client = RedemptionClient::new(&site).with_poll_interval(Duration::from_millis(1));
    let outcome = client.redeem(key).await.unwrap();
    assert_eq!(client.last_status(), Some(&outcome));
    outcome
}

async fn expect_no_submission(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/code_redemptions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(server)
        .await;
}

#[tokio::test]
async fn server_error_on_lookup_is_invalid_without_submitting() {
    let server = MockServer::start().await;
    mount_lookup(&server, CODE, ResponseTemplate::new(500)).await;
    expect_no_submission(&server).await;

    let outcome = redeem(&server, &bl3_steam()).await;
    assert!(matches!(outcome, Outcome::Invalid(_)), "{:?}", outcome);
}

#[tokio::test]
async fn too_many_requests_on_lookup_is_rate_limited() {
    let server = MockServer::start().await;
    mount_lookup(&server, CODE, ResponseTemplate::new(429)).await;
    expect_no_submission(&server).await;

    assert_eq!(redeem(&server, &bl3_steam()).await, Outcome::RateLimited);
}

#[tokio::test]
async fn lookup_text_without_form_is_classified() {
    let cases = [
        ("This SHiFT code has expired", Outcome::Expired),
        (
            "This SHiFT code has already been redeemed",
            Outcome::AlreadyRedeemed,
        ),
        (
            "This SHiFT code does not exist",
            Outcome::Invalid("This SHiFT code does not exist".to_string()),
        ),
        (
            "Something odd",
            Outcome::Unknown("Something odd".to_string()),
        ),
    ];
    for (text, expected) in cases {
        let server = MockServer::start().await;
        mount_lookup(&server, CODE, ResponseTemplate::new(200).set_body_string(text)).await;
        expect_no_submission(&server).await;
        assert_eq!(redeem(&server, &bl3_steam()).await, expected, "{}", text);
    }
}

#[tokio::test]
async fn missing_landing_token_is_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rewards"))
        .respond_with(html(200, "<html><body>maintenance</body></html>".to_string()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/entitlement_offer_codes"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    assert_eq!(
        redeem(&server, &bl3_steam()).await,
        Outcome::Unknown(NO_TOKEN.to_string())
    );
}

#[tokio::test]
async fn lookup_sends_json_headers_and_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rewards"))
        .respond_with(html(200, html_page("")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/entitlement_offer_codes"))
        .and(header("x-csrf-token", TOKEN))
        .and(header("x-requested-with", "XMLHttpRequest"))
        .respond_with(html(200, redemption_page(&[("Borderlands 3", "steam")])))
        .expect(1)
        .mount(&server)
        .await;

    let site = site_for(&server);
    let form = FormResolver::new(&site)
        .resolve(CODE, Game::Bl3, Platform::Steam)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(form.token, TOKEN);
    assert_eq!(form.field("archway_code_redemption[service]"), Some("steam"));
}

#[tokio::test]
async fn form_for_the_callers_game_is_chosen() {
    let server = MockServer::start().await;
    mount_lookup(
        &server,
        CODE,
        html(
            200,
            redemption_page(&[
                ("Borderlands 3", "steam"),
                ("Tiny Tina's Wonderlands", "epic"),
                ("Tiny Tina's Wonderlands", "steam"),
            ]),
        ),
    )
    .await;

    let site = site_for(&server);
    let form = FormResolver::new(&site)
        .resolve(CODE, Game::Ttw, Platform::Steam)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        form.field("archway_code_redemption[title]"),
        Some("Tiny Tina's Wonderlands")
    );
    assert_eq!(form.field("archway_code_redemption[service]"), Some("steam"));
}

#[tokio::test]
async fn platform_without_form_is_invalid() {
    let server = MockServer::start().await;
    mount_steam_form(&server, CODE).await;
    expect_no_submission(&server).await;

    let key = Key::new(CODE, Game::Bl3, Platform::Xboxlive);
    assert_eq!(
        redeem(&server, &key).await,
        Outcome::Invalid(NOT_FOR_PLATFORM.to_string())
    );
}

#[tokio::test]
async fn redirect_without_signal_is_try_later() {
    let server = MockServer::start().await;
    mount_steam_form(&server, CODE).await;
    Mock::given(method("POST"))
        .and(path("/code_redemptions"))
        .and(body_string_contains("steam"))
        .respond_with(redirect("/rewards/wait"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rewards/wait"))
        .respond_with(html(200, html_page("<p>Nothing to see</p>")))
        .mount(&server)
        .await;

    assert_eq!(redeem(&server, &bl3_steam()).await, Outcome::TryLater);
}

#[tokio::test]
async fn redirect_through_redemption_route_without_signal_is_already_redeemed() {
    let server = MockServer::start().await;
    mount_steam_form(&server, CODE).await;
    Mock::given(method("POST"))
        .and(path("/code_redemptions"))
        .respond_with(redirect("/code_redemptions/a1b2c3"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/code_redemptions/a1b2c3"))
        .respond_with(redirect("/rewards/done"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rewards/done"))
        .respond_with(html(200, html_page("<p>Nothing to see</p>")))
        .mount(&server)
        .await;

    assert_eq!(redeem(&server, &bl3_steam()).await, Outcome::AlreadyRedeemed);
}

#[tokio::test]
async fn inline_notice_is_classified_directly() {
    let server = MockServer::start().await;
    mount_steam_form(&server, CODE).await;
    Mock::given(method("POST"))
        .and(path("/code_redemptions"))
        .respond_with(html(
            200,
            html_page(r#"<div class="alert notice">Your code was successfully redeemed</div>"#),
        ))
        .mount(&server)
        .await;

    assert_eq!(redeem(&server, &bl3_steam()).await, Outcome::Success);
}

async fn mount_polling_submission(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/code_redemptions"))
        .respond_with(redirect("/code_redemptions/xyz"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/code_redemptions/xyz"))
        .respond_with(html(
            200,
            html_page(
                r#"<div id="check_redemption_status" data-url="code_redemptions/xyz/status" data-fallback-url="/rewards/fallback">Checking status</div>"#,
            ),
        ))
        .mount(server)
        .await;
}

#[tokio::test]
async fn poll_returns_text_after_five_pending_responses() {
    let server = MockServer::start().await;
    mount_steam_form(&server, CODE).await;
    mount_polling_submission(&server).await;
    Mock::given(method("GET"))
        .and(path("/code_redemptions/xyz/status"))
        .and(header("x-csrf-token", TOKEN))
        .respond_with(json(r#"{"in_progress": true}"#))
        .up_to_n_times(5)
        .expect(5)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/code_redemptions/xyz/status"))
        .respond_with(json(r#"{"in_progress": false, "text": "Your code was successfully redeemed"}"#))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(redeem(&server, &bl3_steam()).await, Outcome::Success);
}

#[tokio::test]
async fn poll_gives_up_after_six_pending_responses_and_follows_fallback_once() {
    let server = MockServer::start().await;
    mount_steam_form(&server, CODE).await;
    mount_polling_submission(&server).await;
    Mock::given(method("GET"))
        .and(path("/code_redemptions/xyz/status"))
        .respond_with(json(r#"{"in_progress": true}"#))
        .expect(6)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rewards/fallback"))
        .respond_with(html(200, html_page("<p>Rewards</p>")))
        .expect(1)
        .mount(&server)
        .await;

    // the redemption route was visited before polling started
    assert_eq!(redeem(&server, &bl3_steam()).await, Outcome::AlreadyRedeemed);
}

#[tokio::test]
async fn malformed_poll_payload_is_unknown() {
    let server = MockServer::start().await;
    mount_steam_form(&server, CODE).await;
    mount_polling_submission(&server).await;
    Mock::given(method("GET"))
        .and(path("/code_redemptions/xyz/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(
        redeem(&server, &bl3_steam()).await,
        Outcome::Unknown("<html>oops</html>".to_string())
    );
}

#[tokio::test]
async fn followed_json_status_is_polled_until_text() {
    let server = MockServer::start().await;
    mount_steam_form(&server, CODE).await;
    Mock::given(method("POST"))
        .and(path("/code_redemptions"))
        .respond_with(redirect("/code_redemptions/job/status"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/code_redemptions/job/status"))
        .respond_with(json(r#"{"in_progress": true}"#))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/code_redemptions/job/status"))
        .respond_with(json(r#"{"in_progress": false, "text": "Redemption failed: already redeemed"}"#))
        .mount(&server)
        .await;

    assert_eq!(redeem(&server, &bl3_steam()).await, Outcome::AlreadyRedeemed);
}

#[tokio::test]
async fn already_redeemed_code_stays_already_redeemed() {
    let server = MockServer::start().await;
    mount_steam_form(&server, CODE).await;
    Mock::given(method("POST"))
        .and(path("/code_redemptions"))
        .respond_with(html(
            200,
            html_page(r#"<div class="alert notice">This SHiFT code has already been redeemed</div>"#),
        ))
        .expect(2)
        .mount(&server)
        .await;

    let site = site_for(&server);
    let mut client = RedemptionClient::new(&site).with_poll_interval(Duration::from_millis(1));
    let key = bl3_steam();
    assert_eq!(client.redeem(&key).await.unwrap(), Outcome::AlreadyRedeemed);
    assert_eq!(client.redeem(&key).await.unwrap(), Outcome::AlreadyRedeemed);
}

#[tokio::test]
async fn transport_failure_is_an_error_not_an_outcome() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let site = SiteClient::new(&format!("http://127.0.0.1:{}", port), Arc::new(SessionJar::new())).unwrap();
    let mut client = RedemptionClient::new(&site).with_poll_interval(Duration::from_millis(1));

    let err = client.redeem(&bl3_steam()).await.unwrap_err();
    assert!(matches!(err, NetworkError::Reqwest(_)), "{:?}", err);
    assert_eq!(client.last_status(), None);
}

#[tokio::test]
async fn redirect_loop_stops_after_follow_limit() {
    let server = MockServer::start().await;
    mount_steam_form(&server, CODE).await;
    Mock::given(method("POST"))
        .and(path("/code_redemptions"))
        .respond_with(redirect("/code_redemptions/loop"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/code_redemptions/loop"))
        .respond_with(redirect("/code_redemptions/loop"))
        .expect(MAX_FOLLOWS as u64)
        .mount(&server)
        .await;

    assert_eq!(redeem(&server, &bl3_steam()).await, Outcome::AlreadyRedeemed);
}

#[tokio::test]
async fn followed_status_that_never_finishes_gives_up() {
    let server = MockServer::start().await;
    mount_steam_form(&server, CODE).await;
    Mock::given(method("POST"))
        .and(path("/code_redemptions"))
        .respond_with(redirect("/code_redemptions/stuck/status"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/code_redemptions/stuck/status"))
        .respond_with(json(r#"{"in_progress": true}"#))
        .expect(u64::from(MAX_POLL_ATTEMPTS) + 1)
        .mount(&server)
        .await;

    assert_eq!(redeem(&server, &bl3_steam()).await, Outcome::AlreadyRedeemed);
}

#[tokio::test]
async fn relative_location_resolves_against_redirecting_page() {
    let server = MockServer::start().await;
    mount_steam_form(&server, CODE).await;
    Mock::given(method("POST"))
        .and(path("/code_redemptions"))
        .respond_with(redirect("/code_redemptions/abc/"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/code_redemptions/abc/"))
        .respond_with(redirect("done"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/code_redemptions/abc/done"))
        .respond_with(html(
            200,
            html_page(r#"<div class="alert notice">Your code was successfully redeemed</div>"#),
        ))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(redeem(&server, &bl3_steam()).await, Outcome::Success);
}
