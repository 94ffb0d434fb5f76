use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

static CSRF_META_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"meta[name="csrf-token"]"#).expect("Failed to parse csrf selector"));
static REDEMPTION_FORM_CLASS_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("form.new_archway_code_redemption").expect("Failed to parse form class selector"));
static REDEMPTION_FORM_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("form#new_archway_code_redemption").expect("Failed to parse form selector"));
static SERVICE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("#archway_code_redemption_service").expect("Failed to parse service selector"));
static HEADING_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("h2").expect("Failed to parse heading selector"));
static INPUT_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("input").expect("Failed to parse input selector"));
static STATUS_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("div#check_redemption_status").expect("Failed to parse status selector"));
static NOTICE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("div.alert.notice").expect("Failed to parse notice selector"));

/// Substrings that only show up on pages rendered for a signed-in account.
const SIGNED_IN_MARKERS: [&str; 3] = ["sign out", "/logout", "sign_out"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    TokenNotFound,
    FormNotFound,
    HeadingNotFound,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::TokenNotFound => write!(f, "CSRF token meta tag not found in HTML"),
            ParseError::FormNotFound => write!(f, "Redemption form not found in HTML"),
            ParseError::HeadingNotFound => write!(f, "Could not find title tag"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Status element the site uses to report (or hand off) the redemption result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusWidget {
    pub text: String,
    /// Endpoint to poll for the final status, relative to the site root.
    pub url: Option<String>,
    /// Where to go once polling gives up.
    pub fallback_url: Option<String>,
}

/// Extracts the anti-forgery token from `<meta name="csrf-token" content="...">`.
pub fn extract_csrf_token(html_content: &str) -> Result<String, ParseError> {
    let document = Html::parse_document(html_content);
    document
        .select(&CSRF_META_SELECTOR)
        .filter_map(|meta| meta.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_string)
        .ok_or(ParseError::TokenNotFound)
}

pub fn is_signed_in(html_content: &str) -> bool {
    let lower = html_content.to_lowercase();
    SIGNED_IN_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Finds the form fields to redeem a code for `platform_id` under the heading `game_name`.
///
/// A code can unlock rewards for several games, in which case the page shows one `<h2>`
/// per game followed by that game's forms. The heading whose text equals `game_name` is
/// used when there is more than one, otherwise the first. The first form after that
/// heading whose service field contains `platform_id` wins.
///
/// Returns `Ok(None)` when no form is offered for the platform.
pub fn extract_redemption_form(
    html_content: &str,
    game_name: &str,
    platform_id: &str,
) -> Result<Option<Vec<(String, String)>>, ParseError> {
    let document = Html::parse_document(html_content);
    if document.select(&REDEMPTION_FORM_CLASS_SELECTOR).next().is_none() {
        return Err(ParseError::FormNotFound);
    }

    let headings: Vec<ElementRef> = document.select(&HEADING_SELECTOR).collect();
    let mut heading = *headings.first().ok_or(ParseError::HeadingNotFound)?;
    if headings.len() > 1 {
        if let Some(matching) = headings
            .iter()
            .find(|h| h.text().collect::<String>().trim() == game_name)
        {
            heading = *matching;
        }
    }

    let heading_id = (*heading).id();
    let mut after_heading = false;
    for node in document.root_element().descendants() {
        if node.id() == heading_id {
            after_heading = true;
            continue;
        }
        if !after_heading {
            continue;
        }
        let Some(form) = ElementRef::wrap(node) else {
            continue;
        };
        if !REDEMPTION_FORM_SELECTOR.matches(&form) {
            continue;
        }
        let service = form
            .select(&SERVICE_SELECTOR)
            .next()
            .and_then(|s| s.value().attr("value"))
            .unwrap_or("");
        if !service.contains(platform_id) {
            continue;
        }
        let fields = form
            .select(&INPUT_SELECTOR)
            .filter_map(|input| {
                let name = input.value().attr("name")?;
                let value = input.value().attr("value").unwrap_or("");
                Some((name.to_string(), value.to_string()))
            })
            .collect();
        return Ok(Some(fields));
    }

    Ok(None)
}

/// Looks for the redemption status widget: `div#check_redemption_status` first, then an
/// `alert notice` div. Widgets without any text are ignored.
pub fn find_status_widget(html_content: &str) -> Option<StatusWidget> {
    let document = Html::parse_document(html_content);
    let div = document
        .select(&STATUS_SELECTOR)
        .next()
        .or_else(|| document.select(&NOTICE_SELECTOR).next())?;

    let text = div.text().collect::<String>().trim().to_string();
    if text.is_empty() {
        return None;
    }
    let attr = |name: &str| {
        div.value()
            .attr(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    Some(StatusWidget {
        url: attr("data-url"),
        fallback_url: attr("data-fallback-url"),
        text,
    })
}
