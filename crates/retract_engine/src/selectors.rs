use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{CardHandle, ListSession, SessionError};

/// One way to pull a text field out of a card. Fields carry a chain of
/// these; the first strategy yielding a non-blank value wins, so a
/// fragile primary selector can be backed by a coarser fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldStrategy {
    /// Text of the first descendant matching `selector`.
    Text { selector: String },
    /// Text of the `index`-th descendant matching `selector`, 0-based.
    NthText { selector: String, index: usize },
    /// Attribute value of the first descendant matching `selector`.
    Attr { selector: String, attr: String },
    /// Text of the first descendant matching `selector` whose text
    /// contains `needle`.
    TextContaining { selector: String, needle: String },
}

/// One way to find and press a control. Same chain idea as
/// [`FieldStrategy`]: first strategy that clicks something wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClickStrategy {
    /// Click the first element matching `selector`.
    Selector { selector: String },
    /// Click the first element matching `selector` whose text contains
    /// `needle`.
    TextMatch { selector: String, needle: String },
}

/// Everything site-specific in one place: URLs, markers and selector
/// chains for one deployment of the invitation list. Plain data so a
/// JSON file can override the built-in defaults when the site's markup
/// drifts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    pub login_url: String,
    pub list_url: String,
    /// Present only once the operator is signed in.
    pub logged_in_marker: String,
    /// One rendered invitation card.
    pub card: String,
    /// Stable identity of the card, normally a profile link.
    pub identity: Vec<FieldStrategy>,
    pub display_name: Vec<FieldStrategy>,
    pub headline: Vec<FieldStrategy>,
    pub time_sent: Vec<FieldStrategy>,
    /// The per-card withdraw control.
    pub withdraw_click: Vec<ClickStrategy>,
    /// The confirmation dialog container, probed for open and close.
    pub confirm_dialog: String,
    pub confirm_click: Vec<ClickStrategy>,
    /// Dismisses a confirmation dialog that refuses to complete.
    pub cancel_click: Vec<ClickStrategy>,
}

impl Default for SiteProfile {
    fn default() -> Self {
        let dialog_button = r#"dialog[aria-label*="Withdraw invitation"] button"#;
        Self {
            login_url: "https://www.linkedin.com/login".to_string(),
            list_url: "https://www.linkedin.com/mynetwork/invitation-manager/sent/".to_string(),
            logged_in_marker: ".global-nav__me".to_string(),
            card: r#"div[role="listitem"][componentkey^="auto-component-"]"#.to_string(),
            identity: vec![FieldStrategy::Attr {
                selector: r#"a[href*="/in/"]"#.to_string(),
                attr: "href".to_string(),
            }],
            display_name: vec![
                FieldStrategy::Text {
                    selector: "a._70f3535c._5c6933d6".to_string(),
                },
                FieldStrategy::Text {
                    selector: r#"a[href*="/in/"]"#.to_string(),
                },
            ],
            headline: vec![FieldStrategy::NthText {
                selector: "p".to_string(),
                index: 1,
            }],
            time_sent: vec![FieldStrategy::TextContaining {
                selector: "p".to_string(),
                needle: "Sent".to_string(),
            }],
            withdraw_click: vec![
                ClickStrategy::TextMatch {
                    selector: "button".to_string(),
                    needle: "Withdraw".to_string(),
                },
                ClickStrategy::Selector {
                    selector: r#"button[data-view-name="sent-invitations-withdraw-single"]"#
                        .to_string(),
                },
            ],
            confirm_dialog: r#"dialog[aria-label*="Withdraw invitation"]"#.to_string(),
            confirm_click: vec![ClickStrategy::TextMatch {
                selector: dialog_button.to_string(),
                needle: "Withdraw".to_string(),
            }],
            cancel_click: vec![ClickStrategy::TextMatch {
                selector: dialog_button.to_string(),
                needle: "Cancel".to_string(),
            }],
        }
    }
}

impl SiteProfile {
    /// Loads a profile from a JSON file. Missing fields fall back to
    /// the built-in defaults, so an override file only needs the
    /// selectors that actually changed.
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("could not read profile: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid profile: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Runs a field's strategy chain against one card. The first non-blank
/// value wins; `None` means the whole chain came up empty.
pub async fn extract_field<S: ListSession>(
    session: &mut S,
    card: CardHandle,
    strategies: &[FieldStrategy],
) -> Result<Option<String>, SessionError> {
    for strategy in strategies {
        let value = match strategy {
            FieldStrategy::Text { selector } => {
                session.card_texts(card, selector).await?.into_iter().next()
            }
            FieldStrategy::NthText { selector, index } => session
                .card_texts(card, selector)
                .await?
                .into_iter()
                .nth(*index),
            FieldStrategy::Attr { selector, attr } => {
                session.card_attr(card, selector, attr).await?
            }
            FieldStrategy::TextContaining { selector, needle } => session
                .card_texts(card, selector)
                .await?
                .into_iter()
                .find(|text| text.contains(needle)),
        };
        if let Some(value) = value {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }
    Ok(None)
}

/// Runs a click chain inside one card. Returns whether anything was
/// actually clicked.
pub async fn click_in_card_chain<S: ListSession>(
    session: &mut S,
    card: CardHandle,
    strategies: &[ClickStrategy],
) -> Result<bool, SessionError> {
    for strategy in strategies {
        match strategy {
            ClickStrategy::Selector { selector } => {
                if session.click_in_card(card, selector, 0).await? {
                    return Ok(true);
                }
            }
            ClickStrategy::TextMatch { selector, needle } => {
                let texts = session.card_texts(card, selector).await?;
                if let Some(index) = texts.iter().position(|text| text.contains(needle)) {
                    if session.click_in_card(card, selector, index).await? {
                        return Ok(true);
                    }
                }
            }
        }
    }
    Ok(false)
}

/// Runs a click chain against the whole page, for controls that live
/// outside any card such as dialog buttons.
pub async fn click_on_page_chain<S: ListSession>(
    session: &mut S,
    strategies: &[ClickStrategy],
) -> Result<bool, SessionError> {
    for strategy in strategies {
        match strategy {
            ClickStrategy::Selector { selector } => {
                if session.click_on_page(selector, 0).await? {
                    return Ok(true);
                }
            }
            ClickStrategy::TextMatch { selector, needle } => {
                let texts = session.page_texts(selector).await?;
                if let Some(index) = texts.iter().position(|text| text.contains(needle)) {
                    if session.click_on_page(selector, index).await? {
                        return Ok(true);
                    }
                }
            }
        }
    }
    Ok(false)
}
