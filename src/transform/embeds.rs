//! Pass 5: turn bare embed URLs into embeddable markup.
//!
//! WordPress leaves `figure.wp-block-embed` blocks with nothing but the
//! pasted URL inside the wrapper when the oEmbed call failed or is rendered
//! client side. Each URL is classified by [`classify`], a total function:
//! anything not recognised becomes a [`EmbedProvider::Generic`] iframe.

use super::{Document, TransformContext};
use maud::{Markup, html};
use regex::Regex;
use std::sync::LazyLock;

static YOUTUBE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:youtu\.be/|[?&]v=|/embed/)([A-Za-z0-9_-]{6,})").unwrap()
});

static VIMEO_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"vimeo\.com/(\d+)").unwrap());

const WRAPPER_SELECTOR: &str = "figure.wp-block-embed div.wp-block-embed__wrapper";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedProvider {
    /// Podcast episode player; `src` is the player URL.
    Podcast { src: String },
    YouTube { id: String },
    Vimeo { id: String },
    /// Twitter/X posts become a plain outbound link.
    Social { url: String },
    Generic { url: String },
}

/// Classify an embed URL. Never fails.
pub fn classify(url: &str) -> EmbedProvider {
    let host = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_ascii_lowercase()));
    let Some(host) = host else {
        return EmbedProvider::Generic { url: url.to_string() };
    };

    match host.as_str() {
        h if h.ends_with("acast.com") && url.contains("/episodes/") => EmbedProvider::Podcast {
            src: url.replace("shows.acast.com", "embed.acast.com"),
        },
        "youtube.com" | "m.youtube.com" | "youtu.be" | "youtube-nocookie.com" => {
            match YOUTUBE_ID.captures(url) {
                Some(caps) => EmbedProvider::YouTube { id: caps[1].to_string() },
                None => EmbedProvider::Generic { url: url.to_string() },
            }
        }
        "vimeo.com" | "player.vimeo.com" => match VIMEO_ID.captures(url) {
            Some(caps) => EmbedProvider::Vimeo { id: caps[1].to_string() },
            None => EmbedProvider::Generic { url: url.to_string() },
        },
        "twitter.com" | "x.com" | "mobile.twitter.com" => EmbedProvider::Social { url: url.to_string() },
        _ => EmbedProvider::Generic { url: url.to_string() },
    }
}

impl EmbedProvider {
    pub fn render(&self) -> Markup {
        match self {
            EmbedProvider::Podcast { src } => html! {
                iframe src=(src) width="100%" height="190" frameborder="0" scrolling="no"
                    style="border: none;" loading="lazy" {}
            },
            EmbedProvider::YouTube { id } => html! {
                iframe src=(format!("https://www.youtube.com/embed/{id}")) width="560" height="315"
                    frameborder="0" allowfullscreen loading="lazy" {}
            },
            EmbedProvider::Vimeo { id } => html! {
                iframe src=(format!("https://player.vimeo.com/video/{id}")) width="640" height="360"
                    frameborder="0" allowfullscreen loading="lazy" {}
            },
            EmbedProvider::Social { url } => html! {
                a href=(url) target="_blank" rel="noopener noreferrer" { "View Tweet: " (url) }
            },
            EmbedProvider::Generic { url } => html! {
                iframe src=(url) width="100%" height="400" frameborder="0" loading="lazy" {}
            },
        }
    }
}

pub fn normalize(doc: Document, ctx: &mut TransformContext<'_>) -> Document {
    let path = ctx.item.path.clone();
    doc.edit(|parsed, edits| {
        for wrapper in parsed.select(WRAPPER_SELECTOR) {
            let text = parsed.text(wrapper);
            if text.starts_with("http") && !text.contains(char::is_whitespace) {
                let provider = classify(&text);
                tracing::debug!(path = %path, ?provider, "normalizing embed");
                edits.replace(parsed.inner_range(wrapper), provider.render().into_string());
            } else if !text.is_empty() && parsed.select_within(wrapper, "*").is_empty() {
                tracing::warn!(path = %path, text = %text, "embed wrapper without a URL left as is");
            }
        }
    })
}
