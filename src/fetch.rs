//! Content fetcher: one GET per item, classified into an outcome.
//!
//! A fetch never fails the run. 404 is [`FetchOutcome::NotFound`] (counted as
//! skipped), every other non-2xx and every transport error is
//! [`FetchOutcome::Error`] (counted as failed).

use crate::http::Transport;
use crate::types::ContentItem;
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success { body: Vec<u8>, content_type: String },
    NotFound,
    Error(String),
}

impl FetchOutcome {
    /// Whether the body should go through the transformer.
    pub fn is_html(&self) -> bool {
        match self {
            FetchOutcome::Success { content_type, .. } => {
                content_type.is_empty() || content_type.to_ascii_lowercase().contains("text/html")
            }
            _ => false,
        }
    }
}

/// Source URL of an item.
pub fn item_url(source: &str, item: &ContentItem) -> String {
    format!("{}{}", source.trim_end_matches('/'), item.path)
}

pub fn fetch(transport: &dyn Transport, source: &str, item: &ContentItem) -> FetchOutcome {
    let url = item_url(source, item);
    match transport.get(&url) {
        Ok(response) if response.is_success() => FetchOutcome::Success {
            body: response.body,
            content_type: response.content_type,
        },
        Ok(response) if response.status == 404 => FetchOutcome::NotFound,
        Ok(response) => FetchOutcome::Error(format!("HTTP {}", response.status)),
        Err(e) => FetchOutcome::Error(e.to_string()),
    }
}

/// Paths already handled in this run, shared by every fetch worker.
#[derive(Debug, Default)]
pub struct ProcessedSet {
    paths: Mutex<HashSet<String>>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a path for processing. False when another worker already has it.
    pub fn claim(&self, path: &str) -> bool {
        match self.paths.lock() {
            Ok(mut paths) => paths.insert(path.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(path.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.paths.lock().map(|p| p.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
