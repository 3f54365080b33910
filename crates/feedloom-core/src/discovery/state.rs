use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Which of the two discovery state machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryKind {
    /// Seeded by one feed
    Single,
    /// Seeded by every eligible feed in the library
    Batch,
}

impl fmt::Display for DiscoveryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryKind::Single => write!(f, "single"),
            DiscoveryKind::Batch => write!(f, "batch"),
        }
    }
}

impl FromStr for DiscoveryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(DiscoveryKind::Single),
            "batch" | "all" => Ok(DiscoveryKind::Batch),
            other => Err(Error::Validation(format!("Unknown discovery kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStatus {
    #[default]
    Idle,
    Running,
    Complete,
    Errored,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u32,
    pub total: u32,
    /// Short label of what the run is doing now
    pub stage: String,
    pub detail: Option<String>,
}

/// An article shown as a preview of a discovered blog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentArticle {
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// A feed found by discovery, not yet subscribed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredBlog {
    pub name: String,
    pub homepage: String,
    pub feed_url: String,
    pub icon_url: Option<String>,
    pub description: Option<String>,
    pub recent_articles: Vec<RecentArticle>,
    /// The subscribed feed whose site led here
    pub source_feed_id: Option<Uuid>,
}

/// Pollable snapshot of one discovery run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryState {
    pub kind: DiscoveryKind,
    pub status: DiscoveryStatus,
    pub running: bool,
    pub progress: Progress,
    pub feeds: Vec<DiscoveredBlog>,
    pub error: Option<String>,
    pub complete: bool,
    pub seed_feed_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DiscoveryState {
    pub fn idle(kind: DiscoveryKind) -> Self {
        Self {
            kind,
            status: DiscoveryStatus::Idle,
            running: false,
            progress: Progress::default(),
            feeds: Vec::new(),
            error: None,
            complete: false,
            seed_feed_id: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == DiscoveryStatus::Running
    }

    pub(crate) fn begin(&mut self, total: u32, seed_feed_id: Option<Uuid>) {
        *self = Self::idle(self.kind);
        self.status = DiscoveryStatus::Running;
        self.running = true;
        self.progress.total = total;
        self.progress.stage = "starting".to_string();
        self.seed_feed_id = seed_feed_id;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn set_stage(&mut self, stage: &str, detail: Option<String>) {
        self.progress.stage = stage.to_string();
        self.progress.detail = detail;
    }

    pub(crate) fn advance(&mut self, by: u32) {
        self.progress.current = (self.progress.current + by).min(self.progress.total);
    }

    pub(crate) fn grow_total(&mut self, by: u32) {
        self.progress.total += by;
    }

    pub(crate) fn push_feed(&mut self, blog: DiscoveredBlog) {
        self.feeds.push(blog);
    }

    pub(crate) fn finish_ok(&mut self) {
        self.status = DiscoveryStatus::Complete;
        self.running = false;
        self.complete = true;
        self.progress.current = self.progress.total;
        self.progress.stage = "done".to_string();
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn finish_err(&mut self, error: String) {
        self.status = DiscoveryStatus::Errored;
        self.running = false;
        self.complete = false;
        self.error = Some(error);
        self.progress.stage = "failed".to_string();
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut state = DiscoveryState::idle(DiscoveryKind::Single);
        state.begin(1, None);
        assert!(state.running && state.is_running());
        assert_eq!(state.progress.total, 1);

        state.advance(1);
        state.grow_total(2);
        state.advance(5);
        assert_eq!(state.progress.current, 3);
        assert_eq!(state.progress.total, 3);

        state.finish_ok();
        assert!(state.complete && !state.running);
        assert_eq!(state.status, DiscoveryStatus::Complete);

        state.begin(4, None);
        assert_eq!(state.progress.current, 0);
        assert!(state.feeds.is_empty() && !state.complete);

        state.finish_err("timed out".to_string());
        assert_eq!(state.status, DiscoveryStatus::Errored);
        assert!(!state.complete && !state.running);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("single".parse::<DiscoveryKind>().unwrap(), DiscoveryKind::Single);
        assert_eq!("ALL".parse::<DiscoveryKind>().unwrap(), DiscoveryKind::Batch);
        assert!("both".parse::<DiscoveryKind>().is_err());
    }
}
