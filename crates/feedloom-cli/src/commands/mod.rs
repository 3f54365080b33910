pub mod articles;
pub mod cleanup;
pub mod daemon;
pub mod discover;
pub mod import;
pub mod list;
pub mod refresh;
pub mod settings;
pub mod subscribe;
pub mod unsubscribe;
pub mod update;

use anyhow::{bail, Result};
use uuid::Uuid;

use feedloom_core::feed::{urls_match, Feed};

/// Find a feed by id, exact title or location
pub fn find_feed(feeds: &[Feed], query: &str) -> Result<Feed> {
    let query = query.trim();

    if let Ok(id) = Uuid::parse_str(query) {
        if let Some(feed) = feeds.iter().find(|f| f.id == id) {
            return Ok(feed.clone());
        }
    }

    let matches: Vec<&Feed> = feeds
        .iter()
        .filter(|f| f.title == query || urls_match(f.source.location(), query))
        .collect();

    match matches.as_slice() {
        [feed] => Ok((*feed).clone()),
        [] => bail!("No subscription matches '{}'. Run 'feedloom list' to see them.", query),
        _ => bail!("'{}' matches {} subscriptions; use the feed id instead", query, matches.len()),
    }
}
