mod canonical;
mod fetcher;
mod models;
mod opml;
mod parser;
mod source;
mod subscription;

pub use canonical::{canonical_url, urls_match};
pub use fetcher::{FeedFetchResult, FeedFetcher, RefreshReport};
pub use models::{
    Article, ArticleFilter, Feed, FeedSource, FeedUpdate, NewArticle, NewFeed, MAX_REFRESH_INTERVAL_SECS,
};
pub use opml::{parse_opml, parse_opml_file, OpmlFeed};
pub use parser::{parse_feed, ParsedFeed, ParsedItem};
pub use source::{ContentSource, HttpSource, ScriptPolicy, ScriptSource, MAX_FEED_BYTES};
pub use subscription::{validate_feed_url, ImportReport, SubscriptionManager};

pub(crate) use source::{browser_headers, build_client, read_capped};
