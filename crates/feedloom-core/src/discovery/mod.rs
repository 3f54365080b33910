mod coordinator;
mod crawler;
mod state;

pub use coordinator::DiscoveryCoordinator;
pub use crawler::{homepage_for, BlogDiscoverer, SiteCrawler};
pub use state::{DiscoveredBlog, DiscoveryKind, DiscoveryState, DiscoveryStatus, Progress, RecentArticle};
