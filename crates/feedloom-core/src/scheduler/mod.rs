mod service;
pub mod tasks;

pub use service::{ScheduledJobs, SchedulerEvent, SchedulerHandle, SchedulerService, DISABLED_RECHECK};
pub use tasks::{cleanup_old_articles, FeedRefreshJobs};
