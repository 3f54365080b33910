mod article_repo;
mod database;
mod feed_repo;
mod settings_repo;

pub use article_repo::ArticleRepository;
pub use database::Database;
pub use feed_repo::FeedRepository;
pub use settings_repo::SettingsRepository;
