//! Blog discovery by crawling friend-link pages.
//!
//! Personal blogs commonly link to other blogs from a "friends" or
//! "blogroll" page. Starting from a seed's homepage we collect those
//! external sites and probe each one for a feed.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use url::Url;

use super::state::{DiscoveredBlog, RecentArticle};
use crate::config::DiscoveryConfig;
use crate::feed::{browser_headers, build_client, parse_feed, read_capped, Feed, FeedSource, ParsedFeed, MAX_FEED_BYTES};
use crate::{Error, Result};

/// Friend-link pages followed per homepage
const MAX_FRIEND_PAGES: usize = 3;

/// Paths tried when a site does not advertise its feed
const COMMON_FEED_PATHS: &[&str] = &["/feed", "/rss", "/atom.xml", "/feed.xml", "/rss.xml", "/index.xml"];

/// Hosts that are never treated as blogs
const PLATFORM_HOSTS: &[&str] = &[
    "github.com",
    "gitlab.com",
    "gitee.com",
    "twitter.com",
    "x.com",
    "facebook.com",
    "instagram.com",
    "linkedin.com",
    "youtube.com",
    "youtu.be",
    "reddit.com",
    "t.me",
    "telegram.org",
    "discord.com",
    "discord.gg",
    "weibo.com",
    "zhihu.com",
    "bilibili.com",
    "douban.com",
    "google.com",
    "apple.com",
    "microsoft.com",
    "amazon.com",
    "wikipedia.org",
    "stackoverflow.com",
    "npmjs.com",
    "crates.io",
    "creativecommons.org",
    "beian.miit.gov.cn",
];

static FRIEND_LINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)friend|blogroll|links|友链|友情链接|朋友|邻居")
        .expect("friend link regex should compile")
});

static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector should parse"));
static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("link[rel][href]").expect("link selector should parse"));
static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector should parse"));
static DESCRIPTION_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[name="description"]"#).expect("description selector should parse")
});

/// The crawl operations discovery is built on
#[async_trait]
pub trait SiteCrawler: Send + Sync + 'static {
    /// External sites linked from a homepage's friend-link pages
    async fn find_candidate_sites(&self, homepage: &Url) -> Result<Vec<Url>>;

    /// Locate and read the feed of a site
    async fn probe_site(&self, site: &Url) -> Result<DiscoveredBlog>;
}

/// Where to start crawling for a feed: its site URL, else the origin of its feed URL
pub fn homepage_for(feed: &Feed) -> Option<Url> {
    let from_site = feed
        .site_url
        .as_deref()
        .and_then(|s| Url::parse(s).ok())
        .filter(is_web_url);

    from_site.or_else(|| match &feed.source {
        FeedSource::Url(url) => Url::parse(url).ok().filter(is_web_url).map(|u| origin_of(&u)),
        FeedSource::Script(_) => None,
    })
}

fn is_web_url(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https") && url.host_str().is_some()
}

fn origin_of(url: &Url) -> Url {
    let mut origin = url.clone();
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);
    origin
}

/// `host[:port]`, the identity of a site
fn site_key(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host.to_ascii_lowercase(), port),
        (Some(host), None) => host.to_ascii_lowercase(),
        (None, _) => String::new(),
    }
}

fn is_platform(url: &Url) -> bool {
    let host = match url.host_str() {
        Some(host) => host.to_ascii_lowercase(),
        None => return true,
    };
    let host = host.strip_prefix("www.").unwrap_or(&host);

    PLATFORM_HOSTS
        .iter()
        .any(|p| host == *p || host.ends_with(&format!(".{}", p)))
}

/// Same-site pages whose link text or href looks like a friend-link page
fn friend_link_pages(html: &str, homepage: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let pattern = &*FRIEND_LINK_PATTERN;
    let home_key = site_key(homepage);
    let mut seen = HashSet::new();
    let mut pages = Vec::new();

    for anchor in document.select(&ANCHOR_SELECTOR) {
        let Some(href) = anchor.value().attr("href") else { continue };
        let text: String = anchor.text().collect();
        if !pattern.is_match(href) && !pattern.is_match(&text) {
            continue;
        }
        let Ok(mut url) = homepage.join(href) else { continue };
        url.set_fragment(None);
        if site_key(&url) != home_key || url.path() == homepage.path() {
            continue;
        }
        if seen.insert(url.to_string()) {
            pages.push(url);
        }
        if pages.len() >= MAX_FRIEND_PAGES {
            break;
        }
    }

    pages
}

/// Origins of other sites linked from a page
fn external_sites(html: &str, page: &Url, home_key: &str) -> Vec<Url> {
    let document = Html::parse_document(html);

    document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| page.join(href).ok())
        .filter(|url| is_web_url(url) && !is_platform(url) && site_key(url) != home_key)
        .map(|url| origin_of(&url))
        .collect()
}

/// What a site's HTML tells us: advertised feeds, a name, a description and an icon
#[derive(Debug, Default)]
struct SiteInfo {
    feed_links: Vec<Url>,
    title: Option<String>,
    description: Option<String>,
    icon: Option<Url>,
}

fn inspect_site(html: &str, site: &Url) -> SiteInfo {
    let document = Html::parse_document(html);
    let mut info = SiteInfo::default();

    for link in document.select(&LINK_SELECTOR) {
        let rel = link.value().attr("rel").unwrap_or_default().to_ascii_lowercase();
        let kind = link.value().attr("type").unwrap_or_default().to_ascii_lowercase();
        let Some(href) = link.value().attr("href").and_then(|h| site.join(h).ok()) else {
            continue;
        };

        if rel.split_whitespace().any(|r| r == "alternate")
            && (kind.contains("rss") || kind.contains("atom") || kind.contains("feed+json"))
        {
            info.feed_links.push(href);
        } else if info.icon.is_none() && rel.split_whitespace().any(|r| r == "icon") {
            info.icon = Some(href);
        }
    }

    info.title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    info.description = document
        .select(&DESCRIPTION_SELECTOR)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    info
}

/// Crawler over HTTP with per-request timeouts and a body cap
pub struct BlogDiscoverer {
    client: Client,
    max_candidates: usize,
}

impl BlogDiscoverer {
    pub fn new(config: &DiscoveryConfig, proxy_url: Option<&str>) -> Result<Self> {
        let client = build_client(Duration::from_secs(config.request_timeout_secs), proxy_url)?;
        Ok(Self {
            client,
            max_candidates: config.max_candidates,
        })
    }

    async fn get(&self, url: &Url) -> Result<bytes::Bytes> {
        let response = self.client.get(url.as_str()).headers(browser_headers()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Discovery(format!("HTTP {} for URL: {}", status, url)));
        }
        read_capped(response, MAX_FEED_BYTES).await
    }

    async fn get_html(&self, url: &Url) -> Result<String> {
        let body = self.get(url).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn get_feed(&self, url: &Url) -> Result<ParsedFeed> {
        let body = self.get(url).await?;
        parse_feed(&body)
    }
}

#[async_trait]
impl SiteCrawler for BlogDiscoverer {
    async fn find_candidate_sites(&self, homepage: &Url) -> Result<Vec<Url>> {
        tracing::debug!("Crawling {} for friend links", homepage);

        let home_html = self.get_html(homepage).await?;
        let home_key = site_key(homepage);

        let mut pages = Vec::new();
        for page in friend_link_pages(&home_html, homepage) {
            match self.get_html(&page).await {
                Ok(html) => pages.push((page, html)),
                Err(e) => tracing::debug!("Skipping friend page {}: {}", page, e),
            }
        }
        if pages.is_empty() {
            pages.push((homepage.clone(), home_html));
        }

        let mut seen = HashSet::new();
        let mut sites = Vec::new();
        for (page, html) in &pages {
            for site in external_sites(html, page, &home_key) {
                if sites.len() >= self.max_candidates {
                    break;
                }
                if seen.insert(site_key(&site)) {
                    sites.push(site);
                }
            }
        }

        tracing::debug!("Found {} candidate sites on {}", sites.len(), homepage);
        Ok(sites)
    }

    async fn probe_site(&self, site: &Url) -> Result<DiscoveredBlog> {
        // A site that will not serve its homepage can still expose a feed path
        let info = match self.get_html(site).await {
            Ok(html) => inspect_site(&html, site),
            Err(e) => {
                tracing::debug!("Homepage of {} unavailable: {}", site, e);
                SiteInfo::default()
            }
        };

        let mut candidates = info.feed_links.clone();
        candidates.extend(COMMON_FEED_PATHS.iter().filter_map(|p| site.join(p).ok()));

        for feed_url in candidates {
            let parsed = match self.get_feed(&feed_url).await {
                Ok(parsed) => parsed,
                Err(_) => continue,
            };

            let name = parsed
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .or_else(|| info.title.clone())
                .unwrap_or_else(|| site_key(site));

            let recent_articles = parsed
                .items
                .iter()
                .take(3)
                .map(|item| RecentArticle {
                    title: item.title.clone(),
                    url: item.link.clone(),
                    published_at: item.published_at,
                })
                .collect();

            let icon = info
                .icon
                .clone()
                .or_else(|| site.join("/favicon.ico").ok())
                .map(|u| u.to_string());

            return Ok(DiscoveredBlog {
                name,
                homepage: site.to_string(),
                feed_url: feed_url.to_string(),
                icon_url: icon,
                description: parsed.description.or(info.description),
                recent_articles,
                source_feed_id: None,
            });
        }

        Err(Error::Discovery(format!("No feed found on {}", site)))
    }
}
