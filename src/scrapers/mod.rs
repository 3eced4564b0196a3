//! Portal access: URL construction, the file API client, and the search crawl.

pub mod browser;
pub mod http_client;
pub mod search;
pub mod urls;

pub use browser::{BrowserEngineConfig, BrowserFetcher};
pub use http_client::HttpClient;
pub use search::{
    CrawlTiming, PageResult, ResultPageSource, SearchCrawler, SearchEvent, SearchOutcome,
};
pub use urls::{PortalUrls, PAGE_SIZE};
