use once_cell::sync::Lazy;
use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Cached yt-dlp binary path
/// Read once at startup from YTDL_BIN environment variable or defaults to "yt-dlp"
pub static YTDL_BIN: Lazy<String> = Lazy::new(|| env::var("YTDL_BIN").unwrap_or_else(|_| "yt-dlp".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: reelscout.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "reelscout.log".to_string()));

/// Desktop user agents, one per line
/// Read from USER_AGENTS_FILE environment variable
/// Default: useragents.txt
pub static USER_AGENTS_FILE: Lazy<String> =
    Lazy::new(|| env::var("USER_AGENTS_FILE").unwrap_or_else(|_| "useragents.txt".to_string()));

/// Directory with per-account session files (`<account>_cookies.json`)
/// Read from SESSIONS_DIR environment variable
/// Supports tilde (~) expansion
pub static SESSIONS_DIR: Lazy<String> =
    Lazy::new(|| env::var("SESSIONS_DIR").unwrap_or_else(|_| "sessions".to_string()));

/// Download folder path
/// Read from DOWNLOAD_FOLDER environment variable
/// Supports tilde (~) expansion for home directory
pub static DOWNLOAD_FOLDER: Lazy<String> =
    Lazy::new(|| env::var("DOWNLOAD_FOLDER").unwrap_or_else(|_| "~/downloads/reels".to_string()));

/// Netscape cookie file exported from a logged-in browser
/// Read from INSTAGRAM_COOKIES_FILE environment variable
pub static INSTAGRAM_COOKIES_FILE: Lazy<Option<String>> =
    Lazy::new(|| env::var("INSTAGRAM_COOKIES_FILE").ok().filter(|v| !v.trim().is_empty()));

/// Expands `~` and returns an owned path.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).to_string())
}

/// Human-like pacing
pub mod delay {
    /// Default gap between requests (seconds)
    pub const REQUEST_MIN_SECS: f64 = 15.0;
    pub const REQUEST_MAX_SECS: f64 = 30.0;

    /// Gap between per-post actions (seconds)
    pub const POST_MIN_SECS: f64 = 20.0;
    pub const POST_MAX_SECS: f64 = 40.0;

    /// Occasional longer "distraction" pause
    pub const EXTRA_PAUSE_PROBABILITY: f64 = 0.2;
    pub const EXTRA_PAUSE_MIN_SECS: f64 = 3.0;
    pub const EXTRA_PAUSE_MAX_SECS: f64 = 8.0;

    /// Chance that a wait also rotates the user agent
    pub const UA_ROTATION_PROBABILITY: f64 = 0.7;

    /// Login typing cadence
    pub const TYPING_MIN_SECS: f64 = 0.05;
    pub const TYPING_MAX_SECS: f64 = 0.15;
    pub const FIELD_FOCUS_MIN_SECS: f64 = 0.3;
    pub const FIELD_FOCUS_MAX_SECS: f64 = 0.7;
    pub const FIELD_BLUR_MIN_SECS: f64 = 0.5;
    pub const FIELD_BLUR_MAX_SECS: f64 = 1.5;
    pub const AFTER_SUBMIT_MIN_SECS: f64 = 8.0;
    pub const AFTER_SUBMIT_MAX_SECS: f64 = 10.0;

    /// Spacing between consecutive downloads: 5s + uniform(0, 2)
    pub const DOWNLOAD_SPACING_SECS: f64 = 5.0;
    pub const DOWNLOAD_JITTER_SECS: f64 = 2.0;
}

/// Timeouts, outermost first
pub mod timeouts {
    use super::Duration;

    /// Overall collection budget for one source
    pub const COLLECTION_BUDGET_SECS: u64 = 300;

    /// Whole browser operation
    pub const BROWSER_OPERATION_SECS: u64 = 60;

    /// Page load inside the browser
    pub const PAGE_LOAD_SECS: u64 = 30;

    /// Settle time after a page load
    pub const PAGE_SETTLE_SECS: u64 = 3;

    /// yt-dlp listing (--flat-playlist)
    pub const YTDLP_LISTING_SECS: u64 = 60;

    /// yt-dlp download of one video
    pub const YTDLP_DOWNLOAD_SECS: u64 = 240;

    /// Single HTML / JSON request
    pub const HTTP_REQUEST_SECS: u64 = 15;

    /// Graph API request
    pub const GRAPH_API_SECS: u64 = 30;

    /// Streaming a media file
    pub const MEDIA_FETCH_SECS: u64 = 60;

    /// Local proxy port probe
    pub const PROXY_PROBE_MS: u64 = 1000;

    pub fn collection_budget() -> Duration {
        Duration::from_secs(COLLECTION_BUDGET_SECS)
    }

    pub fn browser_operation() -> Duration {
        Duration::from_secs(BROWSER_OPERATION_SECS)
    }

    pub fn page_load() -> Duration {
        Duration::from_secs(PAGE_LOAD_SECS)
    }

    pub fn ytdlp_listing() -> Duration {
        Duration::from_secs(YTDLP_LISTING_SECS)
    }

    pub fn ytdlp_download() -> Duration {
        Duration::from_secs(YTDLP_DOWNLOAD_SECS)
    }

    pub fn http_request() -> Duration {
        Duration::from_secs(HTTP_REQUEST_SECS)
    }

    pub fn graph_api() -> Duration {
        Duration::from_secs(GRAPH_API_SECS)
    }

    pub fn media_fetch() -> Duration {
        Duration::from_secs(MEDIA_FETCH_SECS)
    }

    pub fn proxy_probe() -> Duration {
        Duration::from_millis(PROXY_PROBE_MS)
    }
}

/// Platform endpoints and public constants
pub mod instagram {
    pub const BASE_URL: &str = "https://www.instagram.com";
    pub const LOGIN_URL: &str = "https://www.instagram.com/accounts/login/";

    /// Instagram internal app ID (public, embedded in the web app).
    pub const IG_APP_ID: &str = "936619743392459";

    /// Viewer info for an authenticated session
    pub const SHARED_DATA_PATH: &str = "/api/v1/web/data/shared_data/";

    pub const GRAPHQL_PATH: &str = "/graphql/query/";

    /// Known `doc_id`s for the shortcode media query; Instagram rotates them every few weeks.
    pub const GRAPHQL_DOC_IDS: &[&str] = &["7950326061742207", "24368985919464652", "17888483320059182"];

    pub const GRAPH_API_VERSION: &str = "v24.0";
    pub const GRAPH_INSTAGRAM_HOST: &str = "https://graph.instagram.com";
    pub const GRAPH_FACEBOOK_HOST: &str = "https://graph.facebook.com";

    /// Maximum requests per hour against unofficial endpoints (conservative, under the ~200 limit).
    pub const RATE_LIMIT_PER_HOUR: usize = 180;

    /// Cookies that make a session usable
    pub const REQUIRED_COOKIES: &[&str] = &["sessionid", "csrftoken", "ds_user_id"];
}

/// User-agent file parsing
pub mod user_agents {
    pub const MAX_LINES: usize = 1000;
    pub const MAX_AGENTS: usize = 200;
    pub const MIN_LENGTH: usize = 30;
}

/// Collection limits
pub mod collection {
    pub const DEFAULT_CAP: usize = 20;

    /// Graph API page size ceiling
    pub const MAX_PAGE_SIZE: usize = 50;

    /// Only the head of huge HTML pages is scanned
    pub const HTML_SAMPLE_BYTES: usize = 2_000_000;

    /// Browser strategy collects this many links per requested item before parsing
    pub const LINK_OVERSAMPLE: usize = 2;

    pub const PROFILE_MAX_SCROLLS: usize = 3;
    pub const HASHTAG_MAX_SCROLLS: usize = 10;

    /// Rate-limit retries the orchestrator grants a strategy
    pub const RATE_LIMIT_RETRIES: u32 = 2;
}

/// Proxy configuration
pub mod proxy {
    /// Local VPN/proxy port probed opportunistically
    pub const LOCAL_PROXY_PORT: u16 = 8964;

    /// Standard proxy variables, highest priority first
    pub const SYSTEM_PROXY_VARS: &[&str] = &["HTTPS_PROXY", "HTTP_PROXY", "https_proxy", "http_proxy"];
}

/// Login credentials for one platform account
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self {
            username: self.username.clone(),
            password: SecretString::from(self.password.expose_secret().to_owned()),
        }
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Parses `user:pass,user2:pass2`. Entries without a colon are skipped.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        raw.split(',')
            .filter_map(|entry| {
                let (user, pass) = entry.trim().split_once(':')?;
                let user = user.trim();
                if user.is_empty() || pass.is_empty() {
                    return None;
                }
                Some(Self::new(user, pass))
            })
            .collect()
    }
}

/// Proxy sources before parsing and probing
#[derive(Debug, Clone, Default)]
pub struct ProxySettings {
    /// INSTAGRAM_PROXY followed by PROXY_LIST entries, in order
    pub explicit: Vec<String>,
    /// First of HTTPS_PROXY / HTTP_PROXY / https_proxy / http_proxy
    pub system: Option<String>,
    /// Port probed on 127.0.0.1; `None` disables the probe
    pub local_port: Option<u16>,
    /// ROTATE_PROXIES=true selects randomly instead of round-robin
    pub rotate_randomly: bool,
}

impl ProxySettings {
    pub fn from_env() -> Self {
        let mut explicit = Vec::new();
        for var in ["INSTAGRAM_PROXY", "PROXY_LIST"] {
            if let Ok(value) = env::var(var) {
                explicit.extend(split_list(&value));
            }
        }

        let system = proxy::SYSTEM_PROXY_VARS
            .iter()
            .find_map(|var| env::var(var).ok().filter(|v| !v.trim().is_empty()));

        let local_port = match env::var("LOCAL_PROXY_PORT") {
            Ok(v) if matches!(v.trim(), "" | "0" | "off" | "none" | "disabled") => None,
            Ok(v) => v.trim().parse().ok().or(Some(proxy::LOCAL_PROXY_PORT)),
            Err(_) => Some(proxy::LOCAL_PROXY_PORT),
        };

        Self {
            explicit,
            system,
            local_port,
            rotate_randomly: env_flag("ROTATE_PROXIES"),
        }
    }
}

/// Runtime settings, read once by the binary and injected into every component.
#[derive(Debug)]
pub struct Settings {
    pub proxy: ProxySettings,
    /// INSTAGRAM_ACCOUNTS (`user:pass,...`) plus INSTAGRAM_USERNAME/INSTAGRAM_PASSWORD
    pub accounts: Vec<Credentials>,
    /// GRAPH_API_TOKEN; `EAA...` selects graph.facebook.com, `IG...` graph.instagram.com
    pub graph_api_token: Option<SecretString>,
    /// GRAPH_API_USER_ID; resolved through /me/accounts when absent
    pub graph_api_user_id: Option<String>,
    pub cookies_file: Option<PathBuf>,
    /// BROWSER_COOKIE_KEY: base64 AES key for Chromium cookie stores
    pub browser_cookie_key: Option<SecretString>,
    pub sessions_dir: PathBuf,
    pub user_agents_file: PathBuf,
    pub download_dir: PathBuf,
    /// Default engagement thresholds when a source spec carries none
    pub min_views: Option<u64>,
    pub min_likes: Option<u64>,
    /// Duration bounds applied during yt-dlp listing (seconds)
    pub min_duration: Option<f64>,
    pub max_duration: Option<f64>,
    pub collection_budget: Duration,
    /// ACCEPT_PARTIAL=true stops at the first non-empty strategy result
    pub accept_partial: bool,
}

impl Settings {
    pub fn from_env() -> Self {
        let mut accounts = env::var("INSTAGRAM_ACCOUNTS")
            .map(|v| Credentials::parse_list(&v))
            .unwrap_or_default();
        if let (Ok(user), Ok(pass)) = (env::var("INSTAGRAM_USERNAME"), env::var("INSTAGRAM_PASSWORD")) {
            if !user.trim().is_empty() && !accounts.iter().any(|c| c.username == user.trim()) {
                accounts.insert(0, Credentials::new(user.trim(), pass));
            }
        }

        Self {
            proxy: ProxySettings::from_env(),
            accounts,
            graph_api_token: env::var("GRAPH_API_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| SecretString::from(v.trim().to_string())),
            graph_api_user_id: env::var("GRAPH_API_USER_ID").ok().filter(|v| !v.trim().is_empty()),
            cookies_file: INSTAGRAM_COOKIES_FILE.as_deref().map(expand_path),
            browser_cookie_key: env::var("BROWSER_COOKIE_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            sessions_dir: expand_path(&SESSIONS_DIR),
            user_agents_file: expand_path(&USER_AGENTS_FILE),
            download_dir: expand_path(&DOWNLOAD_FOLDER),
            min_views: env_parse("MIN_VIEWS"),
            min_likes: env_parse("MIN_LIKES"),
            min_duration: env_parse("MIN_DURATION"),
            max_duration: env_parse("MAX_DURATION"),
            collection_budget: env_parse("COLLECTION_BUDGET_SECS")
                .map(Duration::from_secs)
                .unwrap_or_else(timeouts::collection_budget),
            accept_partial: env_flag("ACCEPT_PARTIAL"),
        }
    }

    /// Settings for tests and embedding: no accounts, no proxies, paths under `root`.
    pub fn isolated(root: &std::path::Path) -> Self {
        Self {
            proxy: ProxySettings::default(),
            accounts: Vec::new(),
            graph_api_token: None,
            graph_api_user_id: None,
            cookies_file: None,
            browser_cookie_key: None,
            sessions_dir: root.join("sessions"),
            user_agents_file: root.join("useragents.txt"),
            download_dir: root.join("downloads"),
            min_views: None,
            min_likes: None,
            min_duration: None,
            max_duration: None,
            collection_budget: timeouts::collection_budget(),
            accept_partial: false,
        }
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split([',', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn env_flag(var: &str) -> bool {
    env::var(var)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    env::var(var).ok().and_then(|v| v.trim().parse().ok())
}
