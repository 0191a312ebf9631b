use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use thirtyfour::extensions::cdp::ChromeDevTools;
use thirtyfour::prelude::*;
use thirtyfour::CapabilitiesHelper;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info, warn};

use super::{PageSource, ScrapeError};
use crate::config::EnricherConfig;
use crate::http::random_user_agent;
use crate::proxy::ProxyManager;
use crate::rate_limit::RateLimiter;

const BLOCKED_RESOURCES: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico", "*.css", "*.woff",
    "*.woff2", "*.ttf", "*.otf", "*.mp4", "*.webm", "*.mp3",
];

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub headless: bool,
    pub page_timeout: Duration,
    pub contexts: usize,
    pub proxy_arg: Option<String>,
}

impl BrowserSettings {
    pub fn from_config(config: &EnricherConfig, proxy: &ProxyManager) -> Self {
        Self {
            webdriver_url: config.webdriver_url.clone(),
            headless: config.headless,
            page_timeout: config.scrape_timeout,
            contexts: config.browser_contexts.max(1),
            proxy_arg: proxy.chrome_arg(),
        }
    }
}

/// WebDriver sessions shared by every worker, opened on first use.
pub struct BrowserPool {
    settings: BrowserSettings,
    idle: Mutex<Vec<WebDriver>>,
    slots: Semaphore,
    limiter: Arc<RateLimiter>,
}

/// A checked-out session. Goes back to the pool on drop unless marked broken.
struct PooledDriver<'a> {
    pool: &'a BrowserPool,
    driver: Option<WebDriver>,
    broken: bool,
    _slot: SemaphorePermit<'a>,
}

impl PooledDriver<'_> {
    fn driver(&self) -> Result<&WebDriver, ScrapeError> {
        self.driver
            .as_ref()
            .ok_or_else(|| ScrapeError::Browser("session already released".to_string()))
    }
}

impl Drop for PooledDriver<'_> {
    fn drop(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };

        if !self.broken {
            self.pool.lock_idle().push(driver);
            return;
        }

        debug!("Discarding broken browser session");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = driver.quit().await;
            });
        }
    }
}

impl BrowserPool {
    pub fn new(settings: BrowserSettings, limiter: Arc<RateLimiter>) -> Self {
        let slots = Semaphore::new(settings.contexts);
        Self {
            settings,
            idle: Mutex::new(Vec::new()),
            slots,
            limiter,
        }
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<WebDriver>> {
        match self.idle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn open_session(&self) -> Result<WebDriver> {
        let mut caps = DesiredCapabilities::chrome();
        if self.settings.headless {
            caps.add_chrome_arg("--headless=new")?;
        }
        caps.add_chrome_arg("--no-sandbox")?;
        caps.add_chrome_arg("--disable-dev-shm-usage")?;
        caps.add_chrome_arg("--disable-gpu")?;
        caps.add_chrome_arg("--window-size=1920,1080")?;
        caps.add_chrome_arg("--disable-blink-features=AutomationControlled")?;
        caps.add_chrome_arg("--blink-settings=imagesEnabled=false")?;
        caps.add_chrome_arg(&format!("--user-agent={}", random_user_agent()))?;
        if let Some(proxy) = &self.settings.proxy_arg {
            caps.add_chrome_arg(proxy)?;
        }
        caps.add("pageLoadStrategy", "eager")?;

        let driver = WebDriver::new(&self.settings.webdriver_url, caps)
            .await
            .with_context(|| format!("Failed to open WebDriver session at {}", self.settings.webdriver_url))?;

        driver.set_page_load_timeout(self.settings.page_timeout).await?;
        driver.set_script_timeout(self.settings.page_timeout).await?;

        let dev_tools = ChromeDevTools::new(driver.handle.clone());
        let blocked = async {
            dev_tools.execute_cdp("Network.enable").await?;
            dev_tools
                .execute_cdp_with_params("Network.setBlockedURLs", json!({ "urls": BLOCKED_RESOURCES }))
                .await
        };
        if let Err(e) = blocked.await {
            warn!("Resource blocking unavailable for this session: {}", e);
        }

        info!("Opened browser session");
        Ok(driver)
    }

    async fn checkout(&self) -> Result<PooledDriver<'_>, ScrapeError> {
        let slot = self
            .slots
            .acquire()
            .await
            .map_err(|e| ScrapeError::Browser(e.to_string()))?;

        let reused = self.lock_idle().pop();
        let driver = match reused {
            Some(driver) => driver,
            None => self
                .open_session()
                .await
                .map_err(|e| ScrapeError::Browser(format!("{:#}", e)))?,
        };

        Ok(PooledDriver {
            pool: self,
            driver: Some(driver),
            broken: false,
            _slot: slot,
        })
    }

    /// Opens one session and closes it again.
    pub async fn probe(&self) -> Result<()> {
        let driver = self.open_session().await?;
        driver.quit().await.context("Failed to close probe session")?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        let drivers: Vec<WebDriver> = self.lock_idle().drain(..).collect();
        let count = drivers.len();
        for driver in drivers {
            let _ = driver.quit().await;
        }
        if count > 0 {
            info!("Closed {} browser session(s)", count);
        }
    }
}

#[async_trait]
impl PageSource for BrowserPool {
    async fn fetch_page(&self, url: &str, timeout: Duration) -> Result<String, ScrapeError> {
        self.limiter.acquire().await;

        let mut session = self.checkout().await?;

        // A load cut short leaves the session mid-navigation; only a finished one is reused.
        session.broken = true;
        let loaded = {
            let driver = session.driver()?;
            let navigate = async {
                driver.goto(url).await?;
                driver.source().await
            };
            tokio::time::timeout(timeout, navigate).await
        };

        match loaded {
            Ok(Ok(html)) => {
                session.broken = false;
                Ok(html)
            }
            Ok(Err(e)) if e.to_string().to_lowercase().contains("timeout") => {
                session.broken = false;
                Err(ScrapeError::Timeout(timeout))
            }
            Ok(Err(e)) => Err(ScrapeError::Navigation(e.to_string())),
            Err(_) => Err(ScrapeError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn unreachable_pool(limiter: Arc<RateLimiter>) -> BrowserPool {
        BrowserPool::new(
            BrowserSettings {
                webdriver_url: "http://127.0.0.1:9".to_string(),
                headless: true,
                page_timeout: Duration::from_secs(5),
                contexts: 1,
                proxy_arg: None,
            },
            limiter,
        )
    }

    #[tokio::test]
    async fn test_waiting_for_a_token_is_not_a_timeout() {
        let limiter = Arc::new(RateLimiter::new(1, 1));
        assert!(limiter.try_acquire());
        let pool = unreachable_pool(Arc::clone(&limiter));

        let start = Instant::now();
        let result = pool
            .fetch_page("https://cnpj.biz/07134405000161", Duration::from_millis(200))
            .await;

        assert!(start.elapsed() >= Duration::from_millis(700));
        assert!(matches!(result, Err(ScrapeError::Browser(_))), "{:?}", result);
        assert_eq!(limiter.granted(), 2);
    }

    #[tokio::test]
    async fn test_failed_session_open_releases_slot() {
        let pool = unreachable_pool(Arc::new(RateLimiter::new(100, 100)));
        for _ in 0..2 {
            let result = pool.fetch_page("https://cnpj.biz/1", Duration::from_secs(1)).await;
            assert!(matches!(result, Err(ScrapeError::Browser(_))));
        }
        assert!(pool.lock_idle().is_empty());
    }
}
