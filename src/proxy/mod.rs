use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EnricherConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyState {
    Checking,
    Connected,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxyHealth {
    pub state: ProxyState,
    pub last_checked: Option<DateTime<Utc>>,
    pub egress_ip: Option<String>,
    pub detail: Option<String>,
}

impl ProxyHealth {
    fn checking() -> Self {
        Self {
            state: ProxyState::Checking,
            last_checked: None,
            egress_ip: None,
            detail: None,
        }
    }
}

/// Single egress proxy shared by the HTTP clients and the browser sessions.
///
/// Health is advisory: nothing consults it before sending a request.
pub struct ProxyManager {
    url: Option<String>,
    check_url: String,
    interval: Duration,
    timeout: Duration,
    health: RwLock<ProxyHealth>,
}

impl ProxyManager {
    pub fn new(url: Option<String>, check_url: String, interval: Duration, timeout: Duration) -> Self {
        Self {
            url,
            check_url,
            interval,
            timeout,
            health: RwLock::new(ProxyHealth::checking()),
        }
    }

    pub fn from_config(config: &EnricherConfig) -> Self {
        Self::new(
            config.proxy_url.clone(),
            config.proxy_check_url.clone(),
            config.proxy_check_interval,
            config.request_timeout,
        )
    }

    /// A manager that routes nothing through a proxy.
    pub fn direct() -> Self {
        Self::new(
            None,
            String::new(),
            Duration::from_secs(60),
            Duration::from_secs(10),
        )
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn health(&self) -> ProxyHealth {
        match self.health.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_health(&self, health: ProxyHealth) {
        match self.health.write() {
            Ok(mut guard) => *guard = health,
            Err(poisoned) => *poisoned.into_inner() = health,
        }
    }

    /// Routes every request of `builder` through the proxy, if one is configured.
    pub fn apply(&self, builder: reqwest::ClientBuilder) -> Result<reqwest::ClientBuilder> {
        match &self.url {
            Some(url) => {
                let proxy = reqwest::Proxy::all(url.as_str())
                    .with_context(|| "PROXY_URL is not a valid proxy URL".to_string())?;
                Ok(builder.proxy(proxy))
            }
            None => Ok(builder),
        }
    }

    /// Chrome switch routing browser traffic through the proxy.
    pub fn chrome_arg(&self) -> Option<String> {
        self.url
            .as_ref()
            .map(|url| format!("--proxy-server={}", url))
    }

    /// Performs one reachability check and stores the result.
    pub async fn check_now(&self) -> ProxyHealth {
        let health = match &self.url {
            None => ProxyHealth {
                state: ProxyState::Connected,
                last_checked: Some(Utc::now()),
                egress_ip: None,
                detail: Some("No proxy configured".to_string()),
            },
            Some(_) => match self.probe().await {
                Ok(ip) => ProxyHealth {
                    state: ProxyState::Connected,
                    last_checked: Some(Utc::now()),
                    egress_ip: Some(ip),
                    detail: None,
                },
                Err(e) => ProxyHealth {
                    state: ProxyState::Error,
                    last_checked: Some(Utc::now()),
                    egress_ip: None,
                    detail: Some(format!("{:#}", e)),
                },
            },
        };

        match health.state {
            ProxyState::Connected => debug!("Proxy check ok: {:?}", health.egress_ip),
            _ => warn!("Proxy check failed: {:?}", health.detail),
        }

        self.set_health(health.clone());
        health
    }

    async fn probe(&self) -> Result<String> {
        let client = self
            .apply(reqwest::Client::builder().timeout(self.timeout))?
            .build()
            .context("Unable to construct proxy check client")?;

        let response = client
            .get(&self.check_url)
            .send()
            .await
            .context("Proxy check request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP {}", response.status());
        }

        let body = response.text().await.context("Failed to read proxy check body")?;
        Ok(body.trim().to_string())
    }

    /// Re-checks health every interval until `cancel` fires.
    ///
    /// Returns `None` without spawning when no proxy is configured.
    pub fn spawn_monitor(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        self.url.as_ref()?;

        let manager = Arc::clone(self);
        Some(tokio::spawn(async move {
            info!("Starting proxy health monitor (every {:?})", manager.interval);
            let mut ticker = tokio::time::interval(manager.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.check_now().await;
                    }
                }
            }
            debug!("Proxy health monitor stopped");
        }))
    }
}
