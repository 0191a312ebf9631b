pub mod browser;
pub mod extract;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cnpj::Cnpj;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("page did not load within {0:?}")]
    Timeout(Duration),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("browser session unavailable: {0}")]
    Browser(String),
}

/// Anything that can render a URL and hand back its HTML.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// `timeout` bounds the page load itself. Waiting for a rate limit token or
    /// a free browser session happens before the clock starts.
    async fn fetch_page(&self, url: &str, timeout: Duration) -> Result<String, ScrapeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactField {
    Phone,
    Email,
}

impl fmt::Display for ContactField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContactField::Phone => f.write_str("phone"),
            ContactField::Email => f.write_str("email"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupSite {
    pub name: String,
    url_template: String,
}

impl LookupSite {
    pub fn new(name: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url_template: url_template.into(),
        }
    }

    /// Lookup sites in visiting order.
    pub fn defaults() -> Vec<LookupSite> {
        vec![
            LookupSite::new("cnpj.biz", "https://cnpj.biz/{cnpj}"),
            LookupSite::new("consultacnpj.com", "https://www.consultacnpj.com/cnpj{cnpj}"),
            LookupSite::new("empresacnpj.com", "https://empresacnpj.com/cnpj/{cnpj}"),
        ]
    }

    pub fn url_for(&self, cnpj: &Cnpj) -> String {
        self.url_template
            .replace("{cnpj}", &urlencoding::encode(cnpj.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteOutcome {
    Found(String),
    NoMatch,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SiteAttempt {
    /// 1-based position in the site order.
    pub position: usize,
    pub site: String,
    pub outcome: SiteOutcome,
}

#[derive(Debug, Clone)]
pub struct FieldScrape {
    pub field: ContactField,
    pub attempts: Vec<SiteAttempt>,
}

impl FieldScrape {
    /// The value and the attempt that produced it.
    pub fn hit(&self) -> Option<(&str, &SiteAttempt)> {
        self.attempts.iter().find_map(|a| match &a.outcome {
            SiteOutcome::Found(value) => Some((value.as_str(), a)),
            _ => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &str> {
        self.attempts.iter().filter_map(|a| match &a.outcome {
            SiteOutcome::Failed(reason) => Some(reason.as_str()),
            _ => None,
        })
    }
}

/// One row of the per-site diagnostics.
#[derive(Debug, Clone)]
pub struct SiteReport {
    pub position: usize,
    pub site: String,
    pub url: String,
    pub fetch: Result<usize, String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

pub struct ScrapeEngine {
    pages: Arc<dyn PageSource>,
    sites: Vec<LookupSite>,
    site_timeout: Duration,
}

impl ScrapeEngine {
    pub fn new(pages: Arc<dyn PageSource>, site_timeout: Duration) -> Self {
        Self::with_sites(pages, LookupSite::defaults(), site_timeout)
    }

    pub fn with_sites(pages: Arc<dyn PageSource>, sites: Vec<LookupSite>, site_timeout: Duration) -> Self {
        Self {
            pages,
            sites,
            site_timeout,
        }
    }

    pub fn sites(&self) -> &[LookupSite] {
        &self.sites
    }

    async fn load(&self, url: &str) -> Result<String, ScrapeError> {
        self.pages.fetch_page(url, self.site_timeout).await
    }

    /// Visits sites in order until one yields `field`.
    pub async fn scrape_field(&self, cnpj: &Cnpj, field: ContactField) -> FieldScrape {
        let mut attempts = Vec::new();

        for (index, site) in self.sites.iter().enumerate() {
            let position = index + 1;
            let url = site.url_for(cnpj);

            let outcome = match self.load(&url).await {
                Ok(html) => {
                    let text = extract::page_text(&html);
                    let found = match field {
                        ContactField::Phone => extract::extract_phone(&text, cnpj.as_str()),
                        ContactField::Email => extract::extract_email(&text, Some(site.name.as_str())),
                    };
                    match found {
                        Some(value) => SiteOutcome::Found(value),
                        None => SiteOutcome::NoMatch,
                    }
                }
                Err(e) => {
                    warn!("[{}] {} via site #{} ({}) failed: {}", cnpj, field, position, site.name, e);
                    SiteOutcome::Failed(format!("site #{} ({}): {}", position, site.name, e))
                }
            };

            let found = matches!(outcome, SiteOutcome::Found(_));
            if found {
                info!("[{}] {} found on site #{} ({})", cnpj, field, position, site.name);
            } else {
                debug!("[{}] no {} on site #{} ({})", cnpj, field, position, site.name);
            }

            attempts.push(SiteAttempt {
                position,
                site: site.name.clone(),
                outcome,
            });

            if found {
                break;
            }
        }

        FieldScrape { field, attempts }
    }

    /// Visits every site once and reports what each page yields.
    pub async fn diagnose(&self, cnpj: &Cnpj) -> Vec<SiteReport> {
        let mut reports = Vec::with_capacity(self.sites.len());

        for (index, site) in self.sites.iter().enumerate() {
            let url = site.url_for(cnpj);
            let report = match self.load(&url).await {
                Ok(html) => {
                    let text = extract::page_text(&html);
                    SiteReport {
                        position: index + 1,
                        site: site.name.clone(),
                        url,
                        fetch: Ok(html.len()),
                        phone: extract::extract_phone(&text, cnpj.as_str()),
                        email: extract::extract_email(&text, Some(site.name.as_str())),
                    }
                }
                Err(e) => SiteReport {
                    position: index + 1,
                    site: site.name.clone(),
                    url,
                    fetch: Err(e.to_string()),
                    phone: None,
                    email: None,
                },
            };
            reports.push(report);
        }

        reports
    }
}
