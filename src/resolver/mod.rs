pub mod record;

use std::sync::Arc;

use tracing::{debug, info, warn};

pub use record::{EnrichmentRecord, Field, FieldSource, RecordStatus};

use crate::cnpj::Cnpj;
use crate::providers::{CompanyProvider, ProviderResult};
use crate::scrape::{ContactField, ScrapeEngine, SiteOutcome};

/// Outcome of one resolution attempt.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub record: EnrichmentRecord,
    /// Provider calls and site visits made during this attempt.
    pub calls: usize,
    /// Calls that failed at transport or infrastructure level.
    pub failures: usize,
    pub last_failure: Option<String>,
}

#[derive(Default)]
struct Tally {
    calls: usize,
    failures: usize,
    no_data: usize,
    last_failure: Option<String>,
}

impl Tally {
    fn fail(&mut self, reason: String) {
        self.calls += 1;
        self.failures += 1;
        self.last_failure = Some(reason);
    }
}

/// Runs the provider chain, then the scraper for whatever contact field is still missing.
pub struct EnrichmentResolver {
    providers: Vec<Arc<dyn CompanyProvider>>,
    scraper: Option<Arc<ScrapeEngine>>,
}

impl EnrichmentResolver {
    pub fn new(providers: Vec<Arc<dyn CompanyProvider>>, scraper: Option<Arc<ScrapeEngine>>) -> Self {
        Self { providers, scraper }
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn scraping_enabled(&self) -> bool {
        self.scraper.is_some()
    }

    pub async fn resolve(&self, cnpj: Cnpj) -> Resolution {
        self.resolve_into(EnrichmentRecord::new(cnpj)).await
    }

    /// Continues `record`, keeping every field it already holds.
    pub async fn resolve_into(&self, mut record: EnrichmentRecord) -> Resolution {
        record.begin_attempt();
        let cnpj = record.cnpj().clone();
        let mut tally = Tally::default();

        for provider in &self.providers {
            if !record.needs_provider_data() {
                debug!("[{}] Provider data sufficient, skipping {}", cnpj, provider.name());
                break;
            }

            match provider.fetch(&cnpj).await {
                ProviderResult::Found(data) => {
                    tally.calls += 1;
                    let filled = record.merge_company(&data, &FieldSource::provider(provider.name()));
                    debug!("[{}] {} filled {:?}", cnpj, provider.name(), filled);
                }
                ProviderResult::NoData => {
                    tally.calls += 1;
                    tally.no_data += 1;
                    debug!("[{}] {} has no data", cnpj, provider.name());
                }
                ProviderResult::Failed(reason) => {
                    warn!("[{}] {} failed: {}", cnpj, provider.name(), reason);
                    tally.fail(reason);
                }
            }
        }

        if let Some(scraper) = &self.scraper {
            for field in [ContactField::Phone, ContactField::Email] {
                let missing = match field {
                    ContactField::Phone => record.phone().is_none(),
                    ContactField::Email => record.email().is_none(),
                };
                if !missing {
                    continue;
                }

                let scrape = scraper.scrape_field(&cnpj, field).await;
                for attempt in &scrape.attempts {
                    match &attempt.outcome {
                        SiteOutcome::Failed(reason) => tally.fail(reason.clone()),
                        SiteOutcome::NoMatch => {
                            tally.calls += 1;
                            tally.no_data += 1;
                        }
                        SiteOutcome::Found(_) => tally.calls += 1,
                    }
                }

                if let Some((value, attempt)) = scrape.hit() {
                    let source = FieldSource::site(attempt.position, attempt.site.clone());
                    match field {
                        ContactField::Phone => record.fill_phone(value, source),
                        ContactField::Email => record.fill_email(value, source),
                    };
                }
            }
        }

        let status = if record.is_complete() {
            RecordStatus::Complete
        } else if record.has_any_data() {
            RecordStatus::Partial
        } else if tally.calls > 0 && tally.failures == tally.calls {
            RecordStatus::Error
        } else {
            RecordStatus::Partial
        };
        record.set_status(status);

        info!(
            "[{}] Attempt {} resolved as {} ({} calls, {} failed, {} without data)",
            cnpj,
            record.attempts(),
            status,
            tally.calls,
            tally.failures,
            tally.no_data
        );

        Resolution {
            record,
            calls: tally.calls,
            failures: tally.failures,
            last_failure: tally.last_failure,
        }
    }
}
