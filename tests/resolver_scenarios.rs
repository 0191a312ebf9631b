use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cnpj_enricher::cnpj::{self, Cnpj};
use cnpj_enricher::providers::{CompanyData, CompanyProvider, ProviderResult};
use cnpj_enricher::resolver::{EnrichmentResolver, Field, FieldSource, RecordStatus};
use cnpj_enricher::scrape::{PageSource, ScrapeEngine, ScrapeError};

struct ScriptedProvider {
    name: &'static str,
    result: ProviderResult,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(name: &'static str, result: ProviderResult) -> Arc<Self> {
        Arc::new(Self {
            name,
            result,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompanyProvider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(&self, _cnpj: &Cnpj) -> ProviderResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Serves canned HTML per URL; unknown URLs render an empty page.
struct CannedPages {
    pages: HashMap<String, String>,
    visits: AtomicUsize,
}

impl CannedPages {
    fn new(pages: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            pages: pages
                .iter()
                .map(|(url, html)| (url.to_string(), html.to_string()))
                .collect(),
            visits: AtomicUsize::new(0),
        })
    }

    fn visits(&self) -> usize {
        self.visits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for CannedPages {
    async fn fetch_page(&self, url: &str, _timeout: Duration) -> Result<String, ScrapeError> {
        self.visits.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .pages
            .get(url)
            .cloned()
            .unwrap_or_else(|| "<html><body></body></html>".to_string()))
    }
}

struct BrokenPages;

#[async_trait]
impl PageSource for BrokenPages {
    async fn fetch_page(&self, _url: &str, _timeout: Duration) -> Result<String, ScrapeError> {
        Err(ScrapeError::Navigation("net::ERR_PROXY_CONNECTION_FAILED".to_string()))
    }
}

fn chain(providers: &[&Arc<ScriptedProvider>]) -> Vec<Arc<dyn CompanyProvider>> {
    providers
        .iter()
        .map(|p| Arc::clone(p) as Arc<dyn CompanyProvider>)
        .collect()
}

fn target() -> Cnpj {
    cnpj::validate("07134405000161").unwrap()
}

fn engine(pages: Arc<dyn PageSource>) -> Arc<ScrapeEngine> {
    Arc::new(ScrapeEngine::new(pages, Duration::from_secs(5)))
}

fn full_company(name: &str) -> CompanyData {
    CompanyData {
        name: Some(name.to_string()),
        city: Some("São Paulo".to_string()),
        state: Some("SP".to_string()),
        registration_status: Some("ATIVA desde 2010-01-01".to_string()),
        phone: Some("1133334444".to_string()),
        email: Some("contato@empresa.com.br".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_phone_from_second_site_without_email_is_partial() {
    let pages = CannedPages::new(&[
        (
            "https://cnpj.biz/07134405000161",
            "<h1>CNPJ 07.134.405/0001-61</h1><p>Telefone não informado</p>",
        ),
        (
            "https://www.consultacnpj.com/cnpj07134405000161",
            "<div>Contato: (11) 3456-7890</div>",
        ),
    ]);
    let resolver = EnrichmentResolver::new(Vec::new(), Some(engine(pages.clone())));

    let resolution = resolver.resolve(target()).await;
    let record = resolution.record;

    assert_eq!(record.status(), RecordStatus::Partial);
    assert_eq!(record.phone(), Some("(11) 3456-7890"));
    assert_eq!(
        record.source_of(Field::Phone),
        Some(&FieldSource::site(2, "consultacnpj.com"))
    );
    assert_eq!(record.email(), None);
    // Two visits for the phone, three for the email.
    assert_eq!(pages.visits(), 5);
    assert_eq!(resolution.failures, 0);
}

#[tokio::test]
async fn test_complete_first_provider_short_circuits() {
    let first = ScriptedProvider::new("CNPJá", ProviderResult::Found(full_company("ACME LTDA")));
    let second = ScriptedProvider::new("BrasilAPI", ProviderResult::Found(full_company("OUTRA")));
    let pages = CannedPages::new(&[]);

    let resolver = EnrichmentResolver::new(
        chain(&[&first, &second]),
        Some(engine(pages.clone())),
    );
    let resolution = resolver.resolve(target()).await;

    assert_eq!(resolution.record.status(), RecordStatus::Complete);
    assert_eq!(resolution.record.company_name(), Some("ACME LTDA"));
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 0);
    assert_eq!(pages.visits(), 0);
}

#[tokio::test]
async fn test_later_provider_only_fills_gaps() {
    let first = ScriptedProvider::new(
        "CNPJá",
        ProviderResult::Found(CompanyData {
            name: Some("ACME LTDA".to_string()),
            size: Some("Microempresa".to_string()),
            phone: Some("1133334444".to_string()),
            ..Default::default()
        }),
    );
    let second = ScriptedProvider::new(
        "CNPJ.ws",
        ProviderResult::Found(CompanyData {
            name: Some("ACME COMERCIO".to_string()),
            phone: Some("2122223333".to_string()),
            email: Some("vendas@acme.com.br".to_string()),
            ..Default::default()
        }),
    );

    let resolver = EnrichmentResolver::new(chain(&[&first, &second]), None);
    let record = resolver.resolve(target()).await.record;

    assert_eq!(record.status(), RecordStatus::Complete);
    assert_eq!(record.company_name(), Some("ACME LTDA"));
    assert_eq!(record.phone(), Some("1133334444"));
    assert_eq!(record.email(), Some("vendas@acme.com.br"));
    assert_eq!(record.source_of(Field::Phone), Some(&FieldSource::provider("CNPJá")));
    assert_eq!(record.source_of(Field::Email), Some(&FieldSource::provider("CNPJ.ws")));
}

#[tokio::test]
async fn test_scraper_does_not_replace_provider_phone() {
    let provider = ScriptedProvider::new(
        "BrasilAPI",
        ProviderResult::Found(CompanyData {
            name: Some("ACME LTDA".to_string()),
            size: Some("ME".to_string()),
            phone: Some("1133334444".to_string()),
            ..Default::default()
        }),
    );
    let pages = CannedPages::new(&[(
        "https://cnpj.biz/07134405000161",
        "<p>(21) 98888-7777</p><p>financeiro@acme.com.br</p>",
    )]);

    let resolver = EnrichmentResolver::new(chain(&[&provider]), Some(engine(pages.clone())));
    let record = resolver.resolve(target()).await.record;

    assert_eq!(record.phone(), Some("1133334444"));
    assert_eq!(record.email(), Some("financeiro@acme.com.br"));
    assert_eq!(record.source_of(Field::Email), Some(&FieldSource::site(1, "cnpj.biz")));
    // Only the email pass ran.
    assert_eq!(pages.visits(), 1);
}

#[tokio::test]
async fn test_every_call_failing_is_error() {
    let provider = ScriptedProvider::new("BrasilAPI", ProviderResult::Failed("HTTP 503".to_string()));
    let resolver = EnrichmentResolver::new(chain(&[&provider]), Some(engine(Arc::new(BrokenPages))));

    let resolution = resolver.resolve(target()).await;
    assert_eq!(resolution.record.status(), RecordStatus::Error);
    assert_eq!(resolution.calls, 7);
    assert_eq!(resolution.failures, 7);
    assert!(resolution.last_failure.is_some());
}

#[tokio::test]
async fn test_nothing_found_without_failures_is_partial() {
    let provider = ScriptedProvider::new("CNPJ.ws", ProviderResult::NoData);
    let resolver = EnrichmentResolver::new(chain(&[&provider]), None);

    let resolution = resolver.resolve(target()).await;
    assert_eq!(resolution.record.status(), RecordStatus::Partial);
    assert_eq!(resolution.failures, 0);
}

#[tokio::test]
async fn test_resolve_into_keeps_earlier_fields() {
    let first_pass = EnrichmentResolver::new(
        chain(&[&ScriptedProvider::new(
            "CNPJá",
            ProviderResult::Found(CompanyData {
                name: Some("ACME LTDA".to_string()),
                phone: Some("1133334444".to_string()),
                ..Default::default()
            }),
        )]),
        None,
    );
    let record = first_pass.resolve(target()).await.record;
    assert_eq!(record.attempts(), 1);

    let second_pass = EnrichmentResolver::new(
        chain(&[&ScriptedProvider::new(
            "BrasilAPI",
            ProviderResult::Found(CompanyData {
                name: Some("OUTRO NOME".to_string()),
                email: Some("contato@acme.com.br".to_string()),
                ..Default::default()
            }),
        )]),
        None,
    );
    let record = second_pass.resolve_into(record).await.record;

    assert_eq!(record.attempts(), 2);
    assert_eq!(record.company_name(), Some("ACME LTDA"));
    assert_eq!(record.email(), Some("contato@acme.com.br"));
    assert_eq!(record.status(), RecordStatus::Complete);
}
