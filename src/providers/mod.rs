pub mod mapping;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cnpj::Cnpj;
use crate::config::EnricherConfig;
use crate::rate_limit::RateLimiter;

/// Company facts returned by one provider for one identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompanyData {
    pub name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub legal_nature: Option<String>,
    pub registration_status: Option<String>,
    pub size: Option<String>,
    pub mei: Option<bool>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl CompanyData {
    /// Name plus at least one of nature, status or size.
    pub fn has_basic_data(&self) -> bool {
        self.name.is_some()
            && (self.legal_nature.is_some()
                || self.registration_status.is_some()
                || self.size.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.legal_nature.is_none()
            && self.registration_status.is_none()
            && self.size.is_none()
            && self.mei.is_none()
            && self.phone.is_none()
            && self.email.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResult {
    Found(CompanyData),
    /// The provider answered but knows nothing useful about the identifier.
    NoData,
    /// Transport error, timeout, throttling or an unreadable body.
    Failed(String),
}

#[async_trait]
pub trait CompanyProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, cnpj: &Cnpj) -> ProviderResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Cnpja,
    BrasilApi,
    ReceitaWs,
    CnpjWs,
    MinhaReceita,
}

impl ProviderKind {
    /// Chain priority order.
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Cnpja,
        ProviderKind::BrasilApi,
        ProviderKind::ReceitaWs,
        ProviderKind::CnpjWs,
        ProviderKind::MinhaReceita,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::Cnpja => "CNPJá",
            ProviderKind::BrasilApi => "BrasilAPI",
            ProviderKind::ReceitaWs => "ReceitaWS",
            ProviderKind::CnpjWs => "CNPJ.ws",
            ProviderKind::MinhaReceita => "Minha Receita",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::Cnpja => "https://open.cnpja.com",
            ProviderKind::BrasilApi => "https://brasilapi.com.br",
            ProviderKind::ReceitaWs => "https://receitaws.com.br",
            ProviderKind::CnpjWs => "https://publica.cnpj.ws",
            ProviderKind::MinhaReceita => "https://minhareceita.org",
        }
    }

    fn path(self, cnpj: &Cnpj) -> String {
        let id = urlencoding::encode(cnpj.as_str());
        match self {
            ProviderKind::Cnpja => format!("/office/{}", id),
            ProviderKind::BrasilApi => format!("/api/cnpj/v1/{}", id),
            ProviderKind::ReceitaWs => format!("/v1/cnpj/{}", id),
            ProviderKind::CnpjWs => format!("/cnpj/{}", id),
            ProviderKind::MinhaReceita => format!("/{}", id),
        }
    }

    fn parse(self, payload: &Value) -> CompanyData {
        match self {
            ProviderKind::Cnpja => mapping::cnpja(payload),
            ProviderKind::BrasilApi | ProviderKind::MinhaReceita => mapping::brasil_api(payload),
            ProviderKind::ReceitaWs => mapping::receita_ws(payload),
            ProviderKind::CnpjWs => mapping::cnpj_ws(payload),
        }
    }

    fn enabled(self, config: &EnricherConfig) -> bool {
        let toggles = &config.providers;
        match self {
            ProviderKind::Cnpja => toggles.cnpja,
            ProviderKind::BrasilApi => toggles.brasil_api,
            ProviderKind::ReceitaWs => toggles.receita_ws,
            ProviderKind::CnpjWs => toggles.cnpj_ws,
            ProviderKind::MinhaReceita => toggles.minha_receita,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Definitive provider answers keyed by provider and identifier.
pub type ResponseCache = Cache<(ProviderKind, Cnpj), ProviderResult>;

pub fn response_cache(ttl: Duration, max_entries: u64) -> ResponseCache {
    Cache::builder()
        .time_to_live(ttl)
        .max_capacity(max_entries)
        .build()
}

/// JSON-over-HTTP provider. Takes one rate limiter token per request.
///
/// With a cache attached, `Found` and `NoData` answers are served from it until
/// they expire; failures always go back to the network.
#[derive(Clone)]
pub struct HttpProvider {
    kind: ProviderKind,
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    cache: Option<ResponseCache>,
}

impl HttpProvider {
    pub fn new(kind: ProviderKind, http: reqwest::Client, limiter: Arc<RateLimiter>) -> Self {
        Self::with_base_url(kind, http, limiter, kind.default_base_url())
    }

    pub fn with_base_url(
        kind: ProviderKind,
        http: reqwest::Client,
        limiter: Arc<RateLimiter>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn request(&self, cnpj: &Cnpj) -> ProviderResult {
        let url = format!("{}{}", self.base_url, self.kind.path(cnpj));

        self.limiter.acquire().await;
        debug!("[{}] GET {}", self.kind, url);

        let resp = match self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                return ProviderResult::Failed(format!("{}: request timed out", self.kind))
            }
            Err(e) => return ProviderResult::Failed(format!("{}: {}", self.kind, e)),
        };

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return ProviderResult::NoData;
        }
        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            return ProviderResult::Failed(format!("{}: HTTP {}", self.kind, status));
        }
        if !status.is_success() {
            debug!("[{}] {} answered {} for {}", self.kind, url, status, cnpj);
            return ProviderResult::NoData;
        }

        let payload: Value = match resp.json().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("[{}] Unreadable body for {}: {}", self.kind, cnpj, e);
                return ProviderResult::Failed(format!("{}: malformed response", self.kind));
            }
        };

        let data = self.kind.parse(&payload);
        if data.is_empty() {
            ProviderResult::NoData
        } else {
            ProviderResult::Found(data)
        }
    }
}

#[async_trait]
impl CompanyProvider for HttpProvider {
    fn name(&self) -> &str {
        self.kind.name()
    }

    async fn fetch(&self, cnpj: &Cnpj) -> ProviderResult {
        let Some(cache) = &self.cache else {
            return self.request(cnpj).await;
        };

        let key = (self.kind, cnpj.clone());
        if let Some(cached) = cache.get(&key).await {
            debug!("[{}] Cached answer for {}", self.kind, cnpj);
            return cached;
        }

        let result = self.request(cnpj).await;
        if !matches!(result, ProviderResult::Failed(_)) {
            cache.insert(key, result.clone()).await;
        }
        result
    }
}

/// Enabled providers in priority order.
pub fn build_chain(
    config: &EnricherConfig,
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
) -> Vec<Arc<dyn CompanyProvider>> {
    let cache = (!config.cache_ttl.is_zero())
        .then(|| response_cache(config.cache_ttl, config.cache_max_entries));

    ProviderKind::ALL
        .iter()
        .copied()
        .filter(|kind| kind.enabled(config))
        .map(|kind| {
            let provider = HttpProvider::new(kind, http.clone(), Arc::clone(&limiter));
            let provider = match &cache {
                Some(cache) => provider.with_cache(cache.clone()),
                None => provider,
            };
            Arc::new(provider) as Arc<dyn CompanyProvider>
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_has_basic_data() {
        let mut data = CompanyData {
            name: Some("ACME".into()),
            ..Default::default()
        };
        assert!(!data.has_basic_data());
        data.size = Some("ME".into());
        assert!(data.has_basic_data());
        assert!(!CompanyData::default().has_basic_data());
        assert!(CompanyData::default().is_empty());
    }

    #[test]
    fn test_paths() {
        let cnpj = crate::cnpj::validate("00000000000191").unwrap();
        assert_eq!(ProviderKind::Cnpja.path(&cnpj), "/office/00000000000191");
        assert_eq!(ProviderKind::BrasilApi.path(&cnpj), "/api/cnpj/v1/00000000000191");
        assert_eq!(ProviderKind::MinhaReceita.path(&cnpj), "/00000000000191");
    }

    #[test]
    fn test_build_chain_keeps_priority_order() {
        let env: HashMap<&str, &str> = [
            ("CNPJA_ENABLED", "true"),
            ("MINHA_RECEITA_ENABLED", "true"),
            ("CNPJ_WS_ENABLED", "true"),
        ]
        .into_iter()
        .collect();
        let config =
            EnricherConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        let chain = build_chain(
            &config,
            reqwest::Client::new(),
            Arc::new(RateLimiter::new(10, 10)),
        );
        let names: Vec<&str> = chain.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["CNPJá", "CNPJ.ws", "Minha Receita"]);
    }
}
