pub mod batch;
pub mod cnpj;
pub mod config;
pub mod http;
pub mod phone;
pub mod providers;
pub mod proxy;
pub mod rate_limit;
pub mod resolver;
pub mod scrape;
pub mod store;
