use std::sync::Arc;
use std::time::Duration;

use cnpj_enricher::proxy::{ProxyManager, ProxyState};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn through(proxy: &MockServer) -> ProxyManager {
    ProxyManager::new(
        Some(proxy.uri()),
        "http://egress.check.invalid/ip".to_string(),
        Duration::from_millis(50),
        Duration::from_secs(2),
    )
}

#[tokio::test]
async fn test_connected_reports_egress_ip() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("203.0.113.7\n"))
        .mount(&proxy)
        .await;

    let manager = through(&proxy);
    let health = manager.check_now().await;

    assert_eq!(health.state, ProxyState::Connected);
    assert_eq!(health.egress_ip.as_deref(), Some("203.0.113.7"));
    assert!(health.last_checked.is_some());
    assert_eq!(manager.health().state, ProxyState::Connected);
}

#[tokio::test]
async fn test_proxy_error_status_is_unhealthy() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(407))
        .mount(&proxy)
        .await;

    let health = through(&proxy).check_now().await;

    assert_eq!(health.state, ProxyState::Error);
    assert!(health.detail.unwrap_or_default().contains("407"));
}

#[tokio::test]
async fn test_unreachable_proxy_is_unhealthy() {
    let manager = ProxyManager::new(
        Some("http://127.0.0.1:9".to_string()),
        "http://egress.check.invalid/ip".to_string(),
        Duration::from_secs(60),
        Duration::from_secs(2),
    );

    let health = manager.check_now().await;

    assert_eq!(health.state, ProxyState::Error);
    assert!(health.egress_ip.is_none());
    assert!(health.detail.is_some());
}

#[tokio::test]
async fn test_monitor_refreshes_until_cancelled() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("198.51.100.20"))
        .mount(&proxy)
        .await;

    let manager = Arc::new(through(&proxy));
    assert_eq!(manager.health().state, ProxyState::Checking);

    let cancel = CancellationToken::new();
    let monitor = manager.spawn_monitor(cancel.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();
    monitor.await.unwrap();

    assert_eq!(manager.health().state, ProxyState::Connected);
    assert!(proxy.received_requests().await.unwrap().len() >= 2);
}
