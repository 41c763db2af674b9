//! Yahoo client behaviour against a mocked quote service

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{fast_config, temp_store};
use ticker_revalidator::api::{QuoteProvider, YahooClient};
use ticker_revalidator::error::LookupError;
use ticker_revalidator::models::Config;
use ticker_revalidator::RevalidationEngine;

fn client_for(server: &MockServer) -> YahooClient {
    let config = Config {
        quote_base_url: server.uri(),
        primary_timeout: Duration::from_millis(300),
        deep_timeout: Duration::from_millis(300),
        ..Config::default()
    };
    YahooClient::new(&config).expect("Failed to build client")
}

fn chart_body(symbol: &str, price: f64, exchange: &str) -> serde_json::Value {
    json!({
        "chart": {
            "result": [{
                "meta": {
                    "symbol": symbol,
                    "regularMarketPrice": price,
                    "exchangeName": exchange,
                    "currency": "USD"
                }
            }],
            "error": null
        }
    })
}

async fn mount_primary(server: &MockServer, symbol: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/v8/finance/chart/{}", symbol)))
        .and(query_param("range", "1d"))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn mount_history(server: &MockServer, symbol: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/v8/finance/chart/{}", symbol)))
        .and(query_param("range", "1mo"))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn mount_quote(server: &MockServer, symbol: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/v7/finance/quote"))
        .and(query_param("symbols", symbol))
        .respond_with(response)
        .mount(server)
        .await;
}

#[test_log::test(tokio::test)]
async fn test_primary_lookup_parses_chart_meta() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/AAPL"))
        .and(query_param("range", "1d"))
        .and(header_exists("user-agent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chart_body("AAPL", 190.12, "NMS")))
        .expect(1)
        .mount(&server)
        .await;

    let quote = client_for(&server).fetch_primary("AAPL").await.unwrap();

    assert_eq!(quote.symbol.as_deref(), Some("AAPL"));
    assert_eq!(quote.listing(), Some((190.12, "NMS")));
}

#[test_log::test(tokio::test)]
async fn test_primary_lookup_without_result_is_empty() {
    let server = MockServer::start().await;
    mount_primary(
        &server,
        "NOPE",
        ResponseTemplate::new(200).set_body_json(json!({"chart": {"result": [], "error": null}})),
    )
    .await;
    mount_primary(&server, "HTML", ResponseTemplate::new(200).set_body_string("<html>consent</html>")).await;

    let client = client_for(&server);
    let empty = client.fetch_primary("NOPE").await.unwrap();
    assert_eq!(empty.listing(), None);

    let html = client.fetch_primary("HTML").await.unwrap();
    assert_eq!(html.listing(), None);
}

#[test_log::test(tokio::test)]
async fn test_primary_errors_are_classified() {
    let server = MockServer::start().await;
    mount_primary(
        &server,
        "ZZZZQ",
        ResponseTemplate::new(404).set_body_json(json!({
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No fundamentals data found for symbol ZZZZQ"}
            }
        })),
    )
    .await;
    mount_primary(
        &server,
        "MAYBE",
        ResponseTemplate::new(404).set_body_json(json!({
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}
            }
        })),
    )
    .await;
    mount_primary(&server, "BUSY", ResponseTemplate::new(429).set_body_string("Too Many Requests")).await;
    mount_primary(
        &server,
        "OLDIE",
        ResponseTemplate::new(200).set_body_json(json!({
            "chart": {
                "result": null,
                "error": {"code": "Bad Request", "description": "Only 100 years worth of day granularity data are allowed to be fetched per request."}
            }
        })),
    )
    .await;

    let client = client_for(&server);

    let gone = client.fetch_primary("ZZZZQ").await.unwrap_err();
    assert_matches!(gone, LookupError::Delisted(_));
    assert!(gone.message().contains("No fundamentals data found for symbol ZZZZQ"));

    assert_matches!(client.fetch_primary("MAYBE").await, Err(LookupError::Transient(_)));

    let busy = client.fetch_primary("BUSY").await.unwrap_err();
    assert_matches!(busy, LookupError::Transient(_));
    assert!(busy.message().starts_with("HTTP 429"));

    assert_matches!(client.fetch_primary("OLDIE").await, Err(LookupError::Delisted(_)));
}

#[test_log::test(tokio::test)]
async fn test_primary_timeout_is_transient() {
    let server = MockServer::start().await;
    mount_primary(
        &server,
        "SLOW",
        ResponseTemplate::new(200)
            .set_body_json(chart_body("SLOW", 1.0, "NMS"))
            .set_delay(Duration::from_secs(2)),
    )
    .await;

    let result = client_for(&server).fetch_primary("SLOW").await;
    assert_matches!(result, Err(LookupError::Transient(_)));
}

#[test_log::test(tokio::test)]
async fn test_deep_lookup_returns_both_payloads() {
    let server = MockServer::start().await;
    mount_history(&server, "AAPL", ResponseTemplate::new(200).set_body_json(chart_body("AAPL", 190.12, "NMS"))).await;
    mount_quote(
        &server,
        "AAPL",
        ResponseTemplate::new(200).set_body_json(json!({"quoteResponse": {"result": [{"symbol": "AAPL"}], "error": null}})),
    )
    .await;

    let probe = client_for(&server).fetch_deep("AAPL").await.unwrap();

    assert_eq!(probe.payloads.len(), 2);
    assert_eq!(probe.requests(), 2);
    assert!(probe.payloads[0].contains("regularMarketPrice"));
    assert!(probe.payloads[1].contains("quoteResponse"));
}

#[test_log::test(tokio::test)]
async fn test_deep_lookup_failures() {
    let server = MockServer::start().await;
    mount_history(&server, "CRUMB", ResponseTemplate::new(200).set_body_json(chart_body("CRUMB", 2.0, "NMS"))).await;
    mount_quote(
        &server,
        "CRUMB",
        ResponseTemplate::new(401).set_body_json(json!({
            "finance": {"result": null, "error": {"code": "Unauthorized", "description": "Invalid Crumb"}}
        })),
    )
    .await;
    mount_history(
        &server,
        "DEAD",
        ResponseTemplate::new(404).set_body_json(json!({
            "chart": {"result": null, "error": {"code": "Not Found", "description": "Symbol not found"}}
        })),
    )
    .await;

    let client = client_for(&server);

    // History succeeded, the quote lookup was refused
    let crumb = client.fetch_deep("CRUMB").await.unwrap_err();
    assert_matches!(crumb.error, LookupError::Transient(_));
    assert_eq!(crumb.requests, 2);

    // History failed, so the quote lookup never went out
    let dead = client.fetch_deep("DEAD").await.unwrap_err();
    assert_matches!(dead.error, LookupError::Delisted(_));
    assert_eq!(dead.requests, 1);
    let quote_calls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.url.path() == "/v7/finance/quote")
        .count();
    assert_eq!(quote_calls, 1);
}

#[test_log::test(tokio::test)]
async fn test_engine_against_mock_service() {
    let server = MockServer::start().await;
    mount_primary(&server, "AAPL", ResponseTemplate::new(200).set_body_json(chart_body("AAPL", 190.12, "NMS"))).await;
    mount_history(&server, "AAPL", ResponseTemplate::new(200).set_body_json(chart_body("AAPL", 190.12, "NMS"))).await;
    mount_quote(
        &server,
        "AAPL",
        ResponseTemplate::new(200).set_body_json(json!({"quoteResponse": {"result": [], "error": null}})),
    )
    .await;
    mount_primary(&server, "OLDCO", ResponseTemplate::new(200).set_body_json(chart_body("OLDCO", 0.02, "PNK"))).await;
    mount_history(
        &server,
        "OLDCO",
        ResponseTemplate::new(200).set_body_json(json!({
            "chart": {"result": null, "error": {"code": "Bad Request", "description": "OLDCO: 1d data not available for startTime=1 and endTime=2"}}
        })),
    )
    .await;
    mount_quote(
        &server,
        "OLDCO",
        ResponseTemplate::new(200).set_body_json(json!({"quoteResponse": {"result": [], "error": null}})),
    )
    .await;
    mount_primary(
        &server,
        "ZZZZQ",
        ResponseTemplate::new(404).set_body_json(json!({
            "chart": {"result": null, "error": {"code": "Not Found", "description": "No fundamentals data found for symbol ZZZZQ"}}
        })),
    )
    .await;
    // TEMPERR has no mock: wiremock answers 404 without a body

    let (_dir, store) = temp_store(&["AAPL", "OLDCO", "TEMPERR", "ZZZZQ"]).await;
    let store = Arc::new(store);
    let config = Config {
        quote_base_url: server.uri(),
        ..fast_config(500, 10)
    };
    let client = Arc::new(YahooClient::new(&config).unwrap());

    let mut engine = RevalidationEngine::new(Arc::clone(&store), client, &config);
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.total_processed, 4);
    assert_eq!(summary.newly_active, 1);
    assert_eq!(summary.delisted, 2);

    let expected = [
        ("AAPL", Some(true), "NMS"),
        ("OLDCO", Some(false), "DELISTED"),
        ("TEMPERR", Some(false), "ERROR"),
        ("ZZZZQ", Some(false), "DELISTED"),
    ];
    for (symbol, active, exchange) in expected {
        let record = store.get_ticker(symbol).await.unwrap().unwrap();
        assert_eq!(record.active, active, "{}", symbol);
        assert_eq!(record.exchange.as_deref(), Some(exchange), "{}", symbol);
    }
}
