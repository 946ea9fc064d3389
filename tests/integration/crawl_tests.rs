//! Integration tests for the engine
//!
//! These tests use wiremock to create mock HTTP servers and run whole
//! batches end-to-end, including history carried between runs.

use std::path::Path;
use sumi_spindle::config::{parse_config, Config};
use sumi_spindle::crawler::{configured_spiders, history_report, Engine};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a configuration with one link-following spider seeded at `base_url`
fn create_test_config(base_url: &str, work_dir: &Path) -> Config {
    let history_dir = work_dir.join("history");
    let output_dir = work_dir.join("output");
    parse_config(&format!(
        r#"
        [scheduler]
        thread-num = 4

        [history]
        output = "file"
        history-dir = "{}"

        [output]
        dir = "{}"
        docker-cap = 10

        [user-agent]
        crawler-name = "TestBot"
        crawler-version = "1.0.0"
        contact-url = "https://example.com/contact"

        [[spider]]
        name = "site"
        pause-time = 0
        follow-links = true
        seeds = ["{}/"]
        "#,
        history_dir.display(),
        output_dir.display(),
        base_url
    ))
    .expect("Failed to parse test config")
}

/// Mounts a home page linking to a good page, a flaky page and another host
async fn mount_site(mock_server: &MockServer, page2_failures: u64) {
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!(
                    r#"<html><head><title>Home</title></head><body>
                    <a href="{}/page1">Page 1</a>
                    <a href="/page2">Page 2</a>
                    <a href="https://elsewhere.example/">Elsewhere</a>
                    </body></html>"#,
                    base_url
                ))
                .insert_header("content-type", "text/html"),
        )
        .expect(1)
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><head><title>Page 1</title></head><body></body></html>")
                .insert_header("content-type", "text/html"),
        )
        .expect(1)
        .mount(mock_server)
        .await;

    if page2_failures > 0 {
        Mock::given(method("GET"))
            .and(path("/page2"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(page2_failures)
            .mount(mock_server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><head><title>Page 2</title></head><body></body></html>")
                .insert_header("content-type", "text/html"),
        )
        .mount(mock_server)
        .await;
}

fn count_records(config: &Config) -> usize {
    let path = Path::new(&config.output.dir).join("site.jsonl");
    std::fs::read_to_string(path)
        .map(|content| content.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_full_crawl_follows_same_host_links() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server, 0).await;

    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&mock_server.uri(), temp.path());

    let engine = Engine::new(&config).expect("Failed to create engine");
    let summaries = engine.run(configured_spiders(&config)).await;

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].spider, "site");
    assert_eq!(summaries[0].success, 3);
    assert_eq!(summaries[0].failure, 0);
    assert_eq!(summaries[0].pending, 0);
    assert_eq!(count_records(&config), 3);

    let content = std::fs::read_to_string(Path::new(&config.output.dir).join("site.jsonl")).unwrap();
    assert!(content.contains("\"title\":\"Home\""));
    assert!(!content.contains("elsewhere.example/\""));
}

#[tokio::test]
async fn test_failed_page_is_retried_once_then_recorded() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server, 2).await;

    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&mock_server.uri(), temp.path());

    let engine = Engine::new(&config).expect("Failed to create engine");
    let summaries = engine.run(configured_spiders(&config)).await;

    assert_eq!(summaries[0].success, 2);
    assert_eq!(summaries[0].failure, 1);

    let report = history_report(&config).expect("Failed to read history");
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].success, 2);
    assert_eq!(report[0].failure, 1);

    let page2_requests = mock_server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/page2")
        .count();
    assert_eq!(page2_requests, 2);
}

#[tokio::test]
async fn test_next_run_skips_successes_and_retries_failures() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server, 2).await;

    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&mock_server.uri(), temp.path());

    let first = Engine::new(&config).expect("Failed to create engine");
    first.run(configured_spiders(&config)).await;
    drop(first);

    // Home and page 1 are in the success history; only page 2 is fetched
    let second = Engine::new(&config).expect("Failed to create engine");
    let summaries = second.run(configured_spiders(&config)).await;

    assert_eq!(summaries[0].success, 1);
    assert_eq!(summaries[0].failure, 0);
    assert_eq!(count_records(&config), 3);

    let report = history_report(&config).expect("Failed to read history");
    assert_eq!(report[0].success, 3);
    assert_eq!(report[0].failure, 0);
}

#[tokio::test]
async fn test_fresh_run_ignores_history() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><head><title>Only</title></head></html>")
                .insert_header("content-type", "text/html"),
        )
        .expect(2)
        .mount(&mock_server)
        .await;

    let temp = TempDir::new().expect("Failed to create temp dir");
    let mut config = create_test_config(&base_url, temp.path());

    Engine::new(&config).unwrap().run(configured_spiders(&config)).await;

    config.history.success_inherit = false;
    config.history.failure_inherit = false;
    let summaries = Engine::new(&config).unwrap().run(configured_spiders(&config)).await;

    assert_eq!(summaries[0].success, 1);
}

#[tokio::test]
async fn test_spent_page_limit_skips_retries() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><head><title>Home</title></head></html>")
                .insert_header("content-type", "text/html"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let temp = TempDir::new().expect("Failed to create temp dir");
    let mut config = create_test_config(&base_url, temp.path());
    config.spiders[0].limit = -2;
    config.spiders[0].follow_links = false;
    config.spiders[0].seeds = vec![format!("{}/", base_url), format!("{}/broken", base_url)];

    let engine = Engine::new(&config).expect("Failed to create engine");
    let summaries = engine.run(configured_spiders(&config)).await;

    // Both seeds spend the budget, so the run ends without the retry
    assert_eq!(summaries[0].success, 1);
    assert_eq!(summaries[0].failure, 1);

    let report = history_report(&config).expect("Failed to read history");
    assert_eq!(report[0].success, 1);
    assert_eq!(report[0].failure, 0);
}
