//! HTTP fetcher tests against a mock server

mod common;

use common::{dwh_stage, stage, RecordingDatabase};
use feedlake_etl::fetch::{FeedFetcher, HttpFetcher};
use feedlake_etl::sql::{SqlExecutor, SqlTemplates};
use feedlake_etl::{EtlError, PipelineOrchestrator, PipelineRunContext};
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

const FILTER_LIST: &str = "! Title: Test DNS filter\n||ads.example.com^\n||tracker.example.net^$third-party\n";

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(Duration::from_secs(5)).expect("Failed to build HTTP client")
}

#[tokio::test]
async fn test_fetch_returns_body_and_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/filter_1.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FILTER_LIST))
        .expect(1)
        .mount(&server)
        .await;

    let feed = fetcher()
        .fetch(&format!("{}/filter_1.txt", server.uri()))
        .await
        .unwrap();

    assert!(feed.is_success());
    assert_eq!(feed.body, FILTER_LIST);
}

#[tokio::test]
async fn test_fetch_reports_non_success_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let feed = fetcher().fetch(&format!("{}/gone", server.uri())).await.unwrap();

    assert_eq!(feed.status, 404);
    assert!(!feed.is_success());
}

#[tokio::test]
async fn test_fetch_transport_error() {
    // nothing listens on the discard port
    let err = fetcher().fetch("http://127.0.0.1:9/list.txt").await.unwrap_err();
    assert!(matches!(err, EtlError::Fetch { ref source_url, .. } if source_url.ends_with("/list.txt")));
}

#[tokio::test]
async fn test_pipeline_loads_feed_served_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/filter_1.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FILTER_LIST))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/malware"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let url = format!("{}/filter_1.txt", server.uri());
    let malware = format!("{}/malware", server.uri());
    let db = RecordingDatabase::new();
    let context = PipelineRunContext::new();
    let executor = SqlExecutor::new(
        db.clone(),
        SqlTemplates::new(common::sql_dir()),
        common::fast_retry(),
        context.clone(),
    );
    let orch = PipelineOrchestrator::new(
        context,
        executor,
        Arc::new(fetcher()),
        stage(&format!(r#"{{"ads_and_trackers": ["{url}"], "malware": ["{malware}"]}}"#)),
        dwh_stage(),
    )
    .unwrap();

    let runs = orch.build_datalake().await.unwrap();

    let inserts = db.scripts_containing("INSERT INTO datalake_ads_and_trackers_temp");
    assert_eq!(inserts.len(), 1);
    assert!(inserts[0].contains("('', 'ads.example.com')"));
    assert!(inserts[0].contains("('', 'tracker.example.net')"));
    assert!(db.scripts_containing("INSERT INTO datalake_malware_temp").is_empty());

    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].inserting_row_count, Some(2));
    assert_eq!(runs[1].inserting_row_count, Some(0));
}
