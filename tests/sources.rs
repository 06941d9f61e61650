//! Bucket listing and downloads against a mock Cloud Storage endpoint.

use pdf2md_batch::{FetchError, Fetcher, GcsLister, HttpFetcher, ItemDescriptor, ItemLister, Period};
use serde_json::json;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OBJECTS: &str = "/storage/v1/b/arxiv-dataset/o";

#[tokio::test]
async fn listing_follows_page_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(OBJECTS))
        .and(query_param("prefix", "arxiv/arxiv/pdf/2101/"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"name": "arxiv/arxiv/pdf/2101/2101.00001v1.pdf"},
                {"name": "arxiv/arxiv/pdf/2101/"}
            ],
            "nextPageToken": "page-2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(OBJECTS))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"name": "arxiv/arxiv/pdf/2101/2101.00002v3.pdf"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let lister = GcsLister::new(server.uri(), "arxiv-dataset", "arxiv/arxiv/pdf").unwrap();
    let found = lister.list(&Period::new(21, 1).unwrap()).await.unwrap();
    assert_eq!(
        found,
        vec![
            "gs://arxiv-dataset/arxiv/arxiv/pdf/2101/2101.00001v1.pdf".to_string(),
            "gs://arxiv-dataset/arxiv/arxiv/pdf/2101/2101.00002v3.pdf".to_string(),
        ]
    );
}

#[tokio::test]
async fn empty_month_lists_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(OBJECTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let lister = GcsLister::new(server.uri(), "arxiv-dataset", "arxiv/arxiv/pdf").unwrap();
    assert!(lister.list(&Period::new(21, 2).unwrap()).await.unwrap().is_empty());
}

#[tokio::test]
async fn listing_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let lister = GcsLister::new(server.uri(), "arxiv-dataset", "arxiv/arxiv/pdf").unwrap();
    let err = lister.list(&Period::new(21, 1).unwrap()).await.unwrap_err();
    assert!(err.to_string().contains("403"));
}

#[tokio::test]
async fn gs_locator_downloads_into_scratch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/arxiv-dataset/arxiv/arxiv/pdf/2101/2101.00001v1.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7 test".to_vec()))
        .mount(&server)
        .await;

    let scratch = tempfile::tempdir().unwrap();
    let fetcher = HttpFetcher::with_endpoint(server.uri()).unwrap();
    let item = ItemDescriptor::new(
        "2101.00001v1",
        "gs://arxiv-dataset/arxiv/arxiv/pdf/2101/2101.00001v1.pdf",
    );
    let fetched = fetcher.fetch(&item, scratch.path()).await.unwrap();

    assert!(fetched.payload_path.starts_with(scratch.path()));
    assert!(fetched.payload_path.ends_with("2101.00001v1.pdf"));
    assert_eq!(std::fs::read(&fetched.payload_path).unwrap(), b"%PDF-1.7 test");

    fetched.release();
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn missing_object_leaves_no_scratch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let scratch = tempfile::tempdir().unwrap();
    let fetcher = HttpFetcher::with_endpoint(server.uri()).unwrap();
    let item = ItemDescriptor::new("2101.99999v1", "gs://arxiv-dataset/x/2101.99999v1.pdf");
    let err = fetcher.fetch(&item, scratch.path()).await.unwrap_err();

    assert!(matches!(err, FetchError::Status { status: 404, .. }));
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}
