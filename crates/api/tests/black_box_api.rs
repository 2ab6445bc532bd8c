use std::sync::Arc;
use std::time::Duration;

use bulkimport_api::app::{build_app, ImportServices};
use bulkimport_api::config::AppConfig;
use bulkimport_core::TenantId;
use reqwest::StatusCode;

const BOUNDARY: &str = "import-boundary-7f3a";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(workers: usize) -> Self {
        let config = AppConfig {
            workers,
            poll_interval: Duration::from_millis(5),
            max_idle_backoff: Duration::from_millis(20),
            ..AppConfig::default()
        };

        // Same router as prod, in-memory services, ephemeral port.
        let app = build_app(Arc::new(ImportServices::in_memory(&config)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn multipart(files: &[&str]) -> String {
    let mut body = String::from("preamble is ignored\r\n");
    for (i, content) in files.iter().enumerate() {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"part{i}.ndjson\"\r\nContent-Type: application/x-ndjson\r\n\r\n{content}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    body
}

async fn submit(client: &reqwest::Client, base_url: &str, query: &str, files: &[&str]) -> reqwest::Response {
    client
        .post(format!("{base_url}/$import{query}"))
        .header("Prefer", "respond-async")
        .header("Content-Type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(multipart(files))
        .send()
        .await
        .unwrap()
}

async fn poll_until_terminal(client: &reqwest::Client, location: &str) -> reqwest::Response {
    for _ in 0..200 {
        let res = client.get(location).send().await.unwrap();
        if res.status() != StatusCode::ACCEPTED {
            return res;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job did not reach a terminal state within timeout");
}

#[tokio::test]
async fn health_reports_executor_stats() {
    let srv = TestServer::spawn(1).await;

    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["executor"]["workers"], 1);
}

#[tokio::test]
async fn submit_then_poll_until_complete() {
    let srv = TestServer::spawn(2).await;
    let client = reqwest::Client::new();

    let res = submit(
        &client,
        &srv.base_url,
        "?batchSize=2&processingMode=ATOMIC_BATCH&jobDescription=nightly",
        &["{\"id\":1}\n{\"id\":2}\n{\"id\":3}", "{\"id\":4}"],
    )
    .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let location = res
        .headers()
        .get("content-location")
        .expect("content-location header")
        .to_str()
        .unwrap()
        .to_string();
    assert!(location.starts_with(&srv.base_url), "{location}");
    assert!(location.contains("/$import-poll-status?jobId="));

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["fileCount"], 2);
    assert_eq!(body["declaredFileCount"], 2);

    let res = poll_until_terminal(&client, &location).await;
    assert_eq!(res.status(), StatusCode::OK);
    let outcome: serde_json::Value = res.json().await.unwrap();
    assert_eq!(outcome["resourceType"], "OperationOutcome");
    assert!(outcome["issue"].as_array().unwrap().is_empty());

    // Terminal results are stable.
    let again = client.get(&location).send().await.unwrap();
    assert_eq!(again.status(), StatusCode::OK);
}

#[tokio::test]
async fn failed_batch_is_reported_as_server_error_outcome() {
    let srv = TestServer::spawn(1).await;
    let client = reqwest::Client::new();

    let res = submit(&client, &srv.base_url, "", &["{\"id\":1}\nnot json\n{\"id\":3}"]).await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let location = res.headers()["content-location"].to_str().unwrap().to_string();

    let res = poll_until_terminal(&client, &location).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let outcome: serde_json::Value = res.json().await.unwrap();
    let issue = &outcome["issue"][0];
    assert_eq!(issue["severity"], "error");
    assert!(issue["diagnostics"].as_str().unwrap().contains("row 1"), "{outcome}");
}

#[tokio::test]
async fn non_terminal_job_returns_progress_and_retry_after() {
    // No workers: the job stays READY.
    let srv = TestServer::spawn(0).await;
    let client = reqwest::Client::new();

    let res = submit(&client, &srv.base_url, "", &["{\"id\":1}"]).await;
    let location = res.headers()["content-location"].to_str().unwrap().to_string();

    let res = client.get(&location).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    assert_eq!(res.headers()["retry-after"], "120");
    let progress = res.headers()["x-progress"].to_str().unwrap();
    assert!(progress.starts_with("Status set to READY at "), "{progress}");
}

#[tokio::test]
async fn submit_without_prefer_is_rejected() {
    let srv = TestServer::spawn(0).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/$import", srv.base_url))
        .header("Content-Type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(multipart(&["{}"]))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(res.headers().get("content-location").is_none());
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "async_required");
}

#[tokio::test]
async fn malformed_requests_are_bad_requests() {
    let srv = TestServer::spawn(0).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/$import", srv.base_url))
        .header("Prefer", "respond-async")
        .header("Content-Type", "application/json")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(format!("{}/$import", srv.base_url))
        .header("Prefer", "respond-async")
        .header("Content-Type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(format!("--{BOUNDARY}\r\n\r\ntruncated"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = submit(&client, &srv.base_url, "?processingMode=SOMETIMES", &["{}"]).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "malformed_request");

    let res = submit(&client, &srv.base_url, "?declaredFileCount=1", &["{}", "{}"]).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn polling_unknown_or_invalid_ids() {
    let srv = TestServer::spawn(0).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/$import-poll-status?jobId={}", srv.base_url, uuid::Uuid::now_v7()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(format!("{}/$import-poll-status?jobId=not-a-job", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(format!("{}/$import-poll-status", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tenant_header_must_be_an_id() {
    let srv = TestServer::spawn(0).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/$import", srv.base_url))
        .header("X-Tenant-ID", "acme")
        .header("Prefer", "respond-async")
        .header("Content-Type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(multipart(&["{}"]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(format!("{}/$import", srv.base_url))
        .header("X-Tenant-ID", TenantId::new().to_string())
        .header("Prefer", "respond-async")
        .header("Content-Type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(multipart(&["{}"]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
}
