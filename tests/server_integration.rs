//! End-to-end tests for the collector HTTP server.
//!
//! Each test starts `run_server` on a free port against a temporary SQLite
//! database and talks to it over real HTTP.

use jira_harvest::config::Config;
use jira_harvest::server::run_server;
use serde_json::{json, Value};
use tempfile::TempDir;

fn test_config_with_port(tmp: &TempDir, port: u16) -> Config {
    let db_path = tmp.path().join("jharvest.sqlite");
    let config_content = format!(
        r#"
[db]
path = "{}"

[server]
bind = "127.0.0.1:{}"

[events]
capacity = 16
"#,
        db_path.display(),
        port
    );
    toml::from_str(&config_content).unwrap()
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn start(tmp: &TempDir) -> (u16, tokio::task::JoinHandle<()>) {
    let port = find_free_port();
    let cfg = test_config_with_port(tmp, port);
    let handle = tokio::spawn(async move {
        run_server(&cfg).await.ok();
    });
    wait_for_server(port).await;
    (port, handle)
}

fn board_page() -> String {
    r#"<html><body>
      <div data-testid="software-board.board">
        <div data-column-id="1" data-column-name="To Do">
          <div data-testid="platform-board-kit.ui.card.card">
            <a href="/browse/ABC-1">ABC-1</a><span>Set up CI</span>
          </div>
          <div data-testid="platform-board-kit.ui.card.card">
            <a href="/browse/ABC-2">ABC-2</a><span>Write docs</span>
          </div>
        </div>
        <div data-column-id="2" data-column-name="Done">
          <div data-testid="platform-board-kit.ui.card.card">
            <a href="/browse/ABC-3">ABC-3</a><span>Pick a name</span>
          </div>
        </div>
      </div>
    </body></html>"#
        .to_string()
}

const BOARD_URL: &str = "https://acme.atlassian.net/jira/software/projects/ABC/boards/1";

#[tokio::test]
async fn test_health() {
    let tmp = TempDir::new().unwrap();
    let (port, handle) = start(&tmp).await;

    let body: Value = reqwest::get(format!("http://127.0.0.1:{}/health", port))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    handle.abort();
}

#[tokio::test]
async fn test_collect_board_then_query_and_clear() {
    let tmp = TempDir::new().unwrap();
    let (port, handle) = start(&tmp).await;
    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    let envelope = json!({
        "timestamp": "2024-05-01T12:00:00Z",
        "url": BOARD_URL,
        "title": "ABC board - Jira",
        "data": { "html": board_page() },
        "collector": { "name": "jharvest-extension", "version": "0.1.0" }
    });

    let resp = client
        .post(format!("{}/api/collect", base))
        .json(&envelope)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["pageType"], "board");
    assert_eq!(body["stats"]["ticketsAdded"], 3);
    assert_eq!(body["stats"]["ticketsTotal"], 3);

    // Second collection of the same page bumps versions
    let body: Value = client
        .post(format!("{}/api/collect", base))
        .json(&envelope)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["stats"]["ticketsAdded"], 0);
    assert_eq!(body["stats"]["ticketsUpdated"], 3);

    let tickets: Value = client
        .get(format!("{}/api/tickets?project=abc", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let tickets = tickets.as_array().unwrap();
    assert_eq!(tickets.len(), 3);
    assert!(tickets.iter().all(|t| t["version"] == 2));
    let done = tickets.iter().find(|t| t["key"] == "ABC-3").unwrap();
    assert_eq!(done["status"], "Done");

    let resp = client
        .delete(format!("{}/api/tickets", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let cleared: Value = resp.json().await.unwrap();
    assert_eq!(cleared["cleared"], 3);

    let tickets: Value = client
        .get(format!("{}/api/tickets", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(tickets.as_array().unwrap().is_empty());

    handle.abort();
}

#[tokio::test]
async fn test_assess_endpoint_does_not_store() {
    let tmp = TempDir::new().unwrap();
    let (port, handle) = start(&tmp).await;
    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    let verdict: Value = client
        .post(format!("{}/api/assess", base))
        .json(&json!({
            "url": "https://acme.atlassian.net/jira/projects",
            "html": r#"<html><body><table data-testid="project-list-table"><tr><td>ABC</td></tr></table></body></html>"#
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(verdict["pageType"], "projectsList");
    assert_eq!(verdict["confidence"], "high");
    assert_eq!(verdict["collectable"], true);

    let projects: Value = client
        .get(format!("{}/api/projects", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(projects.as_array().unwrap().is_empty());

    handle.abort();
}

#[tokio::test]
async fn test_error_contract() {
    let tmp = TempDir::new().unwrap();
    let (port, handle) = start(&tmp).await;
    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    // Neither html nor tickets
    let resp = client
        .post(format!("{}/api/collect", base))
        .json(&json!({ "url": BOARD_URL, "data": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    // Blank document forced through extraction
    let resp = client
        .post(format!("{}/api/collect", base))
        .json(&json!({ "url": BOARD_URL, "data": { "html": "  ", "pageType": "board" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "parse_error");
    assert_eq!(body["error"]["message"], "document is empty");

    // Non-Jira page is a successful no-op
    let resp = client
        .post(format!("{}/api/collect", base))
        .json(&json!({ "url": "https://example.com", "data": { "html": "<p>hi</p>" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["pageType"], "unknown");
    assert!(body["message"].as_str().unwrap().contains("nothing collected"));

    handle.abort();
}
