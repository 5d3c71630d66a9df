use crate::error::{Error, Result};
use chrono::{Days, NaiveDate};
use log::{debug, info, trace};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;

pub const SEARCH_STORIES_ENDPOINT: &str = "search/stories";
pub const PAGE_SIZE: u32 = 25;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// The `[start, end]` due-date range a search covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SearchWindow {
    pub fn from_date(start: NaiveDate, lookahead_days: u32) -> Result<Self> {
        let end = start
            .checked_add_days(Days::new(lookahead_days.into()))
            .ok_or_else(|| {
                Error::Config(format!(
                    "Lookahead of {lookahead_days} days from {start} is out of range"
                ))
            })?;

        Ok(Self { start, end })
    }
}

impl fmt::Display for SearchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

/// Owner is passed through verbatim, the API does its own validation.
pub fn build_query(window: &SearchWindow, owner: &str) -> String {
    format!("due:{window} and owner:{owner} and !is:done")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub page_size: u32,
    pub query: String,
}

impl SearchRequest {
    pub fn new(window: &SearchWindow, owner: &str) -> Self {
        Self {
            page_size: PAGE_SIZE,
            query: build_query(window, owner),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub next: Option<Value>,
    #[serde(rename = "data", default)]
    pub stories: Vec<Story>,
}

impl SearchResponse {
    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))
    }
}

/// The part of a Clubhouse story the digest uses. The API returns far more
/// (comments, tasks, labels, ...), which is ignored on decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Story {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub app_url: String,
    #[serde(default)]
    pub deadline: Option<String>,
}

pub trait Search {
    fn search(
        &self,
        window: &SearchWindow,
        owner: &str,
    ) -> impl Future<Output = Result<SearchResponse>> + Send;
}

#[derive(Debug, Clone)]
pub struct ClubhouseClient {
    client: Client,
    endpoint: Url,
    api_token: String,
}

impl ClubhouseClient {
    pub fn new(api_url: &str, api_token: impl Into<String>) -> Result<Self> {
        let base = if api_url.ends_with('/') {
            Url::parse(api_url)
        } else {
            Url::parse(&format!("{api_url}/"))
        }
        .map_err(|e| Error::Config(format!("Invalid API URL {api_url}: {e}")))?;

        let endpoint = base
            .join(SEARCH_STORIES_ENDPOINT)
            .map_err(|e| Error::Config(format!("Invalid API URL {api_url}: {e}")))?;

        Ok(Self {
            client: Client::new(),
            endpoint,
            api_token: api_token.into(),
        })
    }
}

impl Search for ClubhouseClient {
    async fn search(&self, window: &SearchWindow, owner: &str) -> Result<SearchResponse> {
        let request = SearchRequest::new(window, owner);
        debug!("Searching {} for {:?}", self.endpoint, request.query);

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("token", &self.api_token)])
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Transport(e.without_url().to_string()))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(e.without_url().to_string()))?;
        trace!("Search response: {}", String::from_utf8_lossy(&body));

        let response = SearchResponse::from_json(&body)?;
        info!(
            "Found {} stories due {window} ({} total)",
            response.stories.len(),
            response.total
        );

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_window_end_is_start_plus_days() {
        let start = date(2024, 2, 25);
        for days in [0, 1, 7, 30, 366] {
            let window = SearchWindow::from_date(start, days).unwrap();
            assert_eq!(start, window.start);
            assert_eq!(days as i64, (window.end - window.start).num_days());
        }
    }

    #[test]
    fn test_build_query() {
        let window = SearchWindow::from_date(date(2024, 5, 3), 7).unwrap();
        assert_eq!(
            "due:2024-05-03..2024-05-10 and owner:alice and !is:done",
            build_query(&window, "alice")
        );
    }

    #[test]
    fn test_build_query_crosses_year() {
        let window = SearchWindow::from_date(date(2023, 12, 30), 3).unwrap();
        assert_eq!(
            "due:2023-12-30..2024-01-02 and owner:bad owner! and !is:done",
            build_query(&window, "bad owner!")
        );
    }

    #[test]
    fn test_request_serialization() {
        let window = SearchWindow::from_date(date(2024, 5, 3), 0).unwrap();
        let request = serde_json::to_value(SearchRequest::new(&window, "bob")).unwrap();

        assert_eq!(
            serde_json::json!({
                "page_size": 25,
                "query": "due:2024-05-03..2024-05-03 and owner:bob and !is:done",
            }),
            request
        );
    }

    #[test]
    fn test_response_ignores_unused_fields() {
        let body = br#"{
            "total": 2,
            "next": null,
            "data": [
                {
                    "id": 12,
                    "name": "Fix bug",
                    "app_url": "https:\\/\\/x.co\\/1",
                    "deadline": "2024-05-10T00:00:00Z",
                    "comments": [{"text": "hello"}],
                    "labels": [],
                    "owner_ids": ["alice"]
                },
                {
                    "name": "No deadline",
                    "app_url": "https://x.co/2",
                    "deadline": null
                }
            ]
        }"#;

        let response = SearchResponse::from_json(body).unwrap();
        assert_eq!(2, response.total);
        assert_eq!(None, response.next);
        assert_eq!(
            vec![
                Story {
                    name: "Fix bug".to_string(),
                    app_url: "https:\\/\\/x.co\\/1".to_string(),
                    deadline: Some("2024-05-10T00:00:00Z".to_string()),
                },
                Story {
                    name: "No deadline".to_string(),
                    app_url: "https://x.co/2".to_string(),
                    deadline: None,
                },
            ],
            response.stories
        );
    }

    #[test]
    fn test_malformed_response_is_decode_error() {
        let result = SearchResponse::from_json(b"<html>Bad Gateway</html>");
        assert!(matches!(result, Err(Error::Decode(_))));

        let result = SearchResponse::from_json(br#"{"data": "not a list"}"#);
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_invalid_api_url() {
        let result = ClubhouseClient::new("not a url", "token");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_endpoint_with_and_without_trailing_slash() {
        let with = ClubhouseClient::new("https://api.example.com/api/v3/", "t").unwrap();
        let without = ClubhouseClient::new("https://api.example.com/api/v3", "t").unwrap();

        assert_eq!(
            "https://api.example.com/api/v3/search/stories",
            with.endpoint.as_str()
        );
        assert_eq!(with.endpoint, without.endpoint);
    }

    /// Accepts one connection, captures the raw request and answers with `body`.
    async fn serve_once(body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/v3/", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];

            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);

                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length || n == 0 {
                        break;
                    }
                } else if n == 0 {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();

            String::from_utf8(request).unwrap()
        });

        (url, handle)
    }

    #[tokio::test]
    async fn test_search_sends_query_and_token() {
        let (url, server) = serve_once(
            r#"{"total": 1, "next": null, "data": [{"name": "Fix bug", "app_url": "https://x.co/1", "deadline": "2024-05-10T00:00:00Z"}]}"#,
        )
        .await;

        let client = ClubhouseClient::new(&url, "s3cret").unwrap();
        let window = SearchWindow::from_date(date(2024, 5, 3), 7).unwrap();
        let response = client.search(&window, "alice").await.unwrap();

        assert_eq!(1, response.total);
        assert_eq!("Fix bug", response.stories[0].name);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/v3/search/stories?token=s3cret HTTP/1.1"));
        assert!(request.to_lowercase().contains("content-type: application/json"));
        assert!(request.contains(
            r#""query":"due:2024-05-03..2024-05-10 and owner:alice and !is:done""#
        ));
        assert!(request.contains(r#""page_size":25"#));
    }

    #[tokio::test]
    async fn test_search_bad_body_is_decode_error() {
        let (url, server) = serve_once("not json").await;

        let client = ClubhouseClient::new(&url, "token").unwrap();
        let window = SearchWindow::from_date(date(2024, 5, 3), 7).unwrap();
        let result = client.search(&window, "alice").await;

        assert!(matches!(result, Err(Error::Decode(_))));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_search_unreachable_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);

        let client = ClubhouseClient::new(&url, "token").unwrap();
        let window = SearchWindow::from_date(date(2024, 5, 3), 7).unwrap();
        let result = client.search(&window, "alice").await;

        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
