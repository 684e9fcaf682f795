//! Dictionary store reached over the admin REST API.
//!
//! Routes: `GET/POST {base}/words`, `PUT/DELETE {base}/words/{id}`.

use crate::error::{DictError, Result};
use crate::models::WordEntry;
use crate::store::DictionaryStore;
use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// The API has answered both bare and wrapped payloads over time.
#[derive(Deserialize)]
#[serde(untagged)]
enum WordListBody {
    Bare(Vec<WordEntry>),
    Words { words: Vec<WordEntry> },
    Data { data: Vec<WordEntry> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WordBody {
    Bare(WordEntry),
    Data { data: WordEntry },
}

pub struct RestStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl RestStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!("Using dictionary API at {}", base_url);
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(RestStore {
            client,
            base_url,
            token,
        })
    }

    pub fn words_url(&self) -> String {
        format!("{}/words", self.base_url)
    }

    pub fn word_url(&self, id: &str) -> String {
        format!("{}/words/{}", self.base_url, id)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        debug!("{} {}", method, url);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(map_transport_error)?;
        check_status(response).await
    }
}

fn map_transport_error(e: reqwest::Error) -> DictError {
    if e.is_connect() || e.is_timeout() {
        DictError::StoreUnavailable(e.to_string())
    } else {
        DictError::Network(e)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("{} {}", status, body.trim());
    Err(match status {
        StatusCode::NOT_FOUND => DictError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DictError::StoreUnavailable(message),
        s if s.is_server_error() => DictError::StoreUnavailable(message),
        _ => DictError::StoreRejected(message),
    })
}

#[async_trait]
impl DictionaryStore for RestStore {
    async fn fetch_all(&self) -> Result<Vec<WordEntry>> {
        let response = self.send(self.request(Method::GET, self.words_url())).await?;
        let words = match response.json::<WordListBody>().await? {
            WordListBody::Bare(words)
            | WordListBody::Words { words }
            | WordListBody::Data { data: words } => words,
        };
        debug!("Fetched {} entries from the API", words.len());
        Ok(words)
    }

    async fn insert(&self, entry: &WordEntry) -> Result<WordEntry> {
        let builder = self.request(Method::POST, self.words_url()).json(entry);
        let response = self.send(builder).await?;
        match response.json::<WordBody>().await? {
            WordBody::Bare(saved) | WordBody::Data { data: saved } => Ok(saved),
        }
    }

    async fn update(&self, id: &str, entry: &WordEntry) -> Result<WordEntry> {
        let builder = self.request(Method::PUT, self.word_url(id)).json(entry);
        let response = self.send(builder).await?;
        let mut saved = match response.json::<WordBody>().await? {
            WordBody::Bare(saved) | WordBody::Data { data: saved } => saved,
        };
        saved.id.get_or_insert_with(|| id.to_string());
        Ok(saved)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, self.word_url(id)))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Language};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves every request with the given status line and a JSON error body.
    async fn serve_status(status: &'static str) -> RestStore {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request_complete(&request) {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let body = r#"{"error":"refused"}"#;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        RestStore::new(format!("http://{}", addr), Some("secret".to_string())).unwrap()
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    #[tokio::test]
    async fn test_status_codes_map_to_error_classes() {
        let entry = WordEntry::new("gago", Language::Filipino, Category::Profanity);

        let err = serve_status("500 Internal Server Error").await.fetch_all().await.unwrap_err();
        assert!(matches!(err, DictError::StoreUnavailable(_)), "got {:?}", err);
        assert!(err.is_fatal());

        let err = serve_status("401 Unauthorized").await.update("7", &entry).await.unwrap_err();
        assert!(matches!(err, DictError::StoreUnavailable(_)), "got {:?}", err);
        assert!(err.is_fatal());

        let err = serve_status("409 Conflict").await.insert(&entry).await.unwrap_err();
        match &err {
            DictError::StoreRejected(message) => {
                assert!(message.contains("409"), "{}", message);
                assert!(message.contains("refused"), "{}", message);
            }
            other => panic!("expected StoreRejected, got {:?}", other),
        }
        assert!(!err.is_fatal());

        let err = serve_status("404 Not Found").await.delete("7").await.unwrap_err();
        assert!(matches!(err, DictError::NotFound(_)), "got {:?}", err);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_urls_ignore_trailing_slash() {
        let store = RestStore::new("http://localhost:8080/api/", None).unwrap();
        assert_eq!(store.words_url(), "http://localhost:8080/api/words");
        assert_eq!(store.word_url("abc123"), "http://localhost:8080/api/words/abc123");
    }

    #[test]
    fn test_list_body_shapes() {
        let bare: WordListBody = serde_json::from_str(
            r#"[{"_id": "a1", "word": "gago", "language": "Filipino", "category": "profanity"}]"#,
        )
        .unwrap();
        let wrapped: WordListBody = serde_json::from_str(
            r#"{"data": [{"id": "a1", "word": "gago", "language": "Filipino", "category": "profanity", "variations": ["gaga"]}]}"#,
        )
        .unwrap();
        match bare {
            WordListBody::Bare(words) => assert_eq!(words[0].id.as_deref(), Some("a1")),
            _ => panic!("expected a bare list"),
        }
        match wrapped {
            WordListBody::Data { data } => assert_eq!(data[0].variations, vec!["gaga"]),
            _ => panic!("expected a data wrapper"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_api_is_store_unavailable() {
        // Nothing listens on port 1.
        let store = RestStore::new("http://127.0.0.1:1", None).unwrap();
        let err = store.fetch_all().await.unwrap_err();
        assert!(matches!(err, DictError::StoreUnavailable(_)), "got {:?}", err);
        assert!(err.is_fatal());
    }
}
