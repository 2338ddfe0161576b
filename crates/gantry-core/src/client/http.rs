use crate::api::{parse_resource_usage, parse_websocket_credentials, ServerStats, WebsocketCredentials};
use crate::error::{GantryError, Result};
use std::future::Future;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a session gets its socket URL and token from.
pub trait CredentialSource: Send + Sync + 'static {
    fn websocket_credentials(
        &self,
        server_id: &str,
    ) -> impl Future<Output = Result<WebsocketCredentials>> + Send;
}

/// Where a dashboard row gets its resource usage from.
pub trait ResourceSource: Send + Sync + 'static {
    fn resource_usage(&self, server_id: &str) -> impl Future<Output = Result<ServerStats>> + Send;
}

/// Client for the panel's HTTP API.
#[derive(Clone)]
pub struct PanelApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PanelApi {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        log::debug!("GET {}", url);
        let resp = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(GantryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// GET /api/client/servers/{id}/websocket
    pub async fn fetch_websocket_credentials(&self, server_id: &str) -> Result<WebsocketCredentials> {
        let body = self
            .get_text(&format!("/api/client/servers/{}/websocket", server_id))
            .await?;
        parse_websocket_credentials(&body)
    }

    /// GET /api/client/servers/{id}/resources
    pub async fn fetch_resource_usage(&self, server_id: &str) -> Result<ServerStats> {
        let body = self
            .get_text(&format!("/api/client/servers/{}/resources", server_id))
            .await?;
        parse_resource_usage(&body)
    }
}

impl CredentialSource for PanelApi {
    fn websocket_credentials(
        &self,
        server_id: &str,
    ) -> impl Future<Output = Result<WebsocketCredentials>> + Send {
        self.fetch_websocket_credentials(server_id)
    }
}

impl ResourceSource for PanelApi {
    fn resource_usage(&self, server_id: &str) -> impl Future<Output = Result<ServerStats>> + Send {
        self.fetch_resource_usage(server_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the request head.
    async fn serve_once(status: &str, body: &str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (base, task)
    }

    #[tokio::test]
    async fn fetches_resource_usage_with_bearer() {
        let body = r#"{"attributes":{"current_state":"starting","is_suspended":false,"resources":{"memory_bytes":10}}}"#;
        let (base, server) = serve_once("200 OK", body).await;
        let api = PanelApi::new(&format!("{}/", base), "key-123");

        let stats = api.resource_usage("abcd").await.unwrap();
        assert_eq!(stats.memory_usage_bytes, 10);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/client/servers/abcd/resources "));
        assert!(request.to_lowercase().contains("authorization: bearer key-123"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (base, _server) = serve_once("502 Bad Gateway", r#"{"errors":[]}"#).await;
        let api = PanelApi::new(&base, "key");
        let err = api.websocket_credentials("abcd").await.unwrap_err();
        assert!(matches!(err, GantryError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn malformed_body_is_an_error() {
        let (base, _server) = serve_once("200 OK", "<html>").await;
        let api = PanelApi::new(&base, "key");
        let err = api.resource_usage("abcd").await.unwrap_err();
        assert!(matches!(err, GantryError::Decode(_)));
    }
}
