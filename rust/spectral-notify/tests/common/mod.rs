//! Shared harness for integration tests: a broker on an ephemeral port
//! plus a thin REST client.

#![allow(dead_code, reason = "each test binary uses a subset of the harness")]

use tempfile::TempDir;

use spectral_notify::config::AppConfig;
use spectral_notify::server::create_app;

/// API key configured for test brokers.
pub const TEST_API_KEY: &str = "test-key";

/// A broker bound to an ephemeral localhost port.
pub struct TestBroker {
    pub base_url: String,
    pub ws_url: String,
    client: reqwest::Client,
    _dir: TempDir,
}

impl TestBroker {
    /// Spawn a broker with a throwaway database.
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn a broker, letting the caller tweak the configuration.
    pub async fn spawn_with(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.database.path = dir
            .path()
            .join("broker.db")
            .to_string_lossy()
            .into_owned();
        config.auth.api_key = Some(TEST_API_KEY.to_string());
        adjust(&mut config);

        let app = create_app(config).await.unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            ws_url: format!("ws://{addr}"),
            client: reqwest::Client::new(),
            _dir: dir,
        }
    }

    /// Authenticated POST.
    pub async fn post(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header("X-API-Key", TEST_API_KEY)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    /// Authenticated POST with an explicit idempotency key.
    pub async fn post_with_key(
        &self,
        path: &str,
        body: serde_json::Value,
        idempotency_key: &str,
    ) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header("X-API-Key", TEST_API_KEY)
            .header("Idempotency-Key", idempotency_key)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    /// Unauthenticated POST.
    pub async fn post_anonymous(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    /// POST and parse the JSON body, asserting HTTP 200.
    pub async fn post_ok(&self, path: &str, body: serde_json::Value) -> serde_json::Value {
        let response = self.post(path, body).await;
        assert_eq!(
            response.status(),
            reqwest::StatusCode::OK,
            "unexpected status for {path}"
        );
        response.json().await.unwrap()
    }
}
