//! Test harnesses for enrollment integration tests.
//!
//! Each `TestDaemon` owns an in-memory database and a temp directory for its
//! config files. `serve` starts the HTTP router on a random local port.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tunnelgate_core::AddressSpace;
use tunnelgate_daemon::artifacts::{ClientConfigDir, ServerConfigFile};
use tunnelgate_daemon::http::{self, AppState};
use tunnelgate_daemon::{Database, Enrollment, EnrollmentRateLimiter, OverlayConfig};
use tunnelgate_wg::{PrivateKey, X25519Provider};

/// Capability list a well-behaved lamp sends.
pub const LAMP_CAPABILITIES: &str = r#"{"uri":"/on","string":"Turn on","method":"POST"}|{"uri":"/status","string":"Get status","method":"GET"}"#;

/// Enrollment service backed by throwaway storage.
pub struct TestDaemon {
    pub enrollment: Arc<Enrollment>,
    pub db: Database,
    dir: TempDir,
}

impl TestDaemon {
    /// Daemon on `fc00::/64` handing out addresses from `fc00::2`.
    pub async fn new() -> Self {
        Self::with_network("fc00::/64", "fc00::1", "fc00::2").await
    }

    pub async fn with_network(network: &str, server: &str, initial: &str) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db = Database::open_in_memory()
            .await
            .expect("Failed to create in-memory database");

        let overlay = OverlayConfig {
            address_space: AddressSpace::new(
                network.parse().expect("network"),
                initial.parse().expect("initial address"),
            )
            .expect("initial address inside network"),
            server_address: server.parse().expect("server address"),
            server_domain: "vpn.example.com".into(),
            server_port: 3411,
            server_public_key: PrivateKey::from_bytes(&[9u8; 32])
                .expect("server key")
                .public_key(),
            keepalive_seconds: 30,
        };

        let clients = ClientConfigDir::new(dir.path().join("clients"))
            .expect("Failed to create client config dir");
        let server = ServerConfigFile::new(dir.path().join("wg0.conf"));

        let enrollment = Enrollment::new(&db, clients, server, Arc::new(X25519Provider), overlay);

        Self {
            enrollment: Arc::new(enrollment),
            db,
            dir,
        }
    }

    pub fn client_config_path(&self, file_name: &str) -> PathBuf {
        self.dir.path().join("clients").join(file_name)
    }

    pub fn server_config_path(&self) -> PathBuf {
        self.dir.path().join("wg0.conf")
    }

    /// Start the HTTP router on 127.0.0.1 and return its base URL.
    pub async fn serve(&self) -> String {
        self.serve_with_limiter(EnrollmentRateLimiter::new(1000, 1000))
            .await
    }

    pub async fn serve_with_limiter(&self, rate_limiter: EnrollmentRateLimiter) -> String {
        let state = AppState {
            enrollment: self.enrollment.clone(),
            rate_limiter,
        };
        let app = http::router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{addr}")
    }
}

/// Multipart client for `POST /get_config`.
pub struct TestClient {
    http: reqwest::Client,
    base_url: String,
}

impl TestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Post the given form fields as-is.
    pub async fn post_fields(&self, fields: &[(&str, &str)]) -> reqwest::Response {
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in fields {
            form = form.text(name.to_string(), value.to_string());
        }
        self.http
            .post(format!("{}/get_config", self.base_url))
            .multipart(form)
            .send()
            .await
            .expect("request failed")
    }

    /// Redeem with the camelCase field names devices send.
    pub async fn get_config(&self, words: [&str; 3], capabilities: &str) -> reqwest::Response {
        self.post_fields(&[
            ("tokenOne", words[0]),
            ("tokenTwo", words[1]),
            ("tokenThree", words[2]),
            ("capabilities", capabilities),
        ])
        .await
    }
}
