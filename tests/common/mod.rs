#![allow(dead_code)]

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde_json::Value;

/// A server process on its own port, by default with an empty in-memory
/// store. Killed when dropped, so every memory-backed test starts clean.
pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    pub client: reqwest::Client,
    child: Child,
}

impl TestServer {
    fn spawn(envs: &[(&str, String)]) -> Result<Self> {
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        let mut cmd = Command::new(env!("CARGO_BIN_EXE_skilllink-api"));
        cmd.env("SKILLLINK_STORE", "memory")
            .env("SKILLLINK_PORT", port.to_string())
            .env("APP_ENV", "development")
            .env("RUST_LOG", "skilllink_api=warn")
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        for (name, value) in envs {
            cmd.env(name, value);
        }

        let child = cmd.spawn().context("failed to spawn server binary")?;

        Ok(Self { port, base_url, client: reqwest::Client::new(), child })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            let url = format!("{}/health", self.base_url);
            if let Ok(resp) = self.client.get(&url).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> Result<(StatusCode, Value)> {
        let res = self.client.get(self.url(path)).send().await?;
        read(res).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<(StatusCode, Value)> {
        let res = self.client.post(self.url(path)).json(&body).send().await?;
        read(res).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<(StatusCode, Value)> {
        let res = self.client.put(self.url(path)).json(&body).send().await?;
        read(res).await
    }

    pub async fn patch(&self, path: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let mut req = self.client.patch(self.url(path));
        if let Some(body) = body {
            req = req.json(&body);
        }
        read(req.send().await?).await
    }

    pub async fn delete(&self, path: &str) -> Result<(StatusCode, Value)> {
        let res = self.client.delete(self.url(path)).send().await?;
        read(res).await
    }

    /// Creates a record and returns its id, failing unless the server answers 201.
    pub async fn create(&self, collection: &str, body: Value) -> Result<i64> {
        let (status, record) = self.post(&format!("/{}", collection), body).await?;
        anyhow::ensure!(status == StatusCode::CREATED, "create {} failed with {}: {}", collection, status, record);
        record["id"].as_i64().context("created record has no id")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

async fn read(res: reqwest::Response) -> Result<(StatusCode, Value)> {
    let status = res.status();
    let bytes = res.bytes().await?;
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
    Ok((status, body))
}

pub async fn start_server() -> Result<TestServer> {
    start_server_with(&[]).await
}

/// Starts the server with extra environment, overriding the defaults above.
pub async fn start_server_with(envs: &[(&str, String)]) -> Result<TestServer> {
    let server = TestServer::spawn(envs)?;
    server.wait_ready(Duration::from_secs(30)).await?;
    Ok(server)
}

/// Institution, tutor and a session with the given capacity; returns
/// `(institution_id, tutor_id, session_id)`.
pub async fn seed_session(server: &TestServer, capacity: i64) -> Result<(i64, i64, i64)> {
    let institution = server.create("institutions", serde_json::json!({"name": "North Campus"})).await?;
    let tutor = server
        .create(
            "tutors",
            serde_json::json!({"first_name": "Ana", "last_name": "Ruiz", "email": "ana.ruiz@example.com"}),
        )
        .await?;
    let session = server
        .create(
            "sessions",
            serde_json::json!({
                "name": "Algebra I",
                "capacity": capacity,
                "tutor_id": tutor,
                "institution_id": institution
            }),
        )
        .await?;
    Ok((institution, tutor, session))
}
