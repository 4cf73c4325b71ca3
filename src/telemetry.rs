use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::AppConfig;
use crate::errors::AppResult;

const BUFFER_FILE_NAME: &str = "session-events.jsonl";
const MAX_ERROR_COPY_CHARS: usize = 200;

/// Buffers session lifecycle events as JSON lines under the data directory.
#[derive(Clone)]
pub struct TelemetryClient {
    enabled: Arc<AtomicBool>,
    queue: Arc<Mutex<Vec<TelemetryEvent>>>,
    buffer_path: PathBuf,
    batch_size: usize,
    max_file_bytes: u64,
}

impl TelemetryClient {
    pub fn new<P: AsRef<Path>>(data_dir: P, config: &AppConfig) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;
        let buffer_path = data_dir.join(BUFFER_FILE_NAME);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&buffer_path)?;

        Ok(Self {
            enabled: Arc::new(AtomicBool::new(config.telemetry_enabled_by_default)),
            queue: Arc::new(Mutex::new(Vec::new())),
            buffer_path,
            batch_size: config.telemetry_batch_size.max(1),
            max_file_bytes: config.telemetry_buffer_max_bytes,
        })
    }

    pub fn record(&self, name: impl Into<String>, payload: serde_json::Value) -> AppResult<()> {
        if !self.enabled.load(Ordering::Relaxed) {
            return Ok(());
        }

        let mut queue = self.queue.lock();
        queue.push(TelemetryEvent::new(name.into(), payload));
        if queue.len() >= self.batch_size {
            self.persist_locked(&mut queue)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> AppResult<()> {
        let mut queue = self.queue.lock();
        self.persist_locked(&mut queue)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn buffer_path(&self) -> &Path {
        &self.buffer_path
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn persist_locked(&self, queue: &mut Vec<TelemetryEvent>) -> AppResult<()> {
        if queue.is_empty() {
            return Ok(());
        }

        let mut encoded = Vec::with_capacity(queue.len());
        let mut incoming = 0_u64;
        for event in queue.iter() {
            let line = serde_json::to_vec(event)?;
            incoming += (line.len() + 1) as u64;
            encoded.push(line);
        }

        self.truncate_if_needed(incoming)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.buffer_path)?;
        for line in &encoded {
            file.write_all(line)?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        queue.clear();
        Ok(())
    }

    // Oldest events are dropped wholesale once the cap is reached.
    fn truncate_if_needed(&self, incoming_bytes: u64) -> AppResult<()> {
        let current = fs::metadata(&self.buffer_path)
            .map(|m| m.len())
            .unwrap_or(0);
        if current + incoming_bytes <= self.max_file_bytes {
            return Ok(());
        }
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.buffer_path)?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct TelemetryEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl TelemetryEvent {
    fn new(name: String, payload: serde_json::Value) -> Self {
        Self {
            name,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Strips bearer tokens, JWT-shaped strings and email addresses from error
/// text before it leaves the process.
pub fn sanitize_error_copy(message: &str) -> String {
    let mut redact_next = false;
    let words: Vec<String> = message
        .split_whitespace()
        .map(|word| {
            if redact_next {
                redact_next = false;
                return "[redacted]".to_string();
            }
            if word.eq_ignore_ascii_case("bearer") {
                redact_next = true;
                return word.to_string();
            }
            if word.contains('@') && word.contains('.') {
                return "[email]".to_string();
            }
            if word.len() > 40 && word.matches('.').count() >= 2 {
                return "[token]".to_string();
            }
            word.to_string()
        })
        .collect();

    let joined = words.join(" ");
    if joined.chars().count() > MAX_ERROR_COPY_CHARS {
        let truncated: String = joined.chars().take(MAX_ERROR_COPY_CHARS).collect();
        format!("{truncated}…")
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn test_config() -> AppConfig {
        AppConfig {
            cluster: None,
            project: None,
            client_id: None,
            tenant_id: None,
            redirect_uri: None,
            post_logout_redirect_uri: None,
            authority: None,
            authorize_endpoint: None,
            token_endpoint: None,
            logout_endpoint: None,
            api_base_url: None,
            http_timeout_secs: 5,
            telemetry_enabled_by_default: true,
            telemetry_batch_size: 2,
            telemetry_buffer_max_bytes: 1024,
        }
    }

    #[test]
    fn writes_batched_events_to_disk() {
        let dir = tempdir().unwrap();
        let client = TelemetryClient::new(dir.path(), &test_config()).unwrap();
        client.record("session_restored", json!({ "account": "a" })).unwrap();
        assert_eq!(client.queue_depth(), 1);
        client.record("logout", json!({})).unwrap();
        assert_eq!(client.queue_depth(), 0);

        let buffer = fs::read_to_string(client.buffer_path()).unwrap();
        assert!(buffer.contains("session_restored"));
        assert_eq!(buffer.lines().count(), 2);
    }

    #[test]
    fn disabled_client_drops_events() {
        let dir = tempdir().unwrap();
        let client = TelemetryClient::new(dir.path(), &test_config()).unwrap();
        client.set_enabled(false);
        client.record("ignored", json!({})).unwrap();
        client.flush().unwrap();

        assert_eq!(client.queue_depth(), 0);
        assert!(fs::read_to_string(client.buffer_path()).unwrap().is_empty());
    }

    #[test]
    fn truncates_when_exceeding_capacity() {
        let dir = tempdir().unwrap();
        let mut config = test_config();
        config.telemetry_buffer_max_bytes = 128;
        config.telemetry_batch_size = 1;
        let client = TelemetryClient::new(dir.path(), &config).unwrap();
        for idx in 0..6 {
            client
                .record("big", json!({ "payload": "0123456789abcdef0123456789", "idx": idx }))
                .unwrap();
        }

        let size = fs::metadata(client.buffer_path()).unwrap().len();
        assert!(size <= 128);
        let buffer = fs::read_to_string(client.buffer_path()).unwrap();
        assert!(buffer.contains("\"idx\":5"));
    }

    #[test]
    fn sanitizes_tokens_and_emails() {
        let copy = sanitize_error_copy(
            "refresh failed for ops@plant.example with Bearer abc123 header",
        );
        assert_eq!(
            copy,
            "refresh failed for [email] with Bearer [redacted] header"
        );

        let jwt = format!("token {}.{}.{}", "a".repeat(20), "b".repeat(20), "c".repeat(10));
        assert_eq!(sanitize_error_copy(&jwt), "token [token]");
    }
}
