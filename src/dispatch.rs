// ABOUTME: Turns dispatched messages into file writes and/or HTTP pushes to an LIS endpoint
// ABOUTME: Sinks are independent and optional; a message is handed to every sink that's configured

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use url::Url;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::message::Message;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to write {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("HIS endpoint rejected the message after {attempts} attempts: {last_error}")]
    HttpExhausted { attempts: u32, last_error: String },
}

/// Writes each dispatched message to its own file, named by arrival order.
///
/// Mirrors the "write to temp, then rename" pattern so a reader never
/// observes a partially written file.
pub struct FileSink {
    dir: PathBuf,
    counter: std::sync::atomic::AtomicU64,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileSink {
            dir: dir.into(),
            counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub async fn write(&self, message: &Message) -> Result<(), DispatchError> {
        let n = self.counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let millis = unix_millis();
        let name = format!("{millis}-{n}.txt");
        let final_path = self.dir.join(&name);
        let tmp_path = self.dir.join(format!("{name}.tmp"));

        fs::write(&tmp_path, &message.raw)
            .await
            .map_err(|source| DispatchError::FileWrite { path: tmp_path.clone(), source })?;
        fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|source| DispatchError::FileWrite { path: final_path.clone(), source })?;

        debug!(path = %final_path.display(), "wrote message to file sink");
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Envelope posted to the LIS HTTP endpoint, per spec.md's wire format.
#[derive(Debug, Serialize)]
struct PushEnvelope<'a> {
    consumer: &'a str,
    messages: Vec<&'a str>,
}

/// Pushes dispatched messages to an HTTP LIS endpoint with basic auth and a
/// fixed-delay retry loop, grounded on the same attempt-then-sleep shape the
/// pack's HIS client uses for its own lab-results push.
pub struct HttpSink {
    client: reqwest::Client,
    url: Url,
    consumer: String,
    retries: u32,
    delay: Duration,
}

impl HttpSink {
    pub fn new(url: Url, consumer: String, retries: u32, delay: Duration, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builder with only timeout configured never fails");
        HttpSink { client, url, consumer, retries, delay }
    }

    pub async fn push(&self, message: &Message) -> Result<(), DispatchError> {
        let envelope = PushEnvelope {
            consumer: &self.consumer,
            messages: vec![message.raw.as_str()],
        };

        let mut last_error = String::new();
        for attempt in 1..=self.retries.max(1) {
            match self.send_once(&envelope).await {
                Ok(()) => {
                    info!(attempt, url = %self.url, "pushed message to LIS endpoint");
                    return Ok(());
                }
                Err(e) => {
                    last_error = e;
                    warn!(attempt, error = %last_error, "push to LIS endpoint failed");
                    if attempt < self.retries {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }

        error!(attempts = self.retries, "exhausted retries pushing to LIS endpoint");
        Err(DispatchError::HttpExhausted { attempts: self.retries, last_error })
    }

    async fn send_once(&self, envelope: &PushEnvelope<'_>) -> Result<(), String> {
        let mut request = self.client.post(self.url.clone()).json(envelope);
        if !self.url.username().is_empty() {
            request = request.basic_auth(self.url.username(), self.url.password());
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(format!("HTTP {status}: {body}"))
        }
    }
}

/// Fans a dispatched message out to whichever sinks are configured. Neither
/// sink's failure affects the other; both failures are logged but never
/// propagated back into the session's Fsm loop (spec.md's invariant that a
/// downstream outage never blocks acknowledging the instrument).
pub struct Dispatcher {
    file: Option<FileSink>,
    http: Option<HttpSink>,
}

impl Dispatcher {
    pub fn new(file: Option<FileSink>, http: Option<HttpSink>) -> Self {
        Dispatcher { file, http }
    }

    pub async fn dispatch(&self, message: Message) {
        if let Some(file) = &self.file {
            if let Err(e) = file.write(&message).await {
                error!(error = %e, "file sink failed");
            }
        }
        if let Some(http) = &self.http {
            if let Err(e) = http.push(&message).await {
                error!(error = %e, "http sink failed");
            }
        }
    }
}

fn unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after the unix epoch")
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_sink_writes_raw_text_and_renames_from_tmp() {
        let dir = std::env::temp_dir().join(format!("astm-gateway-test-{}", unix_millis()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let sink = FileSink::new(&dir);

        let message = Message {
            records: vec![],
            raw: "H|\\^&|||cobas\rL|1|N".to_string(),
        };
        sink.write(&message).await.unwrap();

        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        let mut found = None;
        while let Some(entry) = entries.next_entry().await.unwrap() {
            found = Some(entry.path());
        }
        let path = found.expect("one file written");
        assert!(!path.to_string_lossy().ends_with(".tmp"));
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, message.raw);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
