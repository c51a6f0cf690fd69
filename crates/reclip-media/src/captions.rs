//! AssemblyAI client for word-level transcripts.
//!
//! Flow: upload the clip bytes, create a transcript job for the returned
//! URL, then poll until it completes or errors.

use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use crate::error::{MediaError, MediaResult};

const DEFAULT_BASE_URL: &str = "https://api.assemblyai.com";

/// A transcribed word with its timing in the source clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptWord {
    pub text: String,
    #[serde(rename = "start")]
    pub start_ms: u64,
    #[serde(rename = "end")]
    pub end_ms: u64,
}

/// Caption provider configuration.
#[derive(Debug, Clone)]
pub struct CaptionConfig {
    pub base_url: String,
    /// Used when a job does not carry its own key
    pub api_key: Option<String>,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            poll_interval: Duration::from_secs(3),
            timeout: Duration::from_secs(600),
        }
    }
}

impl CaptionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("ASSEMBLYAI_BASE_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("ASSEMBLYAI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            poll_interval: std::env::var("ASSEMBLYAI_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            timeout: std::env::var("ASSEMBLYAI_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Pick the job's key, falling back to the configured one.
    pub fn resolve_key(&self, job_key: Option<&str>) -> Option<String> {
        job_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .or_else(|| self.api_key.clone())
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    id: String,
    status: String,
    #[serde(default)]
    words: Option<Vec<TranscriptWord>>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the caption provider.
#[derive(Debug, Clone)]
pub struct CaptionClient {
    http: Client,
    base_url: Url,
    config: CaptionConfig,
}

impl CaptionClient {
    pub fn new(config: CaptionConfig) -> MediaResult<Self> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        let http = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            http,
            base_url,
            config,
        })
    }

    pub fn config(&self) -> &CaptionConfig {
        &self.config
    }

    /// Transcribe a media file and return its words in time order.
    pub async fn transcribe(&self, path: &Path, api_key: &str) -> MediaResult<Vec<TranscriptWord>> {
        let audio_url = self.upload(path, api_key).await?;
        let transcript_id = self.create_transcript(&audio_url, api_key).await?;
        self.wait_for_words(&transcript_id, api_key).await
    }

    async fn upload(&self, path: &Path, api_key: &str) -> MediaResult<String> {
        let file = tokio::fs::File::open(path).await?;
        let response = self
            .http
            .post(self.base_url.join("v2/upload")?)
            .header("authorization", api_key)
            .header("content-type", "application/octet-stream")
            .body(reqwest::Body::from(file))
            .send()
            .await?
            .error_for_status()?;

        let body: UploadResponse = response.json().await?;
        debug!("Uploaded {} for transcription", path.display());
        Ok(body.upload_url)
    }

    async fn create_transcript(&self, audio_url: &str, api_key: &str) -> MediaResult<String> {
        let response = self
            .http
            .post(self.base_url.join("v2/transcript")?)
            .header("authorization", api_key)
            .json(&json!({ "audio_url": audio_url, "speech_model": "best" }))
            .send()
            .await?
            .error_for_status()?;

        let body: TranscriptResponse = response.json().await?;
        info!(transcript_id = %body.id, "Created transcript");
        Ok(body.id)
    }

    async fn wait_for_words(&self, transcript_id: &str, api_key: &str) -> MediaResult<Vec<TranscriptWord>> {
        let url = self.base_url.join(&format!("v2/transcript/{}", transcript_id))?;
        let deadline = tokio::time::Instant::now() + self.config.timeout;

        loop {
            let body: TranscriptResponse = self
                .http
                .get(url.clone())
                .header("authorization", api_key)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            match body.status.as_str() {
                "completed" => {
                    let mut words = body.words.unwrap_or_default();
                    words.sort_by_key(|w| w.start_ms);
                    return Ok(words);
                }
                "error" => {
                    return Err(MediaError::transcription(
                        body.error.unwrap_or_else(|| "unknown error".to_string()),
                    ));
                }
                _ => {}
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(MediaError::Timeout(self.config.timeout.as_secs()));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

/// Words that start before `limit_ms`.
pub fn words_before(words: Vec<TranscriptWord>, limit_ms: u64) -> Vec<TranscriptWord> {
    words.into_iter().filter(|w| w.start_ms < limit_ms).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> CaptionClient {
        CaptionClient::new(CaptionConfig {
            base_url: server.uri(),
            api_key: None,
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    async fn clip() -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");
        tokio::fs::write(&path, b"not really a video").await.unwrap();
        (dir, path)
    }

    async fn mount_upload_and_create(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v2/upload"))
            .and(header("authorization", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "upload_url": "https://cdn.example/abc"
            })))
            .expect(1)
            .mount(server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v2/transcript"))
            .and(header("authorization", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "tr_1",
                "status": "queued"
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_transcribe_polls_until_completed() {
        let server = MockServer::start().await;
        mount_upload_and_create(&server).await;

        Mock::given(method("GET"))
            .and(path("/v2/transcript/tr_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "tr_1",
                "status": "processing"
            })))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v2/transcript/tr_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "tr_1",
                "status": "completed",
                "words": [
                    {"text": "world", "start": 500, "end": 900, "confidence": 0.9},
                    {"text": "hello", "start": 0, "end": 450, "confidence": 0.99}
                ]
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        let (_dir, clip) = clip().await;
        let words = client(&server).transcribe(&clip, "secret").await.unwrap();

        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "hello");
        assert_eq!(words[1].start_ms, 500);
        assert_eq!(words[1].end_ms, 900);
    }

    #[tokio::test]
    async fn test_transcript_error_status() {
        let server = MockServer::start().await;
        mount_upload_and_create(&server).await;

        Mock::given(method("GET"))
            .and(path("/v2/transcript/tr_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "tr_1",
                "status": "error",
                "error": "audio too short"
            })))
            .mount(&server)
            .await;

        let (_dir, clip) = clip().await;
        let err = client(&server).transcribe(&clip, "secret").await.unwrap_err();
        assert!(matches!(err, MediaError::Transcription(ref m) if m == "audio too short"));
    }

    #[tokio::test]
    async fn test_rejected_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/upload"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let (_dir, clip) = clip().await;
        let err = client(&server).transcribe(&clip, "bad").await.unwrap_err();
        assert!(matches!(err, MediaError::Http(_)));
    }

    #[test]
    fn test_resolve_key() {
        let config = CaptionConfig {
            api_key: Some("env-key".into()),
            ..CaptionConfig::default()
        };
        assert_eq!(config.resolve_key(Some("job-key")).as_deref(), Some("job-key"));
        assert_eq!(config.resolve_key(Some("  ")).as_deref(), Some("env-key"));
        assert_eq!(config.resolve_key(None).as_deref(), Some("env-key"));
        assert_eq!(CaptionConfig::default().resolve_key(None), None);
    }

    #[test]
    fn test_words_before() {
        let words = vec![
            TranscriptWord { text: "a".into(), start_ms: 100, end_ms: 200 },
            TranscriptWord { text: "b".into(), start_ms: 7_000, end_ms: 7_400 },
        ];
        let kept = words_before(words, 7_000);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "a");
    }
}
