//! HTTP client for Stability-style text-to-image and image-to-video endpoints.
//!
//! Video generation is asynchronous on the server: a submit call returns a job
//! id, and the result endpoint answers `202 Accepted` until the clip is ready.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::ApiConfig;
use crate::error::GenerationError;
use crate::generation::backend::GenerationBackend;

pub struct StabilityClient {
    client: Client,
    base_url: String,
    api_key: String,
    engine: String,
    still_size: (u32, u32),
    poll_interval: Duration,
    poll_timeout: Duration,
}

#[derive(Serialize)]
struct TextPrompt<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct TextToImageBody<'a> {
    text_prompts: Vec<TextPrompt<'a>>,
    cfg_scale: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u32>,
    width: u32,
    height: u32,
    samples: u32,
}

#[derive(Deserialize)]
struct VideoJob {
    id: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<String>,
}

impl StabilityClient {
    pub fn new<S: Into<String>>(config: &ApiConfig, api_key: S) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GenerationError::invalid(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, config, api_key))
    }

    pub fn with_client<S: Into<String>>(client: Client, config: &ApiConfig, api_key: S) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            engine: config.text_to_image_engine.clone(),
            still_size: (config.image_width, config.image_height),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
        }
    }

    /// Override polling cadence (tests use millisecond timings)
    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_timeout = timeout;
        self
    }

    async fn poll_video(&self, job_id: &str) -> Result<Vec<u8>, GenerationError> {
        let url = format!("{}/v2beta/image-to-video/result/{}", self.base_url, job_id);
        let deadline = Instant::now() + self.poll_timeout;

        loop {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.api_key)
                .header(ACCEPT, "video/*")
                .send()
                .await
                .map_err(transport_error)?;

            if response.status() == StatusCode::ACCEPTED {
                if Instant::now() >= deadline {
                    return Err(GenerationError::remote(
                        None,
                        format!(
                            "video job {} still in progress after {}s",
                            job_id,
                            self.poll_timeout.as_secs_f64()
                        ),
                    ));
                }
                debug!("Video job {} in progress, polling again", job_id);
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            let response = ensure_success(response).await?;
            let bytes = response.bytes().await.map_err(transport_error)?;
            return Ok(bytes.to_vec());
        }
    }
}

#[async_trait]
impl GenerationBackend for StabilityClient {
    fn name(&self) -> &str {
        "stability"
    }

    async fn text_to_image(
        &self,
        prompt: &str,
        cfg_scale: f64,
        seed: Option<u32>,
    ) -> Result<Vec<u8>, GenerationError> {
        let url = format!(
            "{}/v1/generation/{}/text-to-image",
            self.base_url, self.engine
        );
        let body = TextToImageBody {
            text_prompts: vec![TextPrompt { text: prompt }],
            cfg_scale,
            seed,
            width: self.still_size.0,
            height: self.still_size.1,
            samples: 1,
        };

        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "image/png")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let bytes = ensure_success(response)
            .await?
            .bytes()
            .await
            .map_err(transport_error)?;
        Ok(bytes.to_vec())
    }

    async fn image_to_video(
        &self,
        image: &[u8],
        motion_strength: f64,
        cfg_scale: f64,
        seed: Option<u32>,
    ) -> Result<Vec<u8>, GenerationError> {
        let url = format!("{}/v2beta/image-to-video", self.base_url);
        let image_part = Part::bytes(image.to_vec())
            .file_name("seed.png")
            .mime_str("image/png")
            .map_err(|e| GenerationError::invalid(format!("bad seed image part: {}", e)))?;

        let mut form = Form::new()
            .part("image", image_part)
            .text("cfg_scale", cfg_scale.to_string())
            .text("motion_bucket_id", (motion_strength.round() as u32).to_string());
        if let Some(seed) = seed {
            form = form.text("seed", seed.to_string());
        }

        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        let job: VideoJob = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| GenerationError::remote(None, format!("unexpected submit response: {}", e)))?;

        info!("Submitted video job {}", job.id);
        self.poll_video(&job.id).await
    }
}

fn transport_error(err: reqwest::Error) -> GenerationError {
    GenerationError::remote(err.status().map(|s| s.as_u16()), err.to_string())
}

/// Turn a non-2xx response into `GenerationError::Remote`, keeping the
/// server's own error text where it can be parsed.
async fn ensure_success(response: Response) -> Result<Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
        Ok(ApiErrorBody { message: Some(message), .. }) => message,
        _ if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        _ => body,
    };

    Err(GenerationError::remote(Some(status.as_u16()), message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> StabilityClient {
        let config = ApiConfig {
            base_url: base_url.to_string(),
            text_to_image_engine: "test-engine".to_string(),
            image_width: 64,
            image_height: 64,
            ..ApiConfig::default()
        };
        StabilityClient::new(&config, "secret")
            .unwrap()
            .with_polling(Duration::from_millis(10), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_text_to_image_posts_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/generation/test-engine/text-to-image"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "text_prompts": [{ "text": "a red kite" }],
                "cfg_scale": 7.0,
                "seed": 11,
                "samples": 1
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let image = client.text_to_image("a red kite", 7.0, Some(11)).await.unwrap();
        assert_eq!(image, b"png-bytes".to_vec());
    }

    #[tokio::test]
    async fn test_image_to_video_polls_until_ready() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2beta/image-to-video"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "job-1" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2beta/image-to-video/result/job-1"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "status": "in-progress" })))
            .with_priority(1)
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2beta/image-to-video/result/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4-bytes".to_vec()))
            .with_priority(2)
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let video = client.image_to_video(b"seed", 127.0, 1.8, None).await.unwrap();
        assert_eq!(video, b"mp4-bytes".to_vec());
    }

    #[tokio::test]
    async fn test_error_body_becomes_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2beta/image-to-video"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "name": "bad_request",
                "errors": ["motion_bucket_id: must be at most 255"]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.image_to_video(b"seed", 127.0, 1.8, None).await.unwrap_err();
        assert_eq!(
            err,
            GenerationError::remote(Some(400), "motion_bucket_id: must be at most 255")
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/generation/test-engine/text-to-image"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.text_to_image("x", 1.0, None).await.unwrap_err();
        assert!(matches!(err, GenerationError::Remote { status: Some(503), .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_poll_timeout_is_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2beta/image-to-video"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "slow" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2beta/image-to-video/result/slow"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let client = test_client(&server.uri())
            .with_polling(Duration::from_millis(5), Duration::from_millis(30));
        let err = client.image_to_video(b"seed", 127.0, 1.8, None).await.unwrap_err();
        assert!(matches!(err, GenerationError::Remote { status: None, .. }));
    }
}
