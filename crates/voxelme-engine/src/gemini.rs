use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::GenerationError;
use crate::provider::{GenerateContentResponse, ImageProvider, ProviderRequest};

/// Google Gemini `generateContent` over HTTPS.
pub struct GeminiProvider {
    api_base: String,
    http: HttpClient,
}

impl GeminiProvider {
    /// The client itself carries no deadline; each request gets the
    /// configured bound, or none at all.
    pub fn new(config: &EngineConfig) -> Result<Self, GenerationError> {
        let http = HttpClient::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| {
                GenerationError::provider(None, format!("Gemini client setup failed: {err}"))
            })?;
        Ok(Self {
            api_base: config.api_base().to_string(),
            http,
        })
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(request: &ProviderRequest) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": request.image.media_type,
                            "data": request.image.data,
                        }
                    },
                    { "text": request.instruction },
                ],
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
            },
        })
    }
}

impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(
        &self,
        request: &ProviderRequest,
    ) -> Result<GenerateContentResponse, GenerationError> {
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request);
        debug!(%endpoint, media_type = %request.image.media_type, "sending Gemini request");

        let mut builder = self
            .http
            .post(&endpoint)
            .query(&[("key", request.api_key.as_str())])
            .json(&payload);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().map_err(|err| {
            // The URL carries the key as a query parameter.
            let err = err.without_url();
            transport_error(
                err.is_timeout(),
                request.timeout,
                err.status().map(|status| status.as_u16()),
                format!("Gemini request failed: {err}"),
            )
        })?;
        response_json_or_error(response)
    }
}

/// Only a deadline we actually set is reported as a timeout.
fn transport_error(
    timed_out: bool,
    bound: Option<Duration>,
    status: Option<u16>,
    message: String,
) -> GenerationError {
    match bound {
        Some(bound) if timed_out => GenerationError::Timeout {
            seconds: (bound.as_secs_f64().ceil() as u64).max(1),
        },
        _ => GenerationError::provider(status, message),
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<GenerateContentResponse, GenerationError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|err| {
        GenerationError::provider(
            Some(code),
            format!("Gemini response body read failed: {}", err.without_url()),
        )
    })?;
    if !status.is_success() {
        let detail = provider_error_message(&body);
        warn!(status = code, %detail, "Gemini rejected the request");
        return Err(GenerationError::provider(
            Some(code),
            format!("Gemini request failed ({code}): {detail}"),
        ));
    }
    serde_json::from_str(&body).map_err(|err| {
        GenerationError::provider(
            Some(code),
            format!("Gemini returned invalid JSON payload: {err}"),
        )
    })
}

/// Prefers `error.message` from Gemini's error envelope over the raw body.
fn provider_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| truncate_text(body.trim(), 512))
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;

    use mockito::Matcher;
    use serde_json::json;

    use super::*;
    use crate::provider::{Candidate, Content, InlineData, Part};
    use crate::transcoder::EncodedImage;

    fn request_for_test() -> ProviderRequest {
        ProviderRequest {
            model: "gemini-2.5-flash-image".to_string(),
            api_key: "test-key".to_string(),
            image: EncodedImage {
                data: "/9j/4AAQ".to_string(),
                media_type: "image/jpeg".to_string(),
                byte_len: 6,
                fingerprint: "00".to_string(),
            },
            instruction: "make it voxel".to_string(),
            timeout: None,
        }
    }

    fn provider_for(server: &mockito::ServerGuard) -> GeminiProvider {
        GeminiProvider::new(&EngineConfig::default().with_api_base(server.url()))
            .expect("client builds")
    }

    /// Base URL of a socket that accepts connections and never answers.
    fn silent_endpoint() -> anyhow::Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming().flatten() {
                held.push(stream);
            }
        });
        Ok(format!("http://{addr}"))
    }

    #[test]
    fn endpoint_accepts_bare_and_prefixed_model_names() -> anyhow::Result<()> {
        let provider = GeminiProvider::new(&EngineConfig::default())?;
        assert_eq!(
            provider.endpoint_for_model("gemini-2.5-flash-image"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
        assert_eq!(
            provider.endpoint_for_model(" models/custom "),
            "https://generativelanguage.googleapis.com/v1beta/models/custom:generateContent"
        );
        Ok(())
    }

    #[test]
    fn silent_server_hits_the_request_bound() -> anyhow::Result<()> {
        let provider =
            GeminiProvider::new(&EngineConfig::default().with_api_base(silent_endpoint()?))?;
        let mut request = request_for_test();
        request.timeout = Some(Duration::from_millis(200));

        let started = Instant::now();
        let err = provider.generate(&request).err();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(err, Some(GenerationError::Timeout { seconds: 1 }));
        assert!(!matches!(err, Some(GenerationError::Provider { .. })));
        Ok(())
    }

    #[test]
    fn unbounded_request_keeps_waiting_on_a_silent_server() -> anyhow::Result<()> {
        let provider =
            GeminiProvider::new(&EngineConfig::default().with_api_base(silent_endpoint()?))?;
        let (tx, rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(provider.generate(&request_for_test()));
        });
        // Nothing may come back while the server stays quiet.
        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
        Ok(())
    }

    #[test]
    fn timeouts_without_a_bound_are_provider_failures() {
        let err = transport_error(true, None, None, "Gemini request failed: timed out".to_string());
        assert_eq!(
            err,
            GenerationError::Provider {
                status: None,
                message: "Gemini request failed: timed out".to_string(),
            }
        );
        let err = transport_error(true, Some(Duration::from_millis(1)), None, String::new());
        assert_eq!(err, GenerationError::Timeout { seconds: 1 });
        let err = transport_error(false, Some(Duration::from_secs(5)), Some(502), "bad".to_string());
        assert_eq!(
            err,
            GenerationError::Provider {
                status: Some(502),
                message: "bad".to_string(),
            }
        );
    }

    #[test]
    fn posts_image_prompt_and_image_modality() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/models/gemini-2.5-flash-image:generateContent")
            .match_query(Matcher::UrlEncoded("key".into(), "test-key".into()))
            .match_body(Matcher::Json(json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        {"inlineData": {"mimeType": "image/jpeg", "data": "/9j/4AAQ"}},
                        {"text": "make it voxel"}
                    ]
                }],
                "generationConfig": {"responseModalities": ["IMAGE"]}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "candidates": [{"content": {"parts": [{"inlineData": {"mimeType": "image/png", "data": "AAAA"}}]}}]
                })
                .to_string(),
            )
            .create();

        let response = provider_for(&server).generate(&request_for_test())?;
        mock.assert();
        let expected = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content {
                    parts: vec![Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: Some("image/png".to_string()),
                            data: "AAAA".to_string(),
                        }),
                    }],
                }),
                finish_reason: None,
            }],
        };
        assert_eq!(response, expected);
        Ok(())
    }

    #[test]
    fn quota_rejection_surfaces_provider_message() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/models/gemini-2.5-flash-image:generateContent")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body(
                json!({"error": {"code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED"}})
                    .to_string(),
            )
            .create();

        let err = provider_for(&server).generate(&request_for_test()).err();
        assert_eq!(
            err,
            Some(GenerationError::Provider {
                status: Some(429),
                message: "Gemini request failed (429): Resource has been exhausted".to_string(),
            })
        );
    }

    #[test]
    fn auth_failure_with_plain_body_is_truncated_verbatim() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/models/gemini-2.5-flash-image:generateContent")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("unauthorized")
            .create();

        let err = provider_for(&server).generate(&request_for_test()).err();
        assert_eq!(
            err,
            Some(GenerationError::Provider {
                status: Some(401),
                message: "Gemini request failed (401): unauthorized".to_string(),
            })
        );
    }

    #[test]
    fn invalid_json_is_a_provider_error() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/models/gemini-2.5-flash-image:generateContent")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>gateway</html>")
            .create();

        let err = provider_for(&server).generate(&request_for_test()).err();
        assert!(matches!(
            err,
            Some(GenerationError::Provider { status: Some(200), .. })
        ));
    }

    #[test]
    fn connection_failure_does_not_leak_the_key() -> anyhow::Result<()> {
        let provider =
            GeminiProvider::new(&EngineConfig::default().with_api_base("http://127.0.0.1:1"))?;
        match provider.generate(&request_for_test()) {
            Err(GenerationError::Provider { status, message }) => {
                assert_eq!(status, None);
                assert!(message.starts_with("Gemini request failed"));
                assert!(!message.contains("test-key"));
            }
            other => panic!("expected provider error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(600);
        let message = provider_error_message(&body);
        assert_eq!(message.chars().count(), 513);
        assert!(message.ends_with('…'));
    }
}
