use std::borrow::Cow;
use std::fs;
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use voxelme_contracts::{png_data_uri, Season, SourceImage};

use crate::config::EngineConfig;
use crate::error::GenerationError;
use crate::provider::{GenerateContentResponse, ImageProvider, ProviderRequest};

const FALLBACK_MEDIA_TYPE: &str = "image/png";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Standard padded base64 of the full file.
    pub data: String,
    pub media_type: String,
    pub byte_len: usize,
    /// Short sha256 prefix, for logs and events.
    pub fingerprint: String,
}

pub fn encode_image(image: &SourceImage) -> Result<EncodedImage, GenerationError> {
    let bytes: Cow<'_, [u8]> = match image {
        SourceImage::File { path, .. } => Cow::Owned(
            fs::read(path).map_err(|err| GenerationError::read(image.display_name(), err))?,
        ),
        SourceImage::Memory { bytes, .. } => Cow::Borrowed(bytes.as_slice()),
    };
    if bytes.is_empty() {
        return Err(GenerationError::read(image.display_name(), "file is empty"));
    }

    let media_type = image
        .declared_media_type()
        .map(str::to_string)
        .or_else(|| image.path().and_then(mime_for_path).map(str::to_string))
        .or_else(|| {
            image::guess_format(&bytes)
                .ok()
                .map(|format| format.to_mime_type().to_string())
        })
        .unwrap_or_else(|| FALLBACK_MEDIA_TYPE.to_string());

    Ok(EncodedImage {
        data: BASE64.encode(&bytes),
        media_type,
        byte_len: bytes.len(),
        fingerprint: short_fingerprint(&bytes),
    })
}

/// Instruction sent alongside the photo. Deterministic for a given season.
pub fn build_prompt(theme: Season) -> String {
    let hints = theme.hints().join(", ");
    format!(
        "Strictly follow these instructions:\n\
         Transform the person in this image into a cute, high-quality 3D voxel art character (3D pixel art style).\n\
         \n\
         Parameters:\n\
         - Season Theme: {label}\n\
         \n\
         Key requirements:\n\
         1. Style: Voxel art, 3D render, isometric view, cute \"chibi\" proportions (big head). High fidelity 3D pixels.\n\
         2. Fidelity: Maintain the person's key recognizable features (glasses, hair style, hair color, facial expression) but stylized.\n\
         3. Theme Adaptation ({label}): {hints}, {accents}.\n\
         4. Background: STRICTLY PURE WHITE BACKGROUND (#FFFFFF). No complex scenery. The character should be isolated.\n\
         5. Lighting: Soft, global illumination studio lighting suitable for 3D art.\n\
         6. Output: A single high-quality image of the character standing, full body.\n",
        label = theme.label(),
        hints = hints,
        accents = theme.accents(),
    )
}

/// First non-empty inline image across candidates, as a PNG data URI.
pub fn decode_result(response: &GenerateContentResponse) -> Result<String, GenerationError> {
    if response.candidates.is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    response
        .candidates
        .iter()
        .filter_map(|candidate| candidate.content.as_ref())
        .flat_map(|content| content.parts.iter())
        .filter_map(|part| part.inline_data.as_ref())
        .find(|inline| !inline.data.is_empty())
        .map(|inline| png_data_uri(&inline.data))
        .ok_or(GenerationError::NoImageData)
}

/// Stateless encode → prompt → call → decode pipeline.
#[derive(Clone)]
pub struct Transcoder {
    provider: Arc<dyn ImageProvider>,
    model: String,
    request_timeout: Option<Duration>,
}

impl Transcoder {
    pub fn new(provider: Arc<dyn ImageProvider>, config: &EngineConfig) -> Self {
        Self {
            provider,
            model: config.model().to_string(),
            request_timeout: config.request_timeout(),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn call_provider(
        &self,
        api_key: &str,
        image: EncodedImage,
        instruction: String,
    ) -> Result<GenerateContentResponse, GenerationError> {
        let request = ProviderRequest {
            model: self.model.clone(),
            api_key: api_key.to_string(),
            image,
            instruction,
            timeout: self.request_timeout,
        };
        let Some(timeout) = self.request_timeout else {
            return self.provider.generate(&request);
        };

        let (tx, rx) = mpsc::channel();
        let provider = Arc::clone(&self.provider);
        thread::Builder::new()
            .name("voxelme-provider-call".to_string())
            .spawn(move || {
                let _ = tx.send(provider.generate(&request));
            })
            .map_err(|err| {
                GenerationError::provider(None, format!("provider thread spawn failed: {err}"))
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(GenerationError::Timeout {
                seconds: timeout.as_secs_f64().ceil() as u64,
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(GenerationError::provider(
                None,
                "provider call ended without a response",
            )),
        }
    }

    pub fn run(
        &self,
        api_key: &str,
        image: &SourceImage,
        theme: Season,
    ) -> Result<String, GenerationError> {
        let encoded = encode_image(image)?;
        debug!(
            media_type = %encoded.media_type,
            bytes = encoded.byte_len,
            fingerprint = %encoded.fingerprint,
            "image encoded"
        );
        let instruction = build_prompt(theme);
        let response = self.call_provider(api_key, encoded, instruction)?;
        let image_reference = decode_result(&response)?;
        info!(
            provider = self.provider.name(),
            model = %self.model,
            %theme,
            candidates = response.candidates.len(),
            "generation produced an image"
        );
        Ok(image_reference)
    }
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

fn short_fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..8])
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;
    use voxelme_contracts::PNG_DATA_URI_PREFIX;

    use super::*;
    use crate::provider::{Candidate, Content, Part};

    fn arb_base64_payload() -> impl Strategy<Value = String> {
        "[A-Za-z0-9+/]{1,96}={0,2}"
    }

    proptest! {
        #[test]
        fn decoded_reference_carries_the_payload_byte_for_byte(payload in arb_base64_payload()) {
            let decoded = decode_result(&GenerateContentResponse::single_image(payload.clone()));
            prop_assert_eq!(decoded, Ok(format!("{PNG_DATA_URI_PREFIX}{payload}")));
        }

        /// Leading text parts and blank images never shadow the first real payload.
        #[test]
        fn first_non_empty_payload_wins(
            payload in arb_base64_payload(),
            chatter in proptest::collection::vec("[ -~]{0,24}", 0..4),
            blanks in 0usize..3,
        ) {
            let mut parts: Vec<Part> = chatter.into_iter().map(Part::text).collect();
            parts.extend((0..blanks).map(|_| Part::inline_image("")));
            parts.push(Part::inline_image(payload.clone()));
            parts.push(Part::inline_image("ZZZZ"));
            let response = GenerateContentResponse {
                candidates: vec![Candidate {
                    content: Some(Content { parts }),
                    finish_reason: None,
                }],
            };
            prop_assert_eq!(
                decode_result(&response),
                Ok(format!("{PNG_DATA_URI_PREFIX}{payload}"))
            );
        }
    }
}
