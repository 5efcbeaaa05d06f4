//! Photo → seasonal 3D voxel character generation.
//!
//! [`GenerationSession`] owns the Idle/Processing/Success/Error lifecycle and
//! drives one provider call per `generate()`. The [`transcoder`] module turns
//! the selected photo into a provider request and the provider's reply into a
//! displayable `data:` URI.

pub mod config;
pub mod error;
pub mod gemini;
pub mod provider;
pub mod session;
pub mod transcoder;

pub use config::EngineConfig;
pub use error::{GenerateRejected, GenerationError, Stage};
pub use gemini::GeminiProvider;
pub use provider::{GenerateContentResponse, ImageProvider, ProviderRequest};
pub use session::{CompletionOutcome, GenerationSession};
pub use transcoder::{build_prompt, decode_result, encode_image, EncodedImage, Transcoder};
pub use voxelme_contracts::{
    GenerationResult, LifecycleState, Season, SelectionState, SourceImage,
};
