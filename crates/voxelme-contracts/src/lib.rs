pub mod events;
pub mod session;
pub mod themes;

pub use session::{
    png_data_uri, GenerationResult, LifecycleState, SelectionState, SourceImage,
    DEFAULT_DOWNLOAD_NAME, PNG_DATA_URI_PREFIX,
};
pub use themes::Season;
