use automaton_core_types::FrameIdx;
use serde::{Deserialize, Serialize};

/// A single visual frame produced by [`crate::driver::BrowserDriver::snapshot`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Frame {
    pub id: FrameIdx,
    pub url: String,
    pub title: String,
    /// Base64-encoded JPEG.
    pub data_base64: String,
}
