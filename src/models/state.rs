use serde::{ Deserialize, Serialize };

/// Transient per-conversation request flags. Never persisted.
///
/// At most one of `loading` / `generating_image` is set at a time, and
/// `progress` is 0 whenever `generating_image` is false.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestState {
    pub loading: bool,
    pub generating_image: bool,
    pub progress: u8,
}

impl RequestState {
    pub fn is_busy(&self) -> bool {
        self.loading || self.generating_image
    }
}
