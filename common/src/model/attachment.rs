use serde::{Deserialize, Serialize};

/// Reference from a field value into the content-addressed attachment store.
///
/// `hash` doubles as the blob's filename in the store. The serialized names
/// match the hidden inputs the edit page posts back for retained files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub hash: String,
    #[serde(rename = "filename")]
    pub display_name: String,
    #[serde(rename = "mimetype")]
    pub mime_type: String,
}

/// Media types an upload may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedMedia {
    Png,
    Jpeg,
    Pdf,
}

impl SupportedMedia {
    pub const ALL: [SupportedMedia; 3] = [SupportedMedia::Png, SupportedMedia::Jpeg, SupportedMedia::Pdf];

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => Some(SupportedMedia::Png),
            "image/jpeg" | "image/jpg" => Some(SupportedMedia::Jpeg),
            "application/pdf" => Some(SupportedMedia::Pdf),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            SupportedMedia::Png => "image/png",
            SupportedMedia::Jpeg => "image/jpeg",
            SupportedMedia::Pdf => "application/pdf",
        }
    }

    /// Extension used when a blob is copied out for the LaTeX compiler.
    pub fn extension(self) -> &'static str {
        match self {
            SupportedMedia::Png => "png",
            SupportedMedia::Jpeg => "jpg",
            SupportedMedia::Pdf => "pdf",
        }
    }

    /// `image/png;image/jpeg;application/pdf`, for error messages.
    pub fn describe_all() -> String {
        Self::ALL
            .iter()
            .map(|m| m.mime())
            .collect::<Vec<_>>()
            .join(";")
    }
}
