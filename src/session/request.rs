//! Inbound requests and their validation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::artifact::SiteArtifact;
use crate::error::GenerationError;
use crate::upstream::{CompletionRequest, prompt};

/// Largest accepted image, in decoded bytes.
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

const DEFAULT_IMAGE_MIME: &str = "image/png";

// ---------------------------------------------------------------------------
// ImageInput
// ---------------------------------------------------------------------------

/// A validated, base64-encoded image.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageInput {
    mime: String,
    data: String,
}

impl std::fmt::Debug for ImageInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageInput")
            .field("mime", &self.mime)
            .field("encoded_len", &self.data.len())
            .finish()
    }
}

impl ImageInput {
    /// Encode raw image bytes, sniffing the MIME type from magic bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GenerationError> {
        check_size(bytes.len())?;
        Ok(Self {
            mime: sniff_mime(bytes).to_string(),
            data: STANDARD.encode(bytes),
        })
    }

    /// Parse a browser `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(url: &str) -> Result<Self, GenerationError> {
        let invalid = || GenerationError::Validation("Invalid image data.".to_string());

        let rest = url.trim().strip_prefix("data:").ok_or_else(invalid)?;
        let (header, payload) = rest.split_once(',').ok_or_else(invalid)?;
        let declared = header.strip_suffix(";base64").ok_or_else(invalid)?;

        let bytes = STANDARD.decode(payload.trim()).map_err(|_| invalid())?;
        check_size(bytes.len())?;

        let mime = if declared.starts_with("image/") {
            declared.to_string()
        } else {
            sniff_mime(&bytes).to_string()
        };
        Ok(Self {
            mime,
            data: STANDARD.encode(&bytes),
        })
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.data)
    }
}

fn check_size(len: usize) -> Result<(), GenerationError> {
    if len == 0 {
        return Err(GenerationError::Validation(
            "Please upload an image.".to_string(),
        ));
    }
    if len > MAX_IMAGE_BYTES {
        return Err(GenerationError::Validation(format!(
            "Image is too large ({:.1} MB). The limit is 20 MB.",
            len as f64 / (1024.0 * 1024.0)
        )));
    }
    Ok(())
}

/// MIME type from magic bytes. Unknown formats default to PNG.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => DEFAULT_IMAGE_MIME,
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A fresh generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationRequest {
    Text {
        prompt: String,
    },
    Image {
        image: ImageInput,
        aux_instruction: Option<String>,
    },
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self::Text {
            prompt: prompt.into(),
        }
    }

    pub fn image(bytes: &[u8], aux_instruction: Option<String>) -> Result<Self, GenerationError> {
        Ok(Self::Image {
            image: ImageInput::from_bytes(bytes)?,
            aux_instruction,
        })
    }

    pub fn from_data_url(
        url: &str,
        aux_instruction: Option<String>,
    ) -> Result<Self, GenerationError> {
        Ok(Self::Image {
            image: ImageInput::from_data_url(url)?,
            aux_instruction,
        })
    }

    pub fn validate(&self) -> Result<(), GenerationError> {
        match self {
            Self::Text { prompt } if prompt.trim().is_empty() => Err(GenerationError::Validation(
                "Please describe the website you want to generate.".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Text stored alongside the result in history.
    pub fn label(&self) -> String {
        match self {
            Self::Text { prompt } => prompt.trim().to_string(),
            Self::Image {
                aux_instruction, ..
            } => aux_instruction
                .as_deref()
                .map(str::trim)
                .filter(|aux| !aux.is_empty())
                .unwrap_or("Image upload")
                .to_string(),
        }
    }

    pub fn source_image(&self) -> Option<String> {
        match self {
            Self::Text { .. } => None,
            Self::Image { image, .. } => Some(image.data_url()),
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image { .. })
    }

    pub(crate) fn completion_request(&self) -> CompletionRequest {
        match self {
            Self::Text { prompt } => prompt::text_generation(prompt),
            Self::Image {
                image,
                aux_instruction,
            } => prompt::image_generation(&image.data_url(), aux_instruction.as_deref()),
        }
    }
}

/// An edit of an existing artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationRequest {
    pub current: SiteArtifact,
    pub instruction: String,
}

impl ModificationRequest {
    pub fn new(current: SiteArtifact, instruction: impl Into<String>) -> Self {
        let mut current = current;
        current.fill_placeholders();
        Self {
            current,
            instruction: instruction.into(),
        }
    }

    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.instruction.trim().is_empty() {
            return Err(GenerationError::Validation(
                "Please describe the change you want to make.".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn completion_request(&self) -> CompletionRequest {
        prompt::modification(&self.current, &self.instruction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::SectionKind;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(PNG_HEADER), "image/png");
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_mime(b"GIF89a"), "image/gif");
        assert_eq!(sniff_mime(b"RIFF\x10\x00\x00\x00WEBPVP8 "), "image/webp");
        assert_eq!(sniff_mime(b"RIFF\x10\x00\x00\x00WAVE"), "image/png");
        assert_eq!(sniff_mime(b"??"), "image/png");
    }

    #[test]
    fn test_image_from_bytes() {
        let image = ImageInput::from_bytes(b"GIF89a....").unwrap();
        assert_eq!(image.mime(), "image/gif");
        assert!(image.data_url().starts_with("data:image/gif;base64,R0lGODlh"));
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let err = GenerationRequest::image(&[], None).unwrap_err();
        assert!(matches!(err, GenerationError::Validation(_)));
    }

    #[test]
    fn test_oversized_image_is_rejected() {
        let bytes = vec![0u8; MAX_IMAGE_BYTES + 1];
        let err = ImageInput::from_bytes(&bytes).unwrap_err();
        assert!(err.user_message().contains("too large"));
    }

    #[test]
    fn test_from_data_url() {
        let url = format!("data:image/jpeg;base64,{}", STANDARD.encode(PNG_HEADER));
        let request = GenerationRequest::from_data_url(&url, Some("make it blue".into())).unwrap();
        assert_eq!(request.source_image().unwrap(), url);
        assert_eq!(request.label(), "make it blue");
        assert!(request.is_image());
    }

    #[test]
    fn test_from_data_url_sniffs_generic_mime() {
        let url = format!("data:application/octet-stream;base64,{}", STANDARD.encode(b"GIF87a"));
        let image = ImageInput::from_data_url(&url).unwrap();
        assert_eq!(image.mime(), "image/gif");
    }

    #[test]
    fn test_from_data_url_rejects_garbage() {
        for url in ["", "image/png;base64,AAAA", "data:image/png,AAAA", "data:image/png;base64,!!!"] {
            assert!(
                matches!(ImageInput::from_data_url(url), Err(GenerationError::Validation(_))),
                "{url}"
            );
        }
    }

    #[test]
    fn test_blank_prompt_is_rejected() {
        assert!(GenerationRequest::text("   ").validate().is_err());
        assert!(GenerationRequest::text("a portfolio").validate().is_ok());
    }

    #[test]
    fn test_modification_requires_instruction() {
        let request = ModificationRequest::new(SiteArtifact::default(), " ");
        assert!(request.validate().is_err());

        let request = ModificationRequest::new(SiteArtifact::from_parts("<p>x</p>", "", ""), "bigger");
        assert!(request.validate().is_ok());
        assert_eq!(request.current.get(SectionKind::Css), SectionKind::Css.placeholder());
    }
}
