use image::ImageFormat;

/// Image formats accepted for uploads and generation results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
}

impl ImageKind {
    /// Detect the format from the leading bytes, ignoring any client-supplied type.
    pub fn detect(data: &[u8]) -> Result<Self, ImageKindError> {
        match image::guess_format(data) {
            Ok(ImageFormat::Jpeg) => Ok(ImageKind::Jpeg),
            Ok(ImageFormat::Png) => Ok(ImageKind::Png),
            Ok(ImageFormat::WebP) => Ok(ImageKind::Webp),
            Ok(other) => Err(ImageKindError::Unsupported(format!("{other:?}"))),
            Err(_) => Err(ImageKindError::NotAnImage),
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Webp => "webp",
        }
    }

    /// `data:` URI for backends that take inline images.
    pub fn data_uri(self, data: &[u8]) -> String {
        use base64::Engine;
        format!(
            "data:{};base64,{}",
            self.mime(),
            base64::engine::general_purpose::STANDARD.encode(data)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageKindError {
    #[error("Data is not a recognizable image")]
    NotAnImage,

    #[error("Unsupported image format: {0}")]
    Unsupported(String),
}
