//! Test fixtures: synthetic photos and the upload parameters to send with them.

use std::io::Cursor;

/// One upload scenario.
#[derive(Debug, Clone)]
pub struct UploadFixture {
    pub name: &'static str,
    pub format: image::ImageFormat,
    pub mime: &'static str,
    pub width: u32,
    pub height: u32,
    pub scenario: &'static str,
    pub view_type: &'static str,
    pub message: Option<&'static str>,
}

impl UploadFixture {
    pub fn filename(&self) -> String {
        let ext = match self.format {
            image::ImageFormat::Jpeg => "jpg",
            _ => "png",
        };
        format!("{}.{}", self.name, ext)
    }

    pub fn bytes(&self) -> Vec<u8> {
        encode_photo(self.width, self.height, self.format)
    }
}

pub const UPLOAD_FIXTURES: &[UploadFixture] = &[
    UploadFixture {
        name: "rear_level1",
        format: image::ImageFormat::Png,
        mime: "image/png",
        width: 256,
        height: 384,
        scenario: "projection-level-1",
        view_type: "rear",
        message: None,
    },
    UploadFixture {
        name: "side_level2",
        format: image::ImageFormat::Jpeg,
        mime: "image/jpeg",
        width: 384,
        height: 512,
        scenario: "projection-level-2",
        view_type: "side",
        message: Some("keep it natural"),
    },
    UploadFixture {
        name: "rear_level3",
        format: image::ImageFormat::Jpeg,
        mime: "image/jpeg",
        width: 512,
        height: 768,
        scenario: "projection-level-3",
        view_type: "rear",
        message: Some("maximum projection, rounder shape"),
    },
];

/// A vertical gradient, enough to look like a photo to format sniffing.
pub fn encode_photo(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        let shade = (y * 255 / height.max(1)) as u8;
        image::Rgb([shade, 200u8.saturating_sub(shade / 2), (x % 256) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).expect("Failed to encode fixture image");
    out.into_inner()
}

/// Bytes that carry an image extension but no image.
pub fn not_an_image() -> Vec<u8> {
    b"%PDF-1.4 definitely not a photo".to_vec()
}
