//! QR challenge rendering.

use std::io::Cursor;

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    image::{DynamicImage, ImageFormat, Luma},
    qrcode::QrCode,
};

use crate::error::{Error, Result};

const MIN_SIZE: u32 = 256;

/// Render a raw QR payload to a `data:image/png;base64,...` URL.
pub fn render_data_url(payload: &str) -> Result<String> {
    if payload.is_empty() {
        return Err(Error::Qr("empty payload".into()));
    }
    let code = QrCode::new(payload.as_bytes()).map_err(|e| Error::Qr(e.to_string()))?;
    let img = code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_SIZE, MIN_SIZE)
        .build();

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| Error::Qr(e.to_string()))?;

    Ok(format!("data:image/png;base64,{}", STANDARD.encode(&png)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_png_data_url() {
        let url = render_data_url("2@abc,def,ghi==").unwrap();
        let encoded = url.strip_prefix("data:image/png;base64,").unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(render_data_url(""), Err(Error::Qr(_))));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let huge = "x".repeat(8_000);
        assert!(matches!(render_data_url(&huge), Err(Error::Qr(_))));
    }
}
