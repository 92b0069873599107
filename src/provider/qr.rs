//! PNG QR code rendering for payment requests

use anyhow::{Context, Result};
use image::{ImageFormat, Luma};
use qrcode::QrCode;
use std::io::Cursor;

use super::QrRenderer;

pub struct PngQrRenderer {
    /// Pixels per QR module
    pub module_px: u32,
}

impl Default for PngQrRenderer {
    fn default() -> Self {
        Self { module_px: 10 }
    }
}

impl QrRenderer for PngQrRenderer {
    fn render(&self, payload: &str) -> Result<Vec<u8>> {
        let code = QrCode::new(payload.as_bytes()).context("payload does not fit a QR code")?;
        let image = code
            .render::<Luma<u8>>()
            .module_dimensions(self.module_px, self.module_px)
            .quiet_zone(true)
            .build();

        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("encoding QR code as PNG")?;
        Ok(bytes)
    }
}
