//! QR code rendering for the login page

use base64::{engine::general_purpose::STANDARD, Engine};
use qrcode::render::svg;
use qrcode::{EcLevel, QrCode};

use crate::error::{Result, WhatsAppError};

const MIN_DIMENSION: u32 = 300;

/// Render a raw pairing payload as an SVG data URL
pub fn render_data_url(raw: &str) -> Result<String> {
    let payload = raw.trim();
    if payload.is_empty() {
        return Err(WhatsAppError::Qr("QR payload is empty".to_string()));
    }

    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::H)
        .map_err(|e| WhatsAppError::Qr(format!("Failed to encode QR payload: {}", e)))?;

    let image = code
        .render::<svg::Color>()
        .min_dimensions(MIN_DIMENSION, MIN_DIMENSION)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .quiet_zone(true)
        .build();

    Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)))
}
