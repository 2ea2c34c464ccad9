//! Barcode decoding for photographed cards.
//!
//! The decoder never fails loudly: fetch errors, unreadable images, and
//! images without a barcode all collapse to `None` plus a log line. Whether
//! the decoded text is a usable card code is the validator's business, not
//! ours.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Reads a barcode out of an image reachable by URL.
#[async_trait]
pub trait BarcodeDecoder: Send + Sync {
    /// Returns the decoded text, or `None` if no barcode could be read.
    async fn decode(&self, image_url: &str) -> Option<String>;
}

/// ZXing-based decoder: downloads the image, converts to grayscale, and runs
/// barcode detection.
pub struct RxingDecoder {
    client: reqwest::Client,
}

impl RxingDecoder {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for RxingDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BarcodeDecoder for RxingDecoder {
    async fn decode(&self, image_url: &str) -> Option<String> {
        let bytes = match self.fetch_image(image_url).await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "Failed to fetch photo for barcode scan");
                return None;
            }
        };

        // Detection is CPU-bound; keep it off the async workers.
        let decoded = tokio::task::spawn_blocking(move || decode_image(&bytes)).await;

        match decoded {
            Ok(Ok(text)) => {
                debug!(barcode = %text, "Barcode detected");
                Some(text)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "No barcode found in photo");
                None
            }
            Err(e) => {
                warn!(error = %e, "Barcode detection task failed");
                None
            }
        }
    }
}

impl RxingDecoder {
    async fn fetch_image(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let resp = self.client.get(url).send().await.context("image fetch")?;
        if !resp.status().is_success() {
            anyhow::bail!("image fetch returned {}", resp.status());
        }
        Ok(resp.bytes().await.context("image body")?.to_vec())
    }
}

/// Decode a barcode from raw image bytes.
fn decode_image(bytes: &[u8]) -> anyhow::Result<String> {
    let img = image::load_from_memory(bytes).context("image decode")?;
    let luma = img.to_luma8();
    let (width, height) = luma.dimensions();

    // detect_in_luma transposes its dimensions before handing them to the
    // luminance source (rxing 0.7.1, helpers.rs); go through the hints
    // variant, which forwards width and height as given.
    let result = rxing::helpers::detect_in_luma_with_hints(
        luma.into_raw(),
        width,
        height,
        None,
        &mut rxing::DecodeHints::default(),
    )
    .map_err(|e| anyhow!("barcode detection: {e}"))?;

    Ok(result.getText().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_are_not_a_barcode() {
        assert!(decode_image(b"definitely not an image").is_err());
    }

    // Render an EAN-13 barcode into a wide, non-square grayscale PNG.
    // "2001123456789" carries a valid EAN-13 check digit.
    fn barcode_png(code: &str) -> Vec<u8> {
        use rxing::Writer;

        let bits = rxing::oned::EAN13Writer::default()
            .encode(code, &rxing::BarcodeFormat::EAN_13, 400, 120)
            .unwrap();
        let gray = image::GrayImage::from_fn(bits.getWidth(), bits.getHeight(), |x, y| {
            image::Luma([if bits.get(x, y) { 0u8 } else { 255u8 }])
        });

        let mut bytes = Vec::new();
        gray.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
        bytes
    }

    #[test]
    fn decodes_a_card_barcode_from_a_non_square_image() {
        let png = barcode_png("2001123456789");
        assert_eq!(decode_image(&png).unwrap(), "2001123456789");
    }

    #[test]
    fn blank_image_has_no_barcode() {
        let img = image::DynamicImage::new_luma8(64, 64);
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();

        assert!(decode_image(&bytes).is_err());
    }

    #[tokio::test]
    async fn unreachable_url_decodes_to_none() {
        let decoder = RxingDecoder::new();
        assert_eq!(decoder.decode("http://127.0.0.1:1/photo.jpg").await, None);
    }
}
