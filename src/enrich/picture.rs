//! Picture enrichment: classification from pixel statistics, and
//! descriptions from a vision model.

use super::Enricher;
use crate::backend::vlm::VisionClient;
use crate::document::{DocumentTree, PictureClass};
use crate::error::EnrichmentError;
use crate::prompts::PICTURE_DESCRIPTION_PROMPT;
use futures::future::BoxFuture;
use std::collections::HashSet;
use tracing::debug;

/// Longest edge of the sampling grid.
const SAMPLE_EDGE: u32 = 128;

/// Summary statistics over a sampled grid of pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelStats {
    pub width: u32,
    pub height: u32,
    /// Share of near-white pixels.
    pub white: f32,
    /// Share of pixels with no hue (r ≈ g ≈ b).
    pub grey: f32,
    /// Share of strongly saturated pixels.
    pub saturated: f32,
    /// Number of distinct colours after quantising to 4 bits per channel.
    pub palette: usize,
}

impl PixelStats {
    pub fn from_png(png: &[u8]) -> Result<Self, image::ImageError> {
        let img = image::load_from_memory(png)?.to_rgb8();
        let (width, height) = img.dimensions();
        let step = (width.max(height) / SAMPLE_EDGE).max(1);

        let mut total = 0u32;
        let (mut white, mut grey, mut saturated) = (0u32, 0u32, 0u32);
        let mut palette = HashSet::new();
        for y in (0..height).step_by(step as usize) {
            for x in (0..width).step_by(step as usize) {
                let [r, g, b] = img.get_pixel(x, y).0;
                let max = r.max(g).max(b);
                let min = r.min(g).min(b);
                total += 1;
                if min > 230 {
                    white += 1;
                }
                if max - min < 16 {
                    grey += 1;
                }
                if max - min > 48 {
                    saturated += 1;
                }
                palette.insert((r >> 4, g >> 4, b >> 4));
            }
        }
        let share = |n: u32| n as f32 / total.max(1) as f32;
        Ok(Self {
            width,
            height,
            white: share(white),
            grey: share(grey),
            saturated: share(saturated),
            palette: palette.len(),
        })
    }

    /// Map statistics to a label with a heuristic confidence.
    pub fn classify(&self) -> PictureClass {
        let (label, confidence) = if self.width.max(self.height) <= 256 && self.palette <= 48 {
            ("logo", 0.6)
        } else if self.white > 0.5 && self.grey > 0.95 {
            ("scanned_text", 0.7)
        } else if self.white > 0.45 && self.palette < 96 && self.saturated > 0.02 {
            ("chart", 0.6)
        } else if self.white > 0.35 && self.palette < 160 {
            ("diagram", 0.5)
        } else {
            ("photograph", 0.6)
        };
        PictureClass {
            label: label.to_string(),
            confidence,
        }
    }
}

pub struct PictureClassifier;

impl Enricher for PictureClassifier {
    fn name(&self) -> &str {
        "picture_classes"
    }

    fn enrich<'a>(
        &'a self,
        doc: &'a mut DocumentTree,
    ) -> BoxFuture<'a, Result<usize, EnrichmentError>> {
        Box::pin(async move {
            let mut changed = 0;
            for picture in doc.pictures_mut() {
                let stats = PixelStats::from_png(&picture.png).map_err(|e| {
                    EnrichmentError::new(
                        "picture_classes",
                        format!("picture {}: {e}", picture.ordinal),
                    )
                })?;
                let class = stats.classify();
                debug!("Picture {} → {} ({:?})", picture.ordinal, class.label, stats);
                picture.classification = Some(class);
                changed += 1;
            }
            Ok(changed)
        })
    }
}

/// Asks a vision model for a short description of every picture.
pub struct PictureDescriber {
    client: VisionClient,
}

impl PictureDescriber {
    pub fn new(client: VisionClient) -> Self {
        Self { client }
    }
}

impl Enricher for PictureDescriber {
    fn name(&self) -> &str {
        "picture_description"
    }

    fn enrich<'a>(
        &'a self,
        doc: &'a mut DocumentTree,
    ) -> BoxFuture<'a, Result<usize, EnrichmentError>> {
        Box::pin(async move {
            let mut changed = 0;
            for picture in doc.pictures_mut() {
                let reply = self
                    .client
                    .complete(
                        &format!("Picture {}", picture.ordinal),
                        PICTURE_DESCRIPTION_PROMPT,
                        &picture.png,
                    )
                    .await
                    .map_err(|detail| {
                        EnrichmentError::new(
                            "picture_description",
                            format!("picture {}: {detail}", picture.ordinal),
                        )
                    })?;
                let description = reply.split_whitespace().collect::<Vec<_>>().join(" ");
                if !description.is_empty() {
                    picture.description = Some(description);
                    changed += 1;
                }
            }
            Ok(changed)
        })
    }
}
