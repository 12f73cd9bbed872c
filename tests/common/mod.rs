#![allow(dead_code)]

use gatekeeper::common::Result;
use gatekeeper::core::{EmbeddingExtractor, Extraction};
use image::{DynamicImage, GenericImageView, ImageOutputFormat, RgbImage};
use rand::Rng;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;

/// Fresh empty directory under the system temp dir.
pub fn scratch_dir(label: &str) -> PathBuf {
    let suffix: u32 = rand::thread_rng().gen();
    let dir = std::env::temp_dir().join(format!("gk-{}-{:x}", label, suffix));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// A blank PNG; its width doubles as a key for [`WidthExtractor`].
pub fn png(width: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(width, 2))
        .write_to(&mut out, ImageOutputFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Answers by image width, so tests choose the "face" by choosing the width.
pub struct WidthExtractor(pub HashMap<u32, Extraction>);

impl EmbeddingExtractor for WidthExtractor {
    fn extract(&self, image: &DynamicImage) -> Result<Extraction> {
        Ok(self
            .0
            .get(&image.dimensions().0)
            .cloned()
            .unwrap_or(Extraction::NoFace))
    }
}

/// 128-dim reference vector cycling 0.1, 0.2, ..., 1.0.
pub fn alice_embedding() -> Vec<f32> {
    (0..128).map(|i| 0.1 * ((i % 10) + 1) as f32).collect()
}
