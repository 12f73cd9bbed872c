use crate::common::{GateError, Result};
use crate::core::index::Embedding;
use image::{DynamicImage, ImageOutputFormat};
use serde::Deserialize;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// What the feature extractor found in an image.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Embedding(Embedding),
    NoFace,
    NoEncoding,
}

/// Turns a decoded image into a fixed-length embedding.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, image: &DynamicImage) -> Result<Extraction>;
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| GateError::InvalidImage(e.to_string()))
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum CommandVerdict {
    Ok { embedding: Embedding },
    NoFace,
    NoEncoding,
}

/// Runs an external program per image: PNG on stdin, one JSON verdict on stdout,
/// e.g. `{"status":"ok","embedding":[...]}` or `{"status":"no_face"}`.
pub struct CommandExtractor {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

impl EmbeddingExtractor for CommandExtractor {
    fn extract(&self, image: &DynamicImage) -> Result<Extraction> {
        let mut png = Cursor::new(Vec::new());
        image
            .write_to(&mut png, ImageOutputFormat::Png)
            .map_err(|e| GateError::Extractor(format!("Failed to encode image: {}", e)))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| GateError::Extractor(format!("Failed to start {:?}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(png.get_ref())?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(GateError::Extractor(format!(
                "{:?} exited with {}", self.program, output.status
            )));
        }

        parse_verdict(&output.stdout)
    }
}

fn parse_verdict(stdout: &[u8]) -> Result<Extraction> {
    let verdict: CommandVerdict = serde_json::from_slice(stdout)
        .map_err(|e| GateError::Extractor(format!("Unreadable extractor output: {}", e)))?;
    Ok(match verdict {
        CommandVerdict::Ok { embedding } => Extraction::Embedding(embedding),
        CommandVerdict::NoFace => Extraction::NoFace,
        CommandVerdict::NoEncoding => Extraction::NoEncoding,
    })
}

/// Used when no extractor is configured: every image is reported as faceless.
pub struct NullExtractor;

impl EmbeddingExtractor for NullExtractor {
    fn extract(&self, _image: &DynamicImage) -> Result<Extraction> {
        tracing::warn!("No extractor configured; treating image as faceless");
        Ok(Extraction::NoFace)
    }
}
