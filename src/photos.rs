use std::fs;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ColorType;
use uuid::Uuid;

use crate::config::IMAGES_DIR;
use crate::errors::{PortalError, PortalResult};

const JPEG_QUALITY: u8 = 90;
const PREVIEW_SIDE: u32 = 100;

/// Checks the file header against the formats the upload forms accept (PNG, JPEG).
pub fn validate_image(img_ref: &[u8]) -> bool {
    if img_ref.starts_with(&[137, 80, 78, 71]) {
        //PNG
        return true;
    }
    if img_ref.starts_with(&[255, 216, 255]) {
        //JPEG, any APPn marker
        return true;
    }
    false
}

/// Photo storage rooted at the data directory. Paths handed out are relative
/// to `data_dir`, e.g. `images/190-56980/20240601T101500_1a2b3c4d.jpg`.
#[derive(Debug, Clone)]
pub struct PhotoStore {
    data_dir: PathBuf,
}

impl PhotoStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        PhotoStore {
            data_dir: data_dir.into(),
        }
    }

    pub fn ensure_dirs(&self) -> PortalResult<()> {
        fs::create_dir_all(self.data_dir.join(IMAGES_DIR))?;
        Ok(())
    }

    /// Re-encode an upload as RGB JPEG under `images/<model_root>/`.
    pub fn save(&self, model_root: &str, data: &[u8]) -> PortalResult<String> {
        if !validate_image(data) {
            return Err(PortalError::bad_request(
                "image provided in not supported format, supported formats png, jpeg",
            ));
        }
        let rgb = image::load_from_memory(data)?.to_rgb8();

        let folder = sanitize_segment(model_root);
        let rel = Path::new(IMAGES_DIR).join(&folder).join(format!(
            "{}_{}.jpg",
            Utc::now().format("%Y%m%dT%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8]
        ));
        let out = self.data_dir.join(&rel);
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY).encode(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ColorType::Rgb8,
        )?;
        fs::write(&out, encoded)?;

        tracing::debug!(path = %out.display(), bytes = data.len(), "photo stored");
        Ok(to_slash(&rel))
    }

    /// Resolve a stored relative path, refusing anything outside `images/`.
    pub fn resolve(&self, rel: &str) -> PortalResult<PathBuf> {
        let rel_path = Path::new(rel);
        let safe = rel_path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        let under_images = rel_path
            .components()
            .next()
            .map(|c| c.as_os_str() == IMAGES_DIR)
            .unwrap_or(false);
        if !safe || !under_images {
            return Err(PortalError::not_found(format!("image {}", rel)));
        }
        let full = self.data_dir.join(rel_path);
        if !full.is_file() {
            return Err(PortalError::not_found(format!("image {}", rel)));
        }
        Ok(full)
    }

    pub fn read(&self, rel: &str) -> PortalResult<Vec<u8>> {
        Ok(fs::read(self.resolve(rel)?)?)
    }

    pub fn preview(&self, rel: &str) -> PortalResult<Vec<u8>> {
        make_preview(&self.read(rel)?)
    }

    /// Best-effort removal of files whose rows were deleted.
    pub fn remove_all<'a>(&self, rels: impl IntoIterator<Item = &'a str>) {
        for rel in rels {
            if let Ok(path) = self.resolve(rel) {
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "couldn't remove photo");
                }
            }
        }
    }
}

pub fn make_preview(img: &[u8]) -> PortalResult<Vec<u8>> {
    let thumb = image::load_from_memory(img)?
        .resize_to_fill(PREVIEW_SIDE, PREVIEW_SIDE, FilterType::Triangle)
        .to_rgb8();
    let mut result = Cursor::new(Vec::new());
    JpegEncoder::new(&mut result).encode(
        thumb.as_raw(),
        thumb.width(),
        thumb.height(),
        ColorType::Rgb8,
    )?;
    Ok(result.into_inner())
}

fn sanitize_segment(model_root: &str) -> String {
    let cleaned: String = model_root
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
