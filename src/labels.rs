//! Reading detector output from disk.
//!
//! Two layouts are supported:
//!
//! - YOLO labels: `class x_center y_center width height [confidence]`, already
//!   normalized.
//! - Pixel boxes: `class x1 y1 x2 y2 [confidence]` in image pixels, normalized
//!   here by the image size so the line tolerance keeps its meaning.

use std::{
    collections::BTreeSet,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use geo::{coord, Rect};
use tracing::instrument;

use crate::{Error, LabelBox, Result};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

fn malformed(path: &Path, line: usize, reason: impl Into<String>) -> Error {
    Error::MalformedLabel {
        path: path.to_path_buf(),
        line,
        reason: reason.into(),
    }
}

fn parse_class(field: &str, path: &Path, line: usize) -> Result<usize> {
    field
        .parse()
        .map_err(|_| malformed(path, line, format!("invalid class id {field:?}")))
}

fn parse_coords<const N: usize>(fields: &[&str], path: &Path, line: usize) -> Result<[f64; N]> {
    let mut values = [0.0; N];
    for (value, field) in values.iter_mut().zip(fields) {
        *value = field
            .parse::<f64>()
            .ok()
            .filter(|it| it.is_finite())
            .ok_or_else(|| malformed(path, line, format!("invalid coordinate {field:?}")))?;
    }
    Ok(values)
}

/// The optional sixth field.
fn parse_confidence(fields: &[&str], path: &Path, line: usize) -> Result<Option<f32>> {
    match fields {
        [_, _, _, _, _] => Ok(None),
        [_, _, _, _, _, field] => field
            .parse::<f32>()
            .ok()
            .filter(|it| it.is_finite())
            .map(Some)
            .ok_or_else(|| malformed(path, line, format!("invalid confidence {field:?}"))),
        _ => Err(malformed(
            path,
            line,
            format!("expected 5 or 6 fields, got {}", fields.len()),
        )),
    }
}

/// Parses YOLO label text. `path` is only used for error messages.
///
/// Blank lines are ignored. A line carrying fewer than four coordinates keeps
/// the class with zeroed geometry. Width and height are validated but dropped.
pub fn parse_yolo_labels(content: &str, path: &Path) -> Result<Vec<LabelBox>> {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.split_whitespace().collect::<Vec<_>>()))
        .filter(|(_, fields)| !fields.is_empty())
        .map(|(line, fields)| {
            let class = parse_class(fields[0], path, line)?;
            if fields.len() < 5 {
                return Ok(LabelBox {
                    class,
                    x_center: 0.0,
                    y_center: 0.0,
                    confidence: None,
                });
            }
            let confidence = parse_confidence(&fields, path, line)?;
            let [x_center, y_center, _, _] = parse_coords::<4>(&fields[1..5], path, line)?;
            Ok(LabelBox {
                class,
                x_center,
                y_center,
                confidence,
            })
        })
        .collect()
}

#[instrument(level = "trace")]
pub fn read_yolo_labels(path: &Path) -> Result<Vec<LabelBox>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_yolo_labels(&content, path)
}

/// Like [`read_yolo_labels`], but a missing file means an image with no
/// symbols rather than an error.
pub fn read_ground_truth(path: &Path) -> Result<Vec<LabelBox>> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_yolo_labels(&content, path),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::debug!("No ground truth at {}, treating as empty", path.display());
            Ok(Vec::new())
        }
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Parses pixel-space boxes and normalizes their centres by `width` x `height`.
pub fn parse_pixel_boxes(
    content: &str,
    path: &Path,
    width: u32,
    height: u32,
) -> Result<Vec<LabelBox>> {
    if width == 0 || height == 0 {
        return Err(malformed(path, 0, format!("image size {width}x{height}")));
    }
    content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.split_whitespace().collect::<Vec<_>>()))
        .filter(|(_, fields)| !fields.is_empty())
        .map(|(line, fields)| {
            let confidence = parse_confidence(&fields, path, line)?;
            let class = parse_class(fields[0], path, line)?;
            let [x1, y1, x2, y2] = parse_coords::<4>(&fields[1..5], path, line)?;
            let center = Rect::new(coord! { x: x1, y: y1 }, coord! { x: x2, y: y2 }).center();
            Ok(LabelBox {
                class,
                x_center: center.x / width as f64,
                y_center: center.y / height as f64,
                confidence,
            })
        })
        .collect()
}

/// Reads pixel boxes for `image_path`. Only the image header is read to learn
/// its size; pixels are never decoded.
#[instrument(level = "trace")]
pub fn read_pixel_boxes(path: &Path, image_path: &Path) -> Result<Vec<LabelBox>> {
    let (width, height) =
        image::image_dimensions(image_path).map_err(|source| Error::ImageDimensions {
            path: image_path.to_path_buf(),
            source,
        })?;
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_pixel_boxes(&content, path, width, height)
}

/// Drops boxes scored below `min_confidence`.
pub fn above_confidence(boxes: Vec<LabelBox>, min_confidence: f32) -> Vec<LabelBox> {
    let total = boxes.len();
    let kept = boxes
        .into_iter()
        .filter(|it| it.is_confident(min_confidence))
        .collect::<Vec<_>>();
    if kept.len() < total {
        log::trace!("Dropped {} boxes below {min_confidence}", total - kept.len());
    }
    kept
}

fn list_files(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
    let mut files = std::fs::read_dir(dir)
        .map_err(|e| Error::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|it| it.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(&keep)
        })
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

fn is_image_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

/// Label files directly inside `dir`, sorted by path.
pub fn list_label_files(dir: &Path) -> Result<Vec<PathBuf>> {
    list_files(dir, |ext| ext == "txt")
}

/// PNG and JPEG files directly inside `dir`, sorted by path.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    list_files(dir, is_image_extension)
}

/// First image next to `stem` in `dir` with a known extension.
pub fn find_image(dir: &Path, stem: &str) -> Option<PathBuf> {
    IMAGE_EXTENSIONS
        .iter()
        .flat_map(|ext| [ext.to_string(), ext.to_ascii_uppercase()])
        .map(|ext| dir.join(format!("{stem}.{ext}")))
        .find(|path| path.is_file())
}

/// File stems, deduplicated and sorted.
pub fn stems<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> Vec<String> {
    paths
        .into_iter()
        .filter_map(|path| path.file_stem())
        .map(|stem| stem.to_string_lossy().into_owned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
