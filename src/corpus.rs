//! Pairing ground-truth labels with predictions on disk.
//!
//! A sample is identified by a file stem. Its ground truth lives at
//! `labels/<id>.txt`, its prediction at `predictions/<id>.txt`, and, for pixel
//! boxes, its image at `images/<id>.{png,jpg,jpeg}`.

use std::path::PathBuf;

use tracing::instrument;

use crate::{
    group_lines, labels, reading_order, DecodeOptions, Decoder, Detection, Error, LabelBox,
    Result, Sample,
};

/// How ground-truth labels are turned into reference text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroundTruthOrder {
    /// Sorted by y then x with no separators.
    #[default]
    Flat,
    /// Grouped into lines the same way predictions are.
    Lines,
}

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub decode: DecodeOptions,
    pub gt_order: GroundTruthOrder,
    /// Predicted boxes scored below this are dropped before decoding.
    pub min_confidence: f32,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            decode: DecodeOptions::default(),
            gt_order: GroundTruthOrder::default(),
            min_confidence: 0.25,
        }
    }
}

/// Tokens and raw texts behind a sample, as written to the per-sample CSV.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleDetail {
    pub gt_tokens: Vec<String>,
    pub pred_tokens: Vec<String>,
    pub gt_text: String,
    pub pred_text: String,
}

#[derive(Debug)]
pub struct LoadedSample {
    pub sample: Sample,
    pub detail: SampleDetail,
}

fn tokens(detections: &[Detection]) -> Vec<String> {
    detections.iter().map(|it| it.symbol.clone()).collect()
}

/// Directories making up an evaluation corpus.
#[derive(Debug, Clone)]
pub struct CorpusLayout {
    pub labels: PathBuf,
    pub predictions: PathBuf,
    /// Set when predictions are pixel boxes on these images.
    pub images: Option<PathBuf>,
}

impl CorpusLayout {
    pub fn new(labels: impl Into<PathBuf>, predictions: impl Into<PathBuf>) -> Self {
        Self {
            labels: labels.into(),
            predictions: predictions.into(),
            images: None,
        }
    }

    pub fn images(mut self, images: impl Into<PathBuf>) -> Self {
        self.images = Some(images.into());
        self
    }

    /// Every sample in the corpus, sorted. With an image directory each image
    /// is a sample. Otherwise each label or prediction file is, so a prediction
    /// with no label is scored against empty text.
    pub fn sample_ids(&self) -> Result<Vec<String>> {
        let ids = match &self.images {
            Some(dir) => labels::stems(&labels::list_images(dir)?),
            None => {
                let mut files = labels::list_label_files(&self.labels)?;
                files.extend(labels::list_label_files(&self.predictions)?);
                labels::stems(&files)
            }
        };
        log::debug!("Found {} samples", ids.len());
        Ok(ids)
    }

    fn prediction_path(&self, id: &str) -> PathBuf {
        self.predictions.join(format!("{id}.txt"))
    }

    /// Predicted boxes for `id`, weak ones already dropped.
    pub fn read_prediction(&self, id: &str, min_confidence: f32) -> Result<Vec<LabelBox>> {
        let path = self.prediction_path(id);
        if !path.is_file() {
            return Err(Error::MissingPrediction(path));
        }
        let boxes = match &self.images {
            Some(dir) => {
                let image =
                    labels::find_image(dir, id).ok_or_else(|| Error::MissingImage(dir.join(id)))?;
                labels::read_pixel_boxes(&path, &image)?
            }
            None => labels::read_yolo_labels(&path)?,
        };
        Ok(labels::above_confidence(boxes, min_confidence))
    }

    /// Reads and decodes both sides of `id`. Read errors are carried in the
    /// sample so the run can list it as skipped.
    #[instrument(level = "trace", skip(self, decoder, options))]
    pub fn load(&self, decoder: &Decoder, options: LoadOptions, id: &str) -> LoadedSample {
        let mut detail = SampleDetail::default();
        let gt_path = self.labels.join(format!("{id}.txt"));
        let ground_truth = match labels::read_ground_truth(&gt_path) {
            Ok(boxes) => decoder.detections(&boxes),
            Err(e) => {
                return LoadedSample {
                    sample: Sample::failed(id, String::new(), e),
                    detail,
                }
            }
        };
        detail.gt_tokens = tokens(&reading_order(&ground_truth));
        detail.gt_text = match options.gt_order {
            GroundTruthOrder::Flat => decoder.read_flat(&ground_truth),
            GroundTruthOrder::Lines => decoder.decode(&ground_truth, options.decode),
        };

        let predicted = self
            .read_prediction(id, options.min_confidence)
            .map(|boxes| decoder.detections(&boxes));
        let sample = match predicted {
            Ok(predicted) => {
                detail.pred_tokens = group_lines(&predicted, options.decode.line_tolerance)
                    .iter()
                    .flat_map(|line| tokens(line.members()))
                    .collect();
                detail.pred_text = decoder.decode(&predicted, options.decode);
                Sample::new(id, detail.gt_text.as_str(), detail.pred_text.as_str())
            }
            Err(e) => Sample::failed(id, detail.gt_text.as_str(), e),
        };
        LoadedSample { sample, detail }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc};

    use super::*;
    use crate::{ClassNames, SymbolTable};

    fn fixture(name: &str) -> CorpusLayout {
        let dir = std::env::temp_dir().join(format!("brailleocr-corpus-{name}"));
        let _ = fs::remove_dir_all(&dir);
        let layout = CorpusLayout::new(dir.join("labels"), dir.join("predictions"));
        fs::create_dir_all(&layout.labels).unwrap();
        fs::create_dir_all(&layout.predictions).unwrap();
        layout
    }

    fn decoder() -> Decoder {
        Decoder::new(
            Arc::new(SymbolTable::from_pairs([("A", 'A'), ("b", 'b')])),
            Arc::new(ClassNames::new(["A", "b"])),
        )
    }

    #[test]
    fn ids_cover_labels_and_predictions() {
        let layout = fixture("ids");
        fs::write(layout.labels.join("img1.txt"), "").unwrap();
        fs::write(layout.labels.join("notes.md"), "").unwrap();
        fs::write(layout.predictions.join("img1.txt"), "").unwrap();
        fs::write(layout.predictions.join("img2.txt"), "").unwrap();
        assert_eq!(layout.sample_ids().unwrap(), vec!["img1", "img2"]);
    }

    #[test]
    fn detail_keeps_raw_texts() {
        let layout = fixture("raw");
        fs::write(layout.labels.join("p.txt"), "0 0.1 0.1 0.05 0.05\n").unwrap();
        fs::write(
            layout.predictions.join("p.txt"),
            "0 0.1 0.1 0.05 0.05 0.9\n1 0.2 0.1 0.05 0.05 0.1\n",
        )
        .unwrap();

        let loaded = layout.load(&decoder(), LoadOptions::default(), "p");
        assert_eq!(loaded.detail.gt_text, "A");
        assert_eq!(loaded.detail.pred_text, "A");
        assert_eq!(loaded.detail.pred_tokens, vec!["A"]);
        assert_eq!(loaded.sample.expected, "A");

        let options = LoadOptions {
            min_confidence: 0.0,
            ..LoadOptions::default()
        };
        let loaded = layout.load(&decoder(), options, "p");
        assert_eq!(loaded.detail.pred_text, "Ab");
        assert_eq!(loaded.detail.pred_tokens, vec!["A", "b"]);
    }

    #[test]
    fn missing_prediction_is_carried() {
        let layout = fixture("missing");
        fs::write(layout.labels.join("q.txt"), "1 0.1 0.1 0.05 0.05\n").unwrap();
        let loaded = layout.load(&decoder(), LoadOptions::default(), "q");
        assert_eq!(loaded.detail.gt_tokens, vec!["b"]);
        assert!(matches!(
            loaded.sample.predicted,
            Err(Error::MissingPrediction(_))
        ));
    }
}
