use std::{path::PathBuf, sync::Arc};

use float_ord::FloatOrd;
use tracing::instrument;

use crate::{ClassNames, Detection, LabelBox, Result, SymbolTable};

/// Inserted between decoded lines.
const LINE_SEPARATOR: &str = " ";

#[derive(Debug, Default)]
pub struct DecoderBuilder {
    class_names_path: Option<PathBuf>,
    symbol_map_path: Option<PathBuf>,
    unknown: Option<char>,
}

impl DecoderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class_names(mut self, path: impl Into<PathBuf>) -> Self {
        self.class_names_path = Some(path.into());
        self
    }

    pub fn symbol_map(mut self, path: impl Into<PathBuf>) -> Self {
        self.symbol_map_path = Some(path.into());
        self
    }

    pub fn unknown(mut self, unknown: char) -> Self {
        self.unknown = Some(unknown);
        self
    }

    #[instrument(skip(self))]
    pub fn build(self) -> Result<Decoder> {
        let names = self
            .class_names_path
            .map(ClassNames::load)
            .transpose()?
            .unwrap_or_default();
        let mut symbols = self
            .symbol_map_path
            .map(SymbolTable::load)
            .transpose()?
            .unwrap_or_else(SymbolTable::braille);
        if let Some(unknown) = self.unknown {
            symbols = symbols.with_unknown(unknown);
        }
        Ok(Decoder::new(Arc::new(symbols), Arc::new(names)))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    /// Largest vertical distance, in normalized units, between a detection and
    /// a line's mean y for the detection to join that line.
    pub line_tolerance: f64,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            line_tolerance: 0.05,
        }
    }
}

/// Detections sharing one horizontal line, ordered left to right once closed.
#[derive(Debug, Clone, PartialEq)]
pub struct LineCluster {
    members: Vec<Detection>,
    mean_y: f64,
}

impl LineCluster {
    fn start(detection: Detection) -> Self {
        Self {
            mean_y: detection.y_center,
            members: vec![detection],
        }
    }

    fn accepts(&self, y: f64, line_tolerance: f64) -> bool {
        (y - self.mean_y).abs() <= line_tolerance
    }

    fn push(&mut self, detection: Detection) {
        let y = detection.y_center;
        self.members.push(detection);
        let n = self.members.len() as f64;
        self.mean_y = (self.mean_y * (n - 1.0) + y) / n;
    }

    fn close(mut self) -> Self {
        self.members.sort_by_key(|it| FloatOrd(it.x_center));
        self
    }

    pub fn members(&self) -> &[Detection] {
        &self.members
    }

    pub fn mean_y(&self) -> f64 {
        self.mean_y
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Sorts top to bottom, then left to right. Exact ties fall back to the token
/// so the order never depends on how the detector listed its output.
pub fn reading_order(detections: &[Detection]) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| {
        (FloatOrd(a.y_center), FloatOrd(a.x_center), &a.symbol).cmp(&(
            FloatOrd(b.y_center),
            FloatOrd(b.x_center),
            &b.symbol,
        ))
    });
    sorted
}

/// Greedy single pass over the reading order. Each detection is compared with
/// the running mean y of the open line, not its first member, so slow drift
/// along a line is tolerated. Lines are never revisited.
#[instrument(level = "trace", skip(detections))]
pub fn group_lines(detections: &[Detection], line_tolerance: f64) -> Vec<LineCluster> {
    let mut sorted = reading_order(detections).into_iter();
    let Some(first) = sorted.next() else {
        return Vec::new();
    };

    let mut lines = Vec::new();
    let mut current = LineCluster::start(first);
    for detection in sorted {
        if current.accepts(detection.y_center, line_tolerance) {
            current.push(detection);
        } else {
            lines.push(current.close());
            current = LineCluster::start(detection);
        }
    }
    lines.push(current.close());

    log::trace!(
        "Grouped {} detections into {} lines",
        detections.len(),
        lines.len()
    );
    lines
}

/// Turns detector output into text using an injected symbol table.
#[derive(Debug, Clone)]
pub struct Decoder {
    symbols: Arc<SymbolTable>,
    names: Arc<ClassNames>,
}

impl Decoder {
    pub fn new(symbols: Arc<SymbolTable>, names: Arc<ClassNames>) -> Self {
        Self { symbols, names }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn class_names(&self) -> &ClassNames {
        &self.names
    }

    /// Resolves class ids to symbol tokens.
    pub fn detections(&self, boxes: &[LabelBox]) -> Vec<Detection> {
        boxes
            .iter()
            .map(|it| Detection::new(self.names.token(it.class), it.x_center, it.y_center))
            .collect()
    }

    #[instrument(level = "trace", skip(self, detections))]
    pub fn decode(&self, detections: &[Detection], options: DecodeOptions) -> String {
        self.decode_lines(detections, options).join(LINE_SEPARATOR)
    }

    /// Decoded text of each line, top to bottom.
    pub fn decode_lines(&self, detections: &[Detection], options: DecodeOptions) -> Vec<String> {
        group_lines(detections, options.line_tolerance)
            .iter()
            .map(|line| self.translate(line.members()))
            .collect()
    }

    /// Plain top-to-bottom, left-to-right order with no line grouping and no
    /// separators. Ground-truth label files are read this way.
    pub fn read_flat(&self, detections: &[Detection]) -> String {
        self.translate(&reading_order(detections))
    }

    fn translate(&self, detections: &[Detection]) -> String {
        detections
            .iter()
            .map(|it| self.symbols.translate(&it.symbol))
            .collect()
    }
}
