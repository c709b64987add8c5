use std::{borrow::Cow, fmt};

use crate::{CorpusMetrics, SampleDetail, SampleScore};

#[derive(Debug, Clone, Copy)]
pub struct ReportOptions {
    pub top_confusions: usize,
    pub worst_examples: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            top_confusions: 30,
            worst_examples: 20,
        }
    }
}

/// Plain-text summary of an evaluation run.
pub struct Report<'a> {
    pub metrics: &'a CorpusMetrics,
    /// Every sample the run looked at, scored or skipped.
    pub images_evaluated: usize,
    pub options: ReportOptions,
}

impl<'a> Report<'a> {
    pub fn new(
        metrics: &'a CorpusMetrics,
        images_evaluated: usize,
        options: ReportOptions,
    ) -> Self {
        Self {
            metrics,
            images_evaluated,
            options,
        }
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metrics = self.metrics;
        writeln!(f, "Images evaluated: {}", self.images_evaluated)?;
        writeln!(f, "Samples scored: {}", metrics.samples_scored)?;
        writeln!(f, "Samples skipped: {}", metrics.samples_skipped())?;
        for skipped in &metrics.skipped {
            writeln!(f, "  {}: {}", skipped.id, skipped.reason)?;
        }
        writeln!(f, "Total chars (GT): {}", metrics.total_chars)?;
        writeln!(f, "Total char errors: {}", metrics.total_char_errors)?;
        writeln!(f, "CER: {:.4}", metrics.cer())?;
        writeln!(f, "WER: {:.4}", metrics.wer())?;

        writeln!(f, "\nTop confusion pairs:")?;
        for ((expected, predicted), count) in metrics.top_confusions(self.options.top_confusions) {
            writeln!(f, "  {expected} -> {predicted}: {count}")?;
        }

        write!(f, "\nWorst examples (CER, image, GT, PRED):")?;
        for example in metrics.worst_examples.iter().take(self.options.worst_examples) {
            write!(
                f,
                "\n{:.3}\t{}\tGT:{}\tPRED:{}",
                example.cer, example.id, example.expected, example.predicted
            )?;
        }
        Ok(())
    }
}

pub const CSV_HEADER: &str = "image,gt_tokens,pred_tokens,gt_text,pred_text,cer";

fn csv_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// One CSV line, without the trailing newline. Token columns are space
/// separated. Texts are written as decoded, before normalization.
pub fn csv_row(score: &SampleScore, detail: &SampleDetail) -> String {
    [
        csv_field(&score.id),
        csv_field(&detail.gt_tokens.join(" ")).into_owned().into(),
        csv_field(&detail.pred_tokens.join(" ")).into_owned().into(),
        csv_field(&detail.gt_text),
        csv_field(&detail.pred_text),
        Cow::Owned(format!("{:.6}", score.cer())),
    ]
    .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Evaluator, Sample};

    #[test]
    fn report_lists_totals_confusions_and_skips() {
        let metrics = Evaluator::default().evaluate_corpus([
            Sample::new("img1", "casa", "cosa"),
            Sample::new("img2", "hola", "hola"),
            Sample::failed("img3", "sol", Error::InvalidSymbolMap("broken".into())),
        ]);
        let text = Report::new(&metrics, 3, ReportOptions::default()).to_string();

        assert!(text.starts_with("Images evaluated: 3\n"));
        assert!(text.contains("Samples skipped: 1\n  img3: Invalid symbol map: broken\n"));
        assert!(text.contains("Total chars (GT): 8\n"));
        assert!(text.contains("CER: 0.1250\n"));
        assert!(text.contains("WER: 0.5000\n"));
        assert!(text.contains("  a -> o: 1\n"));
        assert!(text.contains("\n0.250\timg1\tGT:casa\tPRED:cosa"));
        assert!(text.ends_with("\n0.000\timg2\tGT:hola\tPRED:hola"));
    }

    #[test]
    fn csv_quotes_when_needed() {
        let detail = SampleDetail {
            gt_tokens: vec!["⠁".to_string()],
            gt_text: "say \"hi\"".to_string(),
            pred_text: "say hi".to_string(),
            ..SampleDetail::default()
        };
        let score = Evaluator::default().score("a,b", &detail.gt_text, &detail.pred_text);
        let row = csv_row(&score, &detail);
        assert_eq!(row, "\"a,b\",⠁,,\"say \"\"hi\"\"\",say hi,0.250000");
    }

    #[test]
    fn csv_keeps_texts_as_decoded() {
        let detail = SampleDetail {
            gt_text: " Hola ".to_string(),
            pred_text: "HOLA".to_string(),
            ..SampleDetail::default()
        };
        let score = Evaluator::default().score("img1", &detail.gt_text, &detail.pred_text);
        assert_eq!(score.expected, "hola");
        assert_eq!(csv_row(&score, &detail), "img1,,, Hola ,HOLA,0.000000");
    }
}
