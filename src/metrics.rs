use std::{cmp::Ordering, collections::BTreeMap};

use float_ord::FloatOrd;
use rayon::prelude::*;
use tracing::instrument;

use crate::{align, Result};

/// Trims and lowercases. Applied identically to expected and predicted text.
pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

/// One evaluation input. A failed prediction is carried through so the run can
/// report it instead of scoring it.
#[derive(Debug)]
pub struct Sample {
    pub id: String,
    pub expected: String,
    pub predicted: Result<String>,
}

impl Sample {
    pub fn new(
        id: impl Into<String>,
        expected: impl Into<String>,
        predicted: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            expected: expected.into(),
            predicted: Ok(predicted.into()),
        }
    }

    pub fn failed(id: impl Into<String>, expected: impl Into<String>, error: crate::Error) -> Self {
        Self {
            id: id.into(),
            expected: expected.into(),
            predicted: Err(error),
        }
    }
}

/// Scores for a single expected/predicted pair, on normalized text.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleScore {
    pub id: String,
    pub expected: String,
    pub predicted: String,
    pub expected_chars: usize,
    pub char_distance: usize,
    pub expected_words: usize,
    pub word_distance: usize,
    pub substitutions: Vec<(char, char)>,
}

impl SampleScore {
    /// Can exceed 1 when the prediction is much longer than the expected text.
    pub fn cer(&self) -> f64 {
        self.char_distance as f64 / self.expected_chars.max(1) as f64
    }

    pub fn wer(&self) -> f64 {
        self.word_distance as f64 / self.expected_words.max(1) as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorstExample {
    pub cer: f64,
    pub id: String,
    pub expected: String,
    pub predicted: String,
}

/// Highest CER first. Ties fall back to id, then the texts, so the order
/// never depends on which side of a merge an example came from.
fn rank(a: &WorstExample, b: &WorstExample) -> Ordering {
    FloatOrd(b.cer)
        .cmp(&FloatOrd(a.cer))
        .then_with(|| a.id.cmp(&b.id))
        .then_with(|| a.expected.cmp(&b.expected))
        .then_with(|| a.predicted.cmp(&b.predicted))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSample {
    pub id: String,
    pub reason: String,
}

/// Totals for an evaluation run. Only scored samples contribute to the
/// character and word tallies; skipped ones are listed separately.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusMetrics {
    pub samples_scored: usize,
    pub total_chars: usize,
    pub total_char_errors: usize,
    pub total_words: usize,
    pub total_word_errors: usize,
    pub confusion: BTreeMap<(char, char), usize>,
    pub worst_examples: Vec<WorstExample>,
    pub skipped: Vec<SkippedSample>,
    worst_capacity: usize,
}

impl CorpusMetrics {
    pub fn new(worst_capacity: usize) -> Self {
        Self {
            samples_scored: 0,
            total_chars: 0,
            total_char_errors: 0,
            total_words: 0,
            total_word_errors: 0,
            confusion: BTreeMap::new(),
            worst_examples: Vec::new(),
            skipped: Vec::new(),
            worst_capacity,
        }
    }

    pub fn record(&mut self, score: &SampleScore) {
        self.samples_scored += 1;
        self.total_chars += score.expected_chars;
        self.total_char_errors += score.char_distance;
        self.total_words += score.expected_words.max(1);
        self.total_word_errors += score.word_distance;
        for pair in &score.substitutions {
            *self.confusion.entry(*pair).or_default() += 1;
        }
        self.push_worst(WorstExample {
            cer: score.cer(),
            id: score.id.clone(),
            expected: score.expected.clone(),
            predicted: score.predicted.clone(),
        });
    }

    pub fn record_skip(&mut self, id: impl Into<String>, reason: impl ToString) {
        let skipped = SkippedSample {
            id: id.into(),
            reason: reason.to_string(),
        };
        log::warn!("Skipping sample {}: {}", skipped.id, skipped.reason);
        self.skipped.push(skipped);
        self.sort_skipped();
    }

    fn sort_skipped(&mut self) {
        self.skipped
            .sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.reason.cmp(&b.reason)));
    }

    fn push_worst(&mut self, example: WorstExample) {
        if self.worst_capacity == 0 {
            return;
        }
        self.worst_examples.push(example);
        self.worst_examples.sort_by(rank);
        self.worst_examples.truncate(self.worst_capacity);
    }

    /// Combines two partial runs. Associative and commutative, so batches can
    /// be scored in any order.
    pub fn merge(mut self, other: Self) -> Self {
        self.samples_scored += other.samples_scored;
        self.total_chars += other.total_chars;
        self.total_char_errors += other.total_char_errors;
        self.total_words += other.total_words;
        self.total_word_errors += other.total_word_errors;
        for (pair, count) in other.confusion {
            *self.confusion.entry(pair).or_default() += count;
        }
        self.worst_capacity = self.worst_capacity.max(other.worst_capacity);
        self.worst_examples.extend(other.worst_examples);
        self.worst_examples.sort_by(rank);
        self.worst_examples.truncate(self.worst_capacity);
        self.skipped.extend(other.skipped);
        self.sort_skipped();
        self
    }

    pub fn cer(&self) -> f64 {
        self.total_char_errors as f64 / self.total_chars.max(1) as f64
    }

    pub fn wer(&self) -> f64 {
        self.total_word_errors as f64 / self.total_words.max(1) as f64
    }

    pub fn samples_skipped(&self) -> usize {
        self.skipped.len()
    }

    /// Most frequent substitutions first, ties in pair order.
    pub fn top_confusions(&self, n: usize) -> Vec<((char, char), usize)> {
        let mut pairs = self
            .confusion
            .iter()
            .map(|(pair, count)| (*pair, *count))
            .collect::<Vec<_>>();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        pairs.truncate(n);
        pairs
    }
}

impl Default for CorpusMetrics {
    fn default() -> Self {
        Self::new(EvalOptions::default().worst_examples)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EvalOptions {
    /// How many of the highest-CER samples to keep.
    pub worst_examples: usize,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self { worst_examples: 20 }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator {
    options: EvalOptions,
}

impl Evaluator {
    pub fn new(options: EvalOptions) -> Self {
        Self { options }
    }

    pub fn metrics(&self) -> CorpusMetrics {
        CorpusMetrics::new(self.options.worst_examples)
    }

    #[instrument(level = "trace", skip(self, expected, predicted))]
    pub fn score(&self, id: &str, expected: &str, predicted: &str) -> SampleScore {
        let expected = normalize_text(expected);
        let predicted = normalize_text(predicted);

        let expected_chars = expected.chars().collect::<Vec<_>>();
        let predicted_chars = predicted.chars().collect::<Vec<_>>();
        let chars = align(&expected_chars, &predicted_chars);

        let expected_words = expected.split_whitespace().collect::<Vec<_>>();
        let predicted_words = predicted.split_whitespace().collect::<Vec<_>>();
        let words = align(&expected_words, &predicted_words);

        log::trace!(
            "{id}: char distance {}, word distance {}",
            chars.distance,
            words.distance
        );

        SampleScore {
            id: id.to_string(),
            expected_chars: expected_chars.len(),
            char_distance: chars.distance,
            expected_words: expected_words.len(),
            word_distance: words.distance,
            substitutions: chars.substitutions().map(|(a, b)| (*a, *b)).collect(),
            expected,
            predicted,
        }
    }

    /// Scores `sample` into `metrics`, or records it as skipped when its
    /// prediction failed. Returns the score of a scored sample.
    pub fn accumulate(&self, metrics: &mut CorpusMetrics, sample: Sample) -> Option<SampleScore> {
        match sample.predicted {
            Ok(predicted) => {
                let score = self.score(&sample.id, &sample.expected, &predicted);
                metrics.record(&score);
                Some(score)
            }
            Err(error) => {
                metrics.record_skip(sample.id, error);
                None
            }
        }
    }

    #[instrument(level = "debug", skip_all)]
    pub fn evaluate_corpus(&self, samples: impl IntoIterator<Item = Sample>) -> CorpusMetrics {
        let mut metrics = self.metrics();
        for sample in samples {
            self.accumulate(&mut metrics, sample);
        }
        log::debug!(
            "Scored {} samples, skipped {}",
            metrics.samples_scored,
            metrics.samples_skipped()
        );
        metrics
    }

    /// Same result as [`Evaluator::evaluate_corpus`], with samples scored on
    /// the rayon pool and folded together with [`CorpusMetrics::merge`].
    #[instrument(level = "debug", skip_all)]
    pub fn evaluate_corpus_par(&self, samples: Vec<Sample>) -> CorpusMetrics {
        samples
            .into_par_iter()
            .fold(
                || self.metrics(),
                |mut metrics, sample| {
                    self.accumulate(&mut metrics, sample);
                    metrics
                },
            )
            .reduce(|| self.metrics(), CorpusMetrics::merge)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::Error;

    #[test]
    fn exact_match_scores_zero() {
        let metrics = Evaluator::default().evaluate_corpus([Sample::new("a", "hola", "hola")]);
        assert_eq!(metrics.cer(), 0.0);
        assert_eq!(metrics.wer(), 0.0);
        assert!(metrics.confusion.is_empty());
    }

    #[test]
    fn dropped_character_scores_quarter() {
        let metrics = Evaluator::default().evaluate_corpus([Sample::new("a", "hola", "hoa")]);
        assert_eq!(metrics.total_chars, 4);
        assert_eq!(metrics.total_char_errors, 1);
        assert_eq!(metrics.cer(), 0.25);
        assert_eq!(metrics.wer(), 1.0);
        // The missing 'l' is a deletion, not a confusion.
        assert!(metrics.confusion.is_empty());
    }

    #[test]
    fn normalization_applies_to_both_sides() {
        let score = Evaluator::default().score("a", "  Hola Mundo ", "HOLA mundo\n");
        assert_eq!(score.expected, "hola mundo");
        assert_eq!(score.char_distance, 0);
        assert_eq!(score.word_distance, 0);
    }

    #[test]
    fn substitutions_fill_confusion() {
        let metrics = Evaluator::default().evaluate_corpus([
            Sample::new("a", "casa", "cosa"),
            Sample::new("b", "mapa", "mopa"),
        ]);
        assert_eq!(metrics.confusion.get(&('a', 'o')), Some(&2));
        assert_eq!(metrics.top_confusions(5), vec![(('a', 'o'), 2)]);
    }

    #[test]
    fn empty_ground_truth_counts_one_word() {
        let score = Evaluator::default().score("a", "", "abc");
        assert_eq!(score.cer(), 3.0);
        let metrics = Evaluator::default().evaluate_corpus([Sample::new("a", "", "abc")]);
        assert_eq!(metrics.total_words, 1);
        assert_eq!(metrics.total_chars, 0);
        assert_eq!(metrics.cer(), 3.0);
        assert_eq!(metrics.wer(), 1.0);
    }

    #[test]
    fn rates_can_exceed_one() {
        let metrics = Evaluator::default().evaluate_corpus([Sample::new("a", "ab", "xyzw vu")]);
        assert!(metrics.cer() > 1.0);
        assert!(metrics.wer() > 1.0);
    }

    #[test]
    fn failed_predictions_are_skipped_not_scored() {
        let metrics = Evaluator::default().evaluate_corpus([
            Sample::new("a", "hola", "hola"),
            Sample::failed(
                "b",
                "mundo",
                Error::MissingPrediction(PathBuf::from("preds/b.txt")),
            ),
        ]);
        assert_eq!(metrics.samples_scored, 1);
        assert_eq!(metrics.samples_skipped(), 1);
        assert_eq!(metrics.skipped[0].id, "b");
        assert!(metrics.skipped[0].reason.contains("preds/b.txt"));
        assert_eq!(metrics.total_chars, 4);
        assert_eq!(metrics.total_words, 1);
    }

    #[test]
    fn worst_examples_are_bounded_and_ranked() {
        let evaluator = Evaluator::new(EvalOptions { worst_examples: 2 });
        let metrics = evaluator.evaluate_corpus([
            Sample::new("good", "hola", "hola"),
            Sample::new("bad", "hola", "xxxx"),
            Sample::new("meh", "hola", "hoxa"),
            Sample::new("also-meh", "hola", "hola!"),
        ]);
        let ids = metrics
            .worst_examples
            .iter()
            .map(|it| it.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["bad", "also-meh"]);
        assert_eq!(metrics.worst_examples[0].cer, 1.0);
    }

    #[test]
    fn merge_is_order_independent() {
        let evaluator = Evaluator::new(EvalOptions { worst_examples: 3 });
        let left = evaluator.evaluate_corpus([
            Sample::new("1", "casa", "cosa"),
            Sample::new("2", "perro", "pero"),
        ]);
        let right = evaluator.evaluate_corpus([
            Sample::new("3", "gato", "gata"),
            Sample::failed("4", "sol", Error::InvalidSymbolMap("bad".into())),
        ]);
        let middle = evaluator.evaluate_corpus([Sample::new("5", "luna", "luna")]);

        let a = left.clone().merge(right.clone()).merge(middle.clone());
        let b = middle.merge(right.merge(left));
        assert_eq!(a, b);
        assert_eq!(a.samples_scored, 4);
        assert_eq!(a.samples_skipped(), 1);
    }

    #[test]
    fn merge_orders_same_id_ties_by_text() {
        let evaluator = Evaluator::new(EvalOptions { worst_examples: 2 });
        let left = evaluator.evaluate_corpus([Sample::new("page", "ab", "ax")]);
        let right = evaluator.evaluate_corpus([Sample::new("page", "ab", "xb")]);

        let a = left.clone().merge(right.clone());
        let b = right.merge(left);
        assert_eq!(a, b);
        let predicted = a
            .worst_examples
            .iter()
            .map(|it| it.predicted.as_str())
            .collect::<Vec<_>>();
        assert_eq!(predicted, vec!["ax", "xb"]);
    }

    #[test]
    fn parallel_matches_sequential() {
        let samples = || {
            (0..64)
                .map(|i| {
                    let expected = format!("linea {i} de texto");
                    let predicted = match i % 4 {
                        0 => expected.clone(),
                        1 => expected.replace('e', "c"),
                        2 => format!("{expected} extra"),
                        _ => expected[..expected.len() / 2].to_string(),
                    };
                    if i % 9 == 0 {
                        Sample::failed(
                            i.to_string(),
                            expected,
                            Error::MissingPrediction(PathBuf::from(format!("{i}.txt"))),
                        )
                    } else {
                        Sample::new(format!("{i:02}"), expected, predicted)
                    }
                })
                .collect::<Vec<_>>()
        };
        let evaluator = Evaluator::default();
        assert_eq!(
            evaluator.evaluate_corpus(samples()),
            evaluator.evaluate_corpus_par(samples())
        );
    }
}
