/// One symbol found by the detector, positioned by its box centre in
/// normalized image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub symbol: String,
    pub x_center: f64,
    pub y_center: f64,
}

impl Detection {
    pub fn new(symbol: impl Into<String>, x_center: f64, y_center: f64) -> Self {
        Self {
            symbol: symbol.into(),
            x_center,
            y_center,
        }
    }
}

/// A detector label before its class index has been resolved to a token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelBox {
    pub class: usize,
    pub x_center: f64,
    pub y_center: f64,
    /// Detector score, when the file carries one.
    pub confidence: Option<f32>,
}

impl LabelBox {
    /// Boxes without a score always pass.
    pub fn is_confident(&self, min_confidence: f32) -> bool {
        self.confidence.map_or(true, |it| it >= min_confidence)
    }
}

/// A position in an aligned sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlignedToken<T> {
    Token(T),
    Gap,
}

impl<T> AlignedToken<T> {
    pub fn token(&self) -> Option<&T> {
        match self {
            AlignedToken::Token(token) => Some(token),
            AlignedToken::Gap => None,
        }
    }

    pub fn is_gap(&self) -> bool {
        matches!(self, AlignedToken::Gap)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alignment<T> {
    pub distance: usize,
    pub aligned_a: Vec<AlignedToken<T>>,
    pub aligned_b: Vec<AlignedToken<T>>,
}

impl<T: PartialEq> Alignment<T> {
    /// Positions where both sides hold a token and the tokens differ.
    /// Insertions and deletions are never reported here.
    pub fn substitutions(&self) -> impl Iterator<Item = (&T, &T)> {
        self.aligned_a
            .iter()
            .zip(self.aligned_b.iter())
            .filter_map(|(a, b)| Some((a.token()?, b.token()?)))
            .filter(|(a, b)| a != b)
    }
}

impl Alignment<char> {
    /// Renders both rows with `-` standing in for gaps, for logs and reports.
    pub fn render(&self) -> (String, String) {
        let row = |tokens: &[AlignedToken<char>]| {
            tokens
                .iter()
                .map(|it| it.token().copied().unwrap_or('-'))
                .collect::<String>()
        };
        (row(&self.aligned_a), row(&self.aligned_b))
    }
}
