use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap},
    path::Path,
};

use serde_json::Value;

use crate::{Error, Result};

/// Character emitted for tokens the table doesn't know.
pub const UNKNOWN_SYMBOL: char = '?';

const BRAILLE_LETTERS: [(&str, char); 27] = [
    ("⠁", 'a'),
    ("⠃", 'b'),
    ("⠉", 'c'),
    ("⠙", 'd'),
    ("⠑", 'e'),
    ("⠋", 'f'),
    ("⠛", 'g'),
    ("⠓", 'h'),
    ("⠊", 'i'),
    ("⠚", 'j'),
    ("⠅", 'k'),
    ("⠇", 'l'),
    ("⠍", 'm'),
    ("⠝", 'n'),
    ("⠕", 'o'),
    ("⠏", 'p'),
    ("⠟", 'q'),
    ("⠗", 'r'),
    ("⠎", 's'),
    ("⠞", 't'),
    ("⠥", 'u'),
    ("⠧", 'v'),
    ("⠺", 'w'),
    ("⠭", 'x'),
    ("⠽", 'y'),
    ("⠵", 'z'),
    (" ", ' '),
];

/// Read-only token to character mapping shared by every decode call.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolTable {
    map: HashMap<String, char>,
    unknown: char,
}

impl SymbolTable {
    /// Single-cell braille letters plus the blank cell.
    pub fn braille() -> Self {
        Self::from_pairs(BRAILLE_LETTERS.iter().map(|(token, c)| (*token, *c)))
    }

    pub fn from_pairs<S: Into<String>>(pairs: impl IntoIterator<Item = (S, char)>) -> Self {
        Self {
            map: pairs
                .into_iter()
                .map(|(token, c)| (token.into(), c))
                .collect(),
            unknown: UNKNOWN_SYMBOL,
        }
    }

    /// Parses a JSON object whose values are one-character strings.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| Error::InvalidSymbolMap(e.to_string()))?;
        let Value::Object(entries) = value else {
            return Err(Error::InvalidSymbolMap(
                "expected a JSON object of token to character".to_string(),
            ));
        };
        let pairs = entries
            .into_iter()
            .map(|(token, value)| {
                let mut chars = value.as_str().unwrap_or_default().chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok((token, c)),
                    _ => Err(Error::InvalidSymbolMap(format!(
                        "value for {token:?} must be a single character, got {value}"
                    ))),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_pairs(pairs))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let table = Self::from_json_str(&json)?;
        log::debug!("Loaded {} symbols from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn with_unknown(mut self, unknown: char) -> Self {
        self.unknown = unknown;
        self
    }

    pub fn translate(&self, token: &str) -> char {
        self.map.get(token).copied().unwrap_or(self.unknown)
    }

    pub fn unknown(&self) -> char {
        self.unknown
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::braille()
    }
}

/// Detector class names, indexed by class id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassNames {
    names: Vec<String>,
}

impl ClassNames {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// One name per line, where the line number is the class id. Files ending
    /// in `.yaml` or `.yml` are read as a YOLO dataset config instead.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let is_yaml = path.extension().is_some_and(|ext| {
            ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml")
        });
        let names = if is_yaml {
            Self::from_data_yaml(&content).map_err(|reason| Error::InvalidClassNames {
                path: path.to_path_buf(),
                reason,
            })?
        } else {
            Self::new(content.lines())
        };
        log::debug!("Loaded {} class names from {}", names.len(), path.display());
        Ok(names)
    }

    /// Reads the `names` key of a YOLO `data.yaml`. Both the list form
    /// (`names: [a, b]` or a block of `- a` items) and the id map form
    /// (`0: a`) are understood. Other keys are ignored.
    pub fn from_data_yaml(yaml: &str) -> std::result::Result<Self, String> {
        let mut lines = yaml.lines();
        let rest = lines
            .by_ref()
            .find_map(|line| line.strip_prefix("names:"))
            .ok_or("no top-level `names` key")?;
        let rest = strip_comment(rest).trim();

        if let Some(flow) = rest.strip_prefix('[') {
            let mut flow = flow.to_string();
            while !flow.contains(']') {
                let line = lines.next().ok_or("unterminated `names` list")?;
                flow.push_str(strip_comment(line));
            }
            let inner = &flow[..flow.rfind(']').unwrap_or(flow.len())];
            return Ok(Self::new(
                inner
                    .split(',')
                    .map(str::trim)
                    .filter(|it| !it.is_empty())
                    .map(unquote),
            ));
        }
        if !rest.is_empty() {
            return Err(format!("unsupported `names` value {rest:?}"));
        }

        let mut listed = Vec::new();
        let mut by_id = BTreeMap::new();
        for line in lines {
            let item = strip_comment(line);
            if item.trim().is_empty() {
                continue;
            }
            if !item.starts_with([' ', '\t', '-']) {
                break;
            }
            let item = item.trim();
            if let Some(name) = item.strip_prefix('-') {
                listed.push(unquote(name.trim()).to_string());
            } else if let Some((id, name)) = item.split_once(':') {
                let id = id
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| format!("invalid class id {id:?}"))?;
                by_id.insert(id, unquote(name.trim()).to_string());
            } else {
                return Err(format!("unexpected line {item:?} under `names`"));
            }
        }
        match (listed.is_empty(), by_id.is_empty()) {
            (_, true) => Ok(Self::new(listed)),
            (true, false) => {
                let len = by_id.keys().next_back().map_or(0, |last| last + 1);
                Ok(Self::new((0..len).map(|id| {
                    by_id.remove(&id).unwrap_or_else(|| id.to_string())
                })))
            }
            (false, false) => Err("`names` mixes list items and ids".to_string()),
        }
    }

    /// Unnamed classes fall back to their decimal id.
    pub fn token(&self, class: usize) -> Cow<'_, str> {
        match self.names.get(class) {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(class.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Cuts a ` #` comment. A `#` glued to a token stays, since braille class
/// names can contain one.
fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    line.find(" #").map_or(line, |at| &line[..at])
}

fn unquote(value: &str) -> &str {
    ['\'', '"']
        .iter()
        .find_map(|q| value.strip_prefix(*q)?.strip_suffix(*q))
        .unwrap_or(value)
}
