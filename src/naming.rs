//! Output filename patterns.
//!
//! A pattern is plain text with `{placeholder}` fields. Every stamped image
//! is written as `<rendered pattern>.jpg` in the output directory:
//!
//! - `{date}` → capture date, `YYYY-MM-DD`
//! - `{stem}` → source filename without its extension
//! - `{index}` → position of the source in the batch, starting at 0
//!
//! The default `{date}_{index}` turns the third photo taken on 9 Sep 2020
//! into `2020-09-09_2.jpg`.

use std::path::Path;

/// Extension appended to every rendered name.
pub const OUTPUT_EXTENSION: &str = "jpg";

pub const DEFAULT_PATTERN: &str = "{date}_{index}";

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Date,
    Stem,
    Index,
}

/// A parsed filename pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct NamePattern {
    segments: Vec<Segment>,
}

/// Values substituted into a [`NamePattern`].
#[derive(Debug, Clone, PartialEq)]
pub struct NameFields<'a> {
    pub date: Option<&'a str>,
    pub stem: &'a str,
    pub index: usize,
}

impl NamePattern {
    /// Parse `pattern`, rejecting unknown placeholders, unbalanced braces,
    /// path separators, and patterns that render to nothing.
    pub fn parse(pattern: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = pattern;

        while let Some(open) = rest.find(['{', '}']) {
            if rest[open..].starts_with('}') {
                return Err(format!("unmatched '}}' in name pattern '{pattern}'"));
            }
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| format!("unclosed '{{' in name pattern '{pattern}'"))?;
            let field = match &after[..close] {
                "date" => Segment::Date,
                "stem" => Segment::Stem,
                "index" => Segment::Index,
                other => {
                    return Err(format!(
                        "unknown placeholder '{{{other}}}' in name pattern '{pattern}'"
                    ));
                }
            };
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(field);
            rest = &after[close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        if segments.is_empty() {
            return Err("name pattern must not be empty".into());
        }
        if pattern.contains(['/', '\\']) {
            return Err(format!(
                "name pattern '{pattern}' must not contain path separators"
            ));
        }
        Ok(Self { segments })
    }

    pub fn uses_date(&self) -> bool {
        self.segments.contains(&Segment::Date)
    }

    /// Render to a filename including the `.jpg` extension.
    ///
    /// Fails when the pattern needs `{date}` and none is available.
    pub fn render(&self, fields: &NameFields<'_>) -> Result<String, String> {
        let mut name = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => name.push_str(text),
                Segment::Date => name.push_str(
                    fields
                        .date
                        .ok_or("name pattern uses {date} but the image has no date")?,
                ),
                Segment::Stem => name.push_str(fields.stem),
                Segment::Index => name.push_str(&fields.index.to_string()),
            }
        }
        Ok(format!("{name}.{OUTPUT_EXTENSION}"))
    }
}

impl Default for NamePattern {
    fn default() -> Self {
        Self {
            segments: vec![
                Segment::Date,
                Segment::Literal("_".into()),
                Segment::Index,
            ],
        }
    }
}

/// Filename stem of a source identifier, or the whole identifier when it has none.
///
/// - `"photos/IMG_0001.JPG"` → `"IMG_0001"`
/// - `"<memory>"` → `"<memory>"`
pub fn source_stem(id: &str) -> String {
    Path::new(id)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| id.to_string())
}
