//! Translates description parsing errors into actionable diagnostics.
//!
//! `serde_saphyr` errors carry a line and column; these are mapped onto a
//! byte span of the source so `miette` can underline the offending token and
//! attach a hint for common YAML mistakes.

use miette::{Diagnostic, NamedSource, SourceSpan};
use serde_saphyr::{Error as YamlError, Location};
use thiserror::Error;

use super::hints::YAML_HINTS;

/// YAML source text of a build description.
///
/// # Examples
/// ```rust
/// use kumiki::description::DescriptionSource;
/// let source = DescriptionSource::from("targets: []");
/// assert_eq!(source.as_str(), "targets: []");
/// ```
#[derive(Debug, Clone)]
pub struct DescriptionSource(String);

impl DescriptionSource {
    /// Wrap the provided source text.
    #[must_use]
    pub fn new(src: impl Into<String>) -> Self {
        Self(src.into())
    }

    /// Borrow the source text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for DescriptionSource {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for DescriptionSource {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

fn byte_index(src: &str, line: u64, column: u64) -> usize {
    let target_line = usize::try_from(line.saturating_sub(1)).unwrap_or(usize::MAX);
    let target_column = usize::try_from(column.saturating_sub(1)).unwrap_or(usize::MAX);
    let mut offset = 0usize;
    for (idx, segment) in src.split_inclusive('\n').enumerate() {
        if idx == target_line {
            let line_text = segment.strip_suffix('\n').unwrap_or(segment);
            let line_text = line_text.strip_suffix('\r').unwrap_or(line_text);
            let column_offset = line_text
                .char_indices()
                .nth(target_column)
                .map_or(line_text.len(), |(byte_idx, _)| byte_idx);
            return offset + column_offset;
        }
        offset += segment.len();
    }
    src.len()
}

fn to_span(src: &DescriptionSource, loc: Location) -> SourceSpan {
    let at = byte_index(src.as_str(), loc.line(), loc.column());
    let bytes = src.as_str().as_bytes();
    let (start, end) = match bytes.get(at) {
        Some(&b) if b != b'\n' && b != b'\r' => (at, at + 1),
        _ => {
            let start = if at > 0 && bytes.get(at - 1).is_some_and(|p| *p != b'\n') {
                at - 1
            } else {
                at
            };
            (start, at)
        }
    };
    SourceSpan::new(start.into(), end.saturating_sub(start))
}

fn has_tab_indent(src: &DescriptionSource, loc: Option<Location>) -> bool {
    let Some(loc) = loc else { return false };
    let line_idx = usize::try_from(loc.line().saturating_sub(1)).unwrap_or(usize::MAX);
    let line = src.as_str().lines().nth(line_idx).unwrap_or("");
    line.chars()
        .take_while(|c| c.is_whitespace())
        .any(|c| c == '\t')
}

fn hint_for(err_str: &str, src: &DescriptionSource, loc: Option<Location>) -> Option<String> {
    if has_tab_indent(src, loc) {
        return Some("Use spaces for indentation; tabs are invalid in YAML.".into());
    }
    let lower = err_str.to_lowercase();
    YAML_HINTS
        .iter()
        .find(|(needle, _)| lower.contains(*needle))
        .map(|(_, hint)| (*hint).into())
}

#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(kumiki::yaml::parse))]
struct YamlDiagnostic {
    #[source_code]
    src: NamedSource<String>,
    #[label("parse error here")]
    span: Option<SourceSpan>,
    #[help]
    help: Option<String>,
    #[source]
    source: YamlError,
    message: String,
}

/// Convert a YAML error into a boxed diagnostic pointing into `src`.
#[must_use]
pub fn map_yaml_error(
    err: YamlError,
    src: &DescriptionSource,
    name: &str,
) -> Box<dyn Diagnostic + Send + Sync + 'static> {
    let loc = err.location();
    let (line, col, span) = loc.map_or((1, 1, None), |l| {
        (l.line(), l.column(), Some(to_span(src, l)))
    });
    let err_str = err.to_string();
    let help = hint_for(&err_str, src, loc);
    let message = format!("YAML parse error at line {line}, column {col}: {err_str}");

    Box::new(YamlDiagnostic {
        src: NamedSource::new(name, src.as_str().to_owned()),
        span,
        help,
        source: err,
        message,
    })
}
