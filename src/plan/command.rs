//! Rendering of toolchain templates into argument vectors.

use camino::Utf8PathBuf;
use serde::Serialize;
use shell_quote::{QuoteRefExt, Sh};

/// A rendered command: the program and its arguments, plus the
/// shell-quoted line they were split from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLine {
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    /// Human readable form used in logs and plans.
    pub display: String,
}

impl CommandLine {
    /// The program to spawn.
    #[must_use]
    pub fn program(&self) -> &str {
        self.argv.first().map_or("", String::as_str)
    }

    /// Arguments following the program.
    #[must_use]
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }
}

/// A template that does not render to a usable command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RenderError {
    pub command: String,
    pub snippet: String,
}

/// Substitute `$in` and `$out` in `template` and split the result.
///
/// Placeholders only match as whole words, so `$input` is left alone. Paths
/// are shell-quoted before substitution and unquoted again by the split,
/// which keeps paths containing spaces as single arguments.
pub(crate) fn render(
    template: &str,
    inputs: &[Utf8PathBuf],
    outputs: &[Utf8PathBuf],
) -> Result<CommandLine, RenderError> {
    let ins = quote_paths(inputs).join(" ");
    let outs = quote_paths(outputs).join(" ");
    let display = substitute(template, &ins, &outs);
    match shlex::split(&display) {
        Some(argv) if !argv.is_empty() => Ok(CommandLine { argv, display }),
        _ => Err(RenderError {
            snippet: display.chars().take(160).collect(),
            command: display,
        }),
    }
}

fn quote_paths(paths: &[Utf8PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| {
            let bytes: Vec<u8> = p.as_str().quoted(Sh);
            match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(err) => {
                    debug_assert!(false, "shell quoting produced non UTF-8 bytes: {err}");
                    String::from_utf8_lossy(&err.into_bytes()).into_owned()
                }
            }
        })
        .collect()
}

const fn is_identifier_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Length of the placeholder `$<word>` at `pos`, if it stands alone.
fn placeholder_at(chars: &[char], pos: usize, word: &str) -> Option<usize> {
    let len = word.chars().count();
    let matches = word
        .chars()
        .enumerate()
        .all(|(off, ch)| chars.get(pos + 1 + off) == Some(&ch));
    let before = chars
        .get(pos.wrapping_sub(1))
        .is_none_or(|c| !is_identifier_char(*c));
    let after = chars
        .get(pos + 1 + len)
        .is_none_or(|c| !is_identifier_char(*c));
    (matches && before && after).then_some(len + 1)
}

fn substitute(template: &str, ins: &str, outs: &str) -> String {
    let chars: Vec<char> = template.chars().collect();
    let mut rendered = String::with_capacity(template.len() + ins.len() + outs.len());
    let mut i = 0;
    while let Some(&ch) = chars.get(i) {
        let replacement = (ch == '$')
            .then(|| {
                placeholder_at(&chars, i, "in")
                    .map(|skip| (ins, skip))
                    .or_else(|| placeholder_at(&chars, i, "out").map(|skip| (outs, skip)))
            })
            .flatten();
        if let Some((text, skip)) = replacement {
            rendered.push_str(text);
            i += skip;
        } else {
            rendered.push(ch);
            i += 1;
        }
    }
    rendered
}
