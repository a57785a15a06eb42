//! Dockerfile directive scanner.
//!
//! Splits a Dockerfile into logical directive lines without interpreting
//! their arguments. Handles:
//! - Comment lines
//! - Line continuations (including a custom `# escape=` character)
//! - Blank lines, including blank lines inside a continuation
//!
//! The result is what the instruction guard needs: the keyword of every
//! directive together with the line it starts on.

use std::fmt;

/// Default line continuation character.
const DEFAULT_ESCAPE: char = '\\';

/// A single logical directive line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// 1-based line number where the directive starts.
    pub line: usize,
    /// Uppercased directive keyword (e.g. `RUN`, `ADD`).
    pub keyword: String,
    /// Raw arguments, continuations joined with a single space.
    pub args: String,
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}", self.keyword)
        } else {
            write!(f, "{} {}", self.keyword, self.args)
        }
    }
}

/// Scans Dockerfile content into its directives.
///
/// # Examples
/// ```
/// use arena_core::builder::parser::parse_directives;
///
/// let directives = parse_directives("FROM scratch\nADD https://example.com/x /x\n");
/// assert_eq!(directives.len(), 2);
/// assert_eq!(directives[1].keyword, "ADD");
/// assert_eq!(directives[1].line, 2);
/// ```
pub fn parse_directives(content: &str) -> Vec<Directive> {
    let escape = escape_directive(content).unwrap_or(DEFAULT_ESCAPE);

    preprocess(content, escape)
        .into_iter()
        .filter_map(|(line, text)| {
            let mut parts = text.splitn(2, char::is_whitespace);
            let keyword = parts.next().unwrap_or("").to_uppercase();
            if keyword.is_empty() {
                return None;
            }
            let args = parts.next().unwrap_or("").trim().to_string();
            Some(Directive { line, keyword, args })
        })
        .collect()
}

/// Reads the `# escape=<char>` parser directive, if present.
///
/// Parser directives are only honored at the very top of the file, before
/// any blank line, comment or instruction.
fn escape_directive(content: &str) -> Option<char> {
    for line in content.lines() {
        let trimmed = line.trim();
        let directive = trimmed.strip_prefix('#')?;
        let (key, value) = directive.split_once('=')?;
        let key = key.trim();
        if key.eq_ignore_ascii_case("escape") {
            return match value.trim() {
                "`" => Some('`'),
                "\\" => Some('\\'),
                _ => None,
            };
        }
        if !key.eq_ignore_ascii_case("syntax") && !key.eq_ignore_ascii_case("check") {
            return None;
        }
    }
    None
}

/// Combine continuation lines and drop comments.
///
/// Returns `(line_number, logical_line)` pairs.
fn preprocess(content: &str, escape: char) -> Vec<(usize, String)> {
    let mut result = Vec::new();
    let mut current_line = String::new();
    let mut current_line_num = 0;
    let mut continuation = false;

    for (line_num, line) in content.lines().enumerate() {
        let line_num = line_num + 1;
        let trimmed = line.trim();

        // Comment lines are dropped even in the middle of a continuation
        if trimmed.starts_with('#') {
            continue;
        }

        if trimmed.is_empty() {
            continue;
        }

        let ends_with_escape = trimmed.ends_with(escape);
        let body = if ends_with_escape {
            trimmed[..trimmed.len() - escape.len_utf8()].trim()
        } else {
            trimmed
        };

        if continuation {
            if !body.is_empty() {
                current_line.push(' ');
                current_line.push_str(body);
            }
        } else {
            current_line_num = line_num;
            current_line = body.to_string();
        }

        continuation = ends_with_escape;

        if !continuation && !current_line.is_empty() {
            result.push((current_line_num, std::mem::take(&mut current_line)));
        }
    }

    // A trailing continuation still forms a directive
    if !current_line.is_empty() {
        result.push((current_line_num, current_line));
    }

    result
}
