//! Structural scanner for migration artifacts.
//!
//! The rebase engine only cares about two declarations in each file:
//!
//! ```python
//! revision = 'b1c2d3'
//! down_revision: Union[str, None] = 'a0b1c2'
//! ```
//!
//! Everything else in the artifact is opaque payload. The scanner recognises
//! declarations line by line and records the byte span of each value so the
//! rewriter can replace exactly that token and nothing else.

use std::fmt;
use std::ops::Range;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, satisfy, space0},
    combinator::{eof, not, opt, rest, value},
    sequence::{pair, preceded, terminated, tuple},
};
use serde::Serialize;
use thiserror::Error;

/// The two declarations the scanner extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Revision,
    DownRevision,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Revision => "revision",
            Field::DownRevision => "down_revision",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value assigned in a declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredValue<'a> {
    /// `'id'` or `"id"`.
    Quoted { quote: char, text: &'a str },
    /// The null sentinel, `None`.
    Null,
    /// Anything else: tuples, expressions, empty strings.
    Other(&'a str),
}

/// A recognised declaration within a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration<'a> {
    pub field: Field,
    pub value: DeclaredValue<'a>,
    /// Byte range of the value token within the line.
    pub span: Range<usize>,
}

/// Why an artifact could not be scanned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("no `{0}` declaration found")]
    Missing(Field),

    #[error("`{field}` declared more than once (lines {lines:?})")]
    Duplicate { field: Field, lines: Vec<usize> },

    #[error("line {line}: `{field}` must be a quoted revision id or None, found `{found}`")]
    UnsupportedValue {
        field: Field,
        line: usize,
        found: String,
    },

    #[error("revision '{revision}' is already declared in {first}")]
    DuplicateId { revision: String, first: String },
}

/// The two fields extracted from an artifact, plus where the predecessor lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    pub revision: String,
    pub down_revision: Option<String>,
    /// Quote character used by the `revision` declaration.
    pub revision_quote: char,
    /// Quote character used by `down_revision`, `None` for the null sentinel.
    pub down_revision_quote: Option<char>,
    /// Byte range of the `down_revision` value token in the whole artifact.
    pub down_revision_span: Range<usize>,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn field_name(input: &str) -> IResult<&str, Field> {
    terminated(
        alt((
            value(Field::DownRevision, tag("down_revision")),
            value(Field::Revision, tag("revision")),
        )),
        not(satisfy(is_ident_char)),
    )(input)
}

/// Type annotation such as `: Union[str, Sequence[str], None]`.
fn annotation(input: &str) -> IResult<&str, &str> {
    preceded(pair(space0, char(':')), take_while(|c| c != '='))(input)
}

/// `=` but not `==`.
fn assignment(input: &str) -> IResult<&str, ()> {
    value((), tuple((space0, char('='), not(char('=')), space0)))(input)
}

fn quoted_with(quote: char) -> impl Fn(&str) -> IResult<&str, DeclaredValue<'_>> {
    move |input: &str| {
        let (input, _) = char(quote)(input)?;
        let (input, text) = take_while1(|c: char| c != quote && c != '\n')(input)?;
        let (input, _) = char(quote)(input)?;

        Ok((input, DeclaredValue::Quoted { quote, text }))
    }
}

fn null_sentinel(input: &str) -> IResult<&str, DeclaredValue<'_>> {
    value(
        DeclaredValue::Null,
        terminated(tag("None"), not(satisfy(is_ident_char))),
    )(input)
}

/// Trailing whitespace and an optional `# comment`.
fn trailer(input: &str) -> IResult<&str, ()> {
    value((), tuple((space0, opt(preceded(char('#'), rest)), eof)))(input)
}

fn declared_value(input: &str) -> IResult<&str, DeclaredValue<'_>> {
    terminated(
        alt((quoted_with('\''), quoted_with('"'), null_sentinel)),
        trailer,
    )(input)
}

/// Parse one line (without its line terminator) as a declaration.
pub fn parse_declaration(line: &str) -> IResult<&str, Declaration<'_>> {
    let (input, _) = space0(line)?;
    let (input, field) = field_name(input)?;
    let (input, _) = opt(annotation)(input)?;
    let (input, _) = assignment(input)?;

    let start = line.len() - input.len();
    let parsed = declared_value(input);
    let (remaining, value, end) = match parsed {
        Ok((remaining, value)) => {
            // The span covers the value token only, not the trailer.
            let token = match &value {
                DeclaredValue::Quoted { text, .. } => text.len() + 2,
                _ => "None".len(),
            };
            (remaining, value, start + token)
        }
        Err(_) => {
            let found = input.trim_end();
            ("", DeclaredValue::Other(found), start + found.len())
        }
    };

    Ok((
        remaining,
        Declaration {
            field,
            value,
            span: start..end,
        },
    ))
}

/// Recognise a declaration line, ignoring every other line.
pub fn declaration(line: &str) -> Option<Declaration<'_>> {
    parse_declaration(line).ok().map(|(_, decl)| decl)
}

/// Iterate over lines with their 1-based number and byte offset in `text`.
fn lines_with_offsets(text: &str) -> impl Iterator<Item = (usize, usize, &str)> {
    let mut offset = 0;
    text.split_inclusive('\n').enumerate().map(move |(index, raw)| {
        let start = offset;
        offset += raw.len();
        (index + 1, start, raw.trim_end_matches(['\n', '\r']))
    })
}

/// Extract the `revision` and `down_revision` declarations from an artifact.
pub fn scan_artifact(text: &str) -> Result<Scan, ScanError> {
    let mut revisions = Vec::new();
    let mut downs = Vec::new();

    for (line_no, offset, line) in lines_with_offsets(text) {
        if let Some(decl) = declaration(line) {
            let span = offset + decl.span.start..offset + decl.span.end;
            match decl.field {
                Field::Revision => revisions.push((line_no, decl.value, span)),
                Field::DownRevision => downs.push((line_no, decl.value, span)),
            }
        }
    }

    let (line, value, _) = single(Field::Revision, revisions)?;
    let (revision, revision_quote) = match value {
        DeclaredValue::Quoted { quote, text } => (text.to_string(), quote),
        DeclaredValue::Null => return Err(unsupported(Field::Revision, line, "None")),
        DeclaredValue::Other(found) => return Err(unsupported(Field::Revision, line, found)),
    };

    let (line, value, down_revision_span) = single(Field::DownRevision, downs)?;
    let (down_revision, down_revision_quote) = match value {
        DeclaredValue::Quoted { quote, text } => (Some(text.to_string()), Some(quote)),
        DeclaredValue::Null => (None, None),
        DeclaredValue::Other(found) => return Err(unsupported(Field::DownRevision, line, found)),
    };

    Ok(Scan {
        revision,
        down_revision,
        revision_quote,
        down_revision_quote,
        down_revision_span,
    })
}

fn single<T>(field: Field, mut found: Vec<(usize, T, Range<usize>)>) -> Result<(usize, T, Range<usize>), ScanError> {
    match found.len() {
        0 => Err(ScanError::Missing(field)),
        1 => Ok(found.remove(0)),
        _ => Err(ScanError::Duplicate {
            field,
            lines: found.iter().map(|(line, _, _)| *line).collect(),
        }),
    }
}

fn unsupported(field: Field, line: usize, found: &str) -> ScanError {
    ScanError::UnsupportedValue {
        field,
        line,
        found: found.to_string(),
    }
}
