// SPDX-FileCopyrightText: 2024 University of Rochester
//
// SPDX-License-Identifier: MIT

/*! Diagnostic records and their stream rendering.

Warnings accumulate during the bounds check and are rendered in one of two
fixed forms, depending on whether the offending instruction carries source
location metadata. The `Display` output of a [`Diagnostic`] is the exact
byte sequence the diagnostic stream carries, trailing newline included, so
records can be concatenated directly.
*/

use serde::{Deserialize, Serialize};

/// A source position recovered from the debug metadata of an instruction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
    pub col: u32,
}

impl SourceLoc {
    #[must_use]
    pub fn new(file: &str, line: u32, col: u32) -> Self {
        SourceLoc {
            file: file.to_string(),
            line,
            col,
        }
    }
}

impl std::fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

/// One possible out of bounds access, anchored either at a source
/// location or, failing that, at the rendered IR instruction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Where the access appears in the original source, when the input
    /// was compiled with debug information.
    pub loc: Option<SourceLoc>,
    /// The IR rendering of the indexing instruction.
    pub instr: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.loc {
            Some(ref loc) => {
                writeln!(f, "{loc}: warning: possible array out of bounds access.")
            }
            None => {
                writeln!(f, "WARNING: Possible array out of bounds access at {}", self.instr)?;
                writeln!(f, "Please compile with -g to see line numbers.")
            }
        }
    }
}

/// Write the diagnostics to the provided stream, returning the number of
/// bytes written.
///
/// # Errors
/// Propagates any errors encountered when writing to the provided `stream`
pub fn write_to_stream(
    diagnostics: &[Diagnostic],
    stream: &mut impl std::io::Write,
) -> Result<usize, std::io::Error> {
    let mut written = 0;
    for diagnostic in diagnostics {
        written += stream.write(diagnostic.to_string().as_bytes())?;
    }
    Ok(written)
}

/// Write the diagnostics to standard error, line by line.
pub fn emit_to_stderr(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        eprint!("{diagnostic}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_located_form() {
        let diagnostic = Diagnostic {
            loc: Some(SourceLoc::new("test.c", 12, 5)),
            instr: "%4 = getelementptr %0, 42".to_string(),
        };
        assert_eq!(
            diagnostic.to_string(),
            "test.c:12:5: warning: possible array out of bounds access.\n"
        );
    }

    #[rstest]
    fn test_fallback_form_names_the_instruction() {
        let diagnostic = Diagnostic {
            loc: None,
            instr: "%4 = getelementptr %0, 42".to_string(),
        };
        assert_eq!(
            diagnostic.to_string(),
            "WARNING: Possible array out of bounds access at %4 = getelementptr %0, 42\n\
             Please compile with -g to see line numbers.\n"
        );
    }

    #[rstest]
    fn test_stream_concatenates_records() {
        let diagnostics = vec![
            Diagnostic {
                loc: Some(SourceLoc::new("a.c", 1, 2)),
                instr: String::new(),
            },
            Diagnostic {
                loc: Some(SourceLoc::new("a.c", 3, 4)),
                instr: String::new(),
            },
        ];
        let mut stream = Vec::new();
        let written = write_to_stream(&diagnostics, &mut stream).unwrap();
        let text = String::from_utf8(stream).unwrap();
        assert_eq!(written, text.len());
        assert_eq!(
            text,
            "a.c:1:2: warning: possible array out of bounds access.\n\
             a.c:3:4: warning: possible array out of bounds access.\n"
        );
    }

    #[rstest]
    fn test_serializes_for_machine_consumers() {
        let diagnostic = Diagnostic {
            loc: Some(SourceLoc::new("test.c", 12, 5)),
            instr: "%4 = getelementptr %0, 42".to_string(),
        };
        let json = serde_json::to_string(&diagnostic).unwrap();
        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(back, diagnostic);
    }
}
