//! Diagnostics.

use std::fmt;

/// Every diagnostic carries one of these kinds, distinguishing a syntax error from a
/// later-stage semantic, runtime, I/O, or warning-level one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Semantic,
    Runtime,
    Io,
    Warning,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Syntax => "SYNTAX",
            ErrorKind::Semantic => "SEMANTIC",
            ErrorKind::Runtime => "RUNTIME",
            ErrorKind::Io => "IO",
            ErrorKind::Warning => "WARNING",
        };
        f.write_str(s)
    }
}

/// A single diagnostic: line, column, file id, byte offset, kind, and message
///.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub file_id: u32,
    pub line: u32,
    pub column: u32,
    pub offset: u32,
    pub message: String,
}

impl CompileError {
    pub fn new(
        kind: ErrorKind,
        file_id: u32,
        line: u32,
        column: u32,
        offset: u32,
        message: impl Into<String>,
    ) -> Self {
        CompileError {
            kind,
            file_id,
            line,
            column,
            offset,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{}:{}: {}",
            self.kind, self.file_id, self.line, self.column, self.message
        )
    }
}

impl std::error::Error for CompileError {}

/// Accumulates diagnostics across the whole pipeline, applying the "one-error-per-line"
/// suppressor the parser contract asks for so a
/// single malformed token doesn't cascade into a wall of follow-on errors.
#[derive(Debug, Default)]
pub struct ErrorSink {
    errors: Vec<CompileError>,
    warnings: Vec<CompileError>,
    reported_lines: std::collections::HashSet<(u32, u32)>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, err: CompileError) {
        let key = (err.file_id, err.line);
        if err.kind != ErrorKind::Warning && !self.reported_lines.insert(key) {
            return;
        }
        match err.kind {
            ErrorKind::Warning => self.warnings.push(err),
            _ => self.errors.push(err),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    pub fn warnings(&self) -> &[CompileError] {
        &self.warnings
    }

    pub fn into_errors(self) -> Vec<CompileError> {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupes_errors_on_the_same_line() {
        let mut sink = ErrorSink::new();
        sink.report(CompileError::new(ErrorKind::Syntax, 0, 3, 1, 10, "first"));
        sink.report(CompileError::new(ErrorKind::Syntax, 0, 3, 9, 18, "second"));
        sink.report(CompileError::new(ErrorKind::Syntax, 0, 4, 1, 20, "third"));
        assert_eq!(sink.errors().len(), 2);
    }

    #[test]
    fn warnings_are_never_deduped_away_from_errors() {
        let mut sink = ErrorSink::new();
        sink.report(CompileError::new(ErrorKind::Warning, 0, 3, 1, 10, "shadow"));
        sink.report(CompileError::new(ErrorKind::Syntax, 0, 3, 1, 10, "real error"));
        assert_eq!(sink.errors().len(), 1);
        assert_eq!(sink.warnings().len(), 1);
        assert!(sink.has_errors());
    }
}
