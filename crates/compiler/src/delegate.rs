//! Host delegate.
//!
//! The original is "a struct of function pointers... all callbacks carry an opaque
//! user-data pointer." Rust closures already carry their own captured environment, so
//! the `xdata` parameter the C struct needed is simply dropped — each field here is a
//! boxed `FnMut` instead of a function-pointer-plus-context pair.

use crate::error::CompileError;
use crate::token::{CommentKind, Token};
use lumen_runtime::Value;

/// One `#unittest { ... }` block's expectations. The parser
/// collects these fields and hands the host exactly this struct; nothing is added to
/// the AST.
#[derive(Debug, Clone)]
pub struct UnitTestExpectation {
    pub name: String,
    pub note: Option<String>,
    pub error: Option<String>,
    pub error_row: Option<u32>,
    pub error_col: Option<u32>,
    pub result: Option<Value>,
}

/// File-loader outcome for `#include`: source text plus the file id
/// the lexer stack should tag every token from that file with.
pub type LoadedFile = (String, u32);

pub struct Delegate {
    pub error: Box<dyn FnMut(&CompileError)>,
    pub log: Box<dyn FnMut(&str)>,
    /// The only source of external I/O; invoked
    /// synchronously at `#include`.
    pub load_file: Box<dyn FnMut(&str) -> Result<LoadedFile, String>>,
    /// Optional source injected before the user's source is lexed.
    pub precode: Option<Box<dyn FnMut() -> Option<String>>>,
    /// Invoked for each non-peeked token.
    pub parser_token: Option<Box<dyn FnMut(&Token)>>,
    /// Comments are skipped for parser consumption but still handed here, line/column
    /// of the comment's start.
    pub comment: Option<Box<dyn FnMut(CommentKind, u32, u32)>>,
    /// Consulted for `: TypeName` parameter/variable annotations; returning `false`
    /// does not fail compilation.
    pub type_annotation: Option<Box<dyn FnMut(&str) -> bool>>,
    pub unittest: Option<Box<dyn FnMut(UnitTestExpectation)>>,
}

impl Default for Delegate {
    fn default() -> Self {
        Delegate {
            error: Box::new(|err| tracing::warn!(%err, "compile diagnostic")),
            log: Box::new(|msg| tracing::debug!(%msg)),
            load_file: Box::new(|path| {
                Err(format!(
                    "no file-loader callback installed; cannot resolve #include \"{path}\""
                ))
            }),
            precode: None,
            parser_token: None,
            comment: None,
            type_annotation: None,
            unittest: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn default_load_file_rejects_includes() {
        let mut delegate = Delegate::default();
        let result = (delegate.load_file)("foo.lm");
        assert!(result.is_err());
    }

    #[test]
    fn error_callback_is_invoked() {
        let count = std::rc::Rc::new(std::cell::RefCell::new(0));
        let count2 = count.clone();
        let mut delegate = Delegate {
            error: Box::new(move |_err| *count2.borrow_mut() += 1),
            ..Delegate::default()
        };
        let err = CompileError::new(ErrorKind::Syntax, 0, 1, 1, 0, "boom");
        (delegate.error)(&err);
        assert_eq!(*count.borrow(), 1);
    }
}
