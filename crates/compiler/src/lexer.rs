//! Lexer.
//!
//! A `Lexer` is single-source and UTF-8 aware: `next()`/`peek()` walk one source
//! buffer, tracking byte offset plus line/column (columns count codepoints, not
//! bytes). Multi-source inclusion (`#include`) is handled one level up by
//! [`LexerStack`], which the parser owns: the lexer itself stays single-source, and the
//! parser maintains the stack of lexers.
//!
//! Comments are tokenized like anything else (`TokenKind::Comment`) rather than
//! silently swallowed here; the parser is the one that filters them out of its own
//! token stream and forwards them to the host's comment callback, which keeps this
//! type free of callback storage and lifetime parameters.

use crate::token::{Builtin, CommentKind, Keyword, Operator, Token, TokenKind};
use std::collections::VecDeque;

const WHITESPACE: &[char] = &[' ', '\t', '\x0B', '\x0C'];
const NEWLINES: &[char] = &['\n', '\r', '\u{0085}', '\u{2028}'];

pub struct Lexer {
    source: String,
    pos: usize,
    line: u32,
    column: u32,
    file_id: u32,
    lookahead: VecDeque<Token>,
}

impl Lexer {
    pub fn new(source: impl Into<String>, file_id: u32) -> Self {
        let mut source = source.into();
        // `#!` on line 1 is a shebang: skip the rest of the line.
        if source.starts_with("#!") {
            let end = source.find(['\n', '\r']).unwrap_or(source.len());
            source.replace_range(0..end, &" ".repeat(end));
        }
        Lexer {
            source,
            pos: 0,
            line: 1,
            column: 1,
            file_id,
            lookahead: VecDeque::new(),
        }
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn next(&mut self) -> Token {
        if let Some(tok) = self.lookahead.pop_front() {
            return tok;
        }
        self.scan_token()
    }

    /// Non-destructive one-token lookahead.
    pub fn peek(&mut self) -> &Token {
        if self.lookahead.is_empty() {
            let tok = self.scan_token();
            self.lookahead.push_back(tok);
        }
        &self.lookahead[0]
    }

    /// Two-token lookahead, used by the parser to disambiguate e.g. `var x` from
    /// `var { get ... }` computed properties without backtracking.
    pub fn peek2(&mut self) -> &Token {
        while self.lookahead.len() < 2 {
            let tok = self.scan_token();
            self.lookahead.push_back(tok);
        }
        &self.lookahead[1]
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn peek_char(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_char_at(&self, n: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(n)
    }

    /// Advance one codepoint, updating line/column. Treats CRLF as a single newline.
    fn bump(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.pos += ch.len_utf8();
        match ch {
            '\r' => {
                if self.source[self.pos..].starts_with('\n') {
                    self.pos += 1;
                }
                self.line += 1;
                self.column = 1;
            }
            '\n' | '\u{0085}' | '\u{2028}' => {
                self.line += 1;
                self.column = 1;
            }
            _ => self.column += 1,
        }
        Some(ch)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if WHITESPACE.contains(&c) || NEWLINES.contains(&c) => {
                    self.bump();
                }
                _ => break,
            }
        }
    }

    fn make_token(
        &self,
        kind: TokenKind,
        start_pos: usize,
        start_line: u32,
        start_col: u32,
        builtin: Option<Builtin>,
    ) -> Token {
        Token {
            byte_len: (self.pos - start_pos) as u32,
            utf8_len: self.source[start_pos..self.pos].chars().count() as u32,
            kind,
            offset: start_pos as u32,
            line: start_line,
            column: start_col,
            file_id: self.file_id,
            builtin,
        }
    }

    fn scan_token(&mut self) -> Token {
        self.skip_trivia();
        let start_pos = self.pos;
        let start_line = self.line;
        let start_col = self.column;

        let Some(c) = self.peek_char() else {
            return self.make_token(TokenKind::Eof, start_pos, start_line, start_col, None);
        };

        if c == '/' && self.peek_char_at(1) == Some('/') {
            return self.scan_line_comment(start_pos, start_line, start_col);
        }
        if c == '/' && self.peek_char_at(1) == Some('*') {
            return self.scan_block_comment(start_pos, start_line, start_col);
        }
        if c.is_ascii_alphabetic() || c == '_' {
            return self.scan_identifier(start_pos, start_line, start_col);
        }
        if c.is_ascii_digit() {
            return self.scan_number(start_pos, start_line, start_col);
        }
        if c == '.' && self.peek_char_at(1).is_some_and(|d| d.is_ascii_digit()) {
            return self.scan_number(start_pos, start_line, start_col);
        }
        if c == '"' || c == '\'' {
            return self.scan_string(c, start_pos, start_line, start_col);
        }
        if c == ';' {
            self.bump();
            return self.make_token(TokenKind::Semicolon, start_pos, start_line, start_col, None);
        }
        if c == '@' {
            self.bump();
            return self.make_token(TokenKind::Special, start_pos, start_line, start_col, None);
        }
        if c == '#' {
            self.bump();
            return self.make_token(TokenKind::Macro, start_pos, start_line, start_col, None);
        }
        self.scan_operator(start_pos, start_line, start_col)
    }

    fn scan_line_comment(&mut self, start_pos: usize, start_line: u32, start_col: u32) -> Token {
        while let Some(c) = self.peek_char() {
            if NEWLINES.contains(&c) {
                break;
            }
            self.bump();
        }
        self.make_token(
            TokenKind::Comment(CommentKind::Line),
            start_pos,
            start_line,
            start_col,
            None,
        )
    }

    fn scan_block_comment(&mut self, start_pos: usize, start_line: u32, start_col: u32) -> Token {
        self.bump(); // '/'
        self.bump(); // '*'
        let mut depth = 1u32;
        loop {
            match (self.peek_char(), self.peek_char_at(1)) {
                (Some('/'), Some('*')) => {
                    self.bump();
                    self.bump();
                    depth += 1;
                }
                (Some('*'), Some('/')) => {
                    self.bump();
                    self.bump();
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                (Some(_), _) => {
                    self.bump();
                }
                (None, _) => {
                    return self.make_token(
                        TokenKind::Error("unterminated block comment"),
                        start_pos,
                        start_line,
                        start_col,
                        None,
                    );
                }
            }
        }
        self.make_token(
            TokenKind::Comment(CommentKind::Block),
            start_pos,
            start_line,
            start_col,
            None,
        )
    }

    fn scan_identifier(&mut self, start_pos: usize, start_line: u32, start_col: u32) -> Token {
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let text = &self.source[start_pos..self.pos];
        if let Some(builtin) = Builtin::from_identifier(text) {
            // Builtins are synthesized number/string tokens.
            let kind = match builtin {
                Builtin::Line | Builtin::Column => TokenKind::Number,
                Builtin::File | Builtin::Class | Builtin::Function => TokenKind::String,
            };
            return self.make_token(kind, start_pos, start_line, start_col, Some(builtin));
        }
        if let Some(kw) = Keyword::from_str(text) {
            return self.make_token(
                TokenKind::Keyword(kw),
                start_pos,
                start_line,
                start_col,
                None,
            );
        }
        self.make_token(TokenKind::Identifier, start_pos, start_line, start_col, None)
    }

    fn scan_number(&mut self, start_pos: usize, start_line: u32, start_col: u32) -> Token {
        let c0 = self.peek_char().unwrap();
        if c0 == '0' {
            match self.peek_char_at(1) {
                Some('x') | Some('X') => {
                    self.bump();
                    self.bump();
                    while self.peek_char().is_some_and(|c| c.is_ascii_hexdigit()) {
                        self.bump();
                    }
                    return self.make_token(TokenKind::Number, start_pos, start_line, start_col, None);
                }
                Some('b') | Some('B') => {
                    self.bump();
                    self.bump();
                    while matches!(self.peek_char(), Some('0') | Some('1')) {
                        self.bump();
                    }
                    return self.make_token(TokenKind::Number, start_pos, start_line, start_col, None);
                }
                Some('o') | Some('O') => {
                    self.bump();
                    self.bump();
                    while self.peek_char().is_some_and(|c| ('0'..='7').contains(&c)) {
                        self.bump();
                    }
                    return self.make_token(TokenKind::Number, start_pos, start_line, start_col, None);
                }
                _ => {}
            }
        }
        // Decimal: digits, optional '.' digits, optional exponent.
        if self.peek_char() != Some('.') {
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if self.peek_char() == Some('.') && self.peek_char_at(1).is_some_and(|c| c.is_ascii_digit())
        {
            self.bump(); // '.'
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek_char(), Some('e') | Some('E')) {
            let save = self.pos;
            self.bump();
            if matches!(self.peek_char(), Some('+') | Some('-')) {
                self.bump();
            }
            if self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            } else {
                // not actually an exponent; rewind column tracking is best-effort,
                // byte position is what matters for re-lexing the rest as operators.
                self.pos = save;
            }
        }
        self.make_token(TokenKind::Number, start_pos, start_line, start_col, None)
    }

    fn scan_string(&mut self, delim: char, start_pos: usize, start_line: u32, start_col: u32) -> Token {
        self.bump(); // opening delimiter
        loop {
            match self.peek_char() {
                None => {
                    return self.make_token(
                        TokenKind::Error("unterminated string literal"),
                        start_pos,
                        start_line,
                        start_col,
                        None,
                    );
                }
                Some('\\') => {
                    self.bump();
                    if self.peek_char().is_some() {
                        self.bump();
                    }
                }
                Some(c) if c == delim => {
                    self.bump();
                    break;
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
        self.make_token(TokenKind::String, start_pos, start_line, start_col, None)
    }

    fn scan_operator(&mut self, start_pos: usize, start_line: u32, start_col: u32) -> Token {
        const THREE: &[(&str, Operator)] = &[
            ("<<=", Operator::ShlAssign),
            (">>=", Operator::ShrAssign),
            ("===", Operator::StrictEq),
            ("!==", Operator::StrictNeq),
            ("..<", Operator::RangeExcl),
            ("...", Operator::RangeIncl),
        ];
        const TWO: &[(&str, Operator)] = &[
            ("==", Operator::Eq),
            ("!=", Operator::Neq),
            ("<=", Operator::Leq),
            (">=", Operator::Geq),
            ("<<", Operator::Shl),
            (">>", Operator::Shr),
            ("&&", Operator::And),
            ("||", Operator::Or),
            ("+=", Operator::PlusAssign),
            ("-=", Operator::MinusAssign),
            ("*=", Operator::StarAssign),
            ("/=", Operator::SlashAssign),
            ("%=", Operator::PercentAssign),
            ("&=", Operator::AndAssign),
            ("|=", Operator::OrAssign),
            ("^=", Operator::XorAssign),
            ("~=", Operator::TildeAssign),
        ];
        const ONE: &[(char, Operator)] = &[
            ('+', Operator::Plus),
            ('-', Operator::Minus),
            ('*', Operator::Star),
            ('/', Operator::Slash),
            ('%', Operator::Percent),
            ('=', Operator::Assign),
            ('<', Operator::Lt),
            ('>', Operator::Gt),
            ('!', Operator::Bang),
            ('&', Operator::Amp),
            ('|', Operator::Pipe),
            ('^', Operator::Caret),
            ('~', Operator::Tilde),
            ('.', Operator::Dot),
            (',', Operator::Comma),
            (':', Operator::Colon),
            ('?', Operator::Question),
            ('(', Operator::LParen),
            (')', Operator::RParen),
            ('[', Operator::LBracket),
            (']', Operator::RBracket),
            ('{', Operator::LBrace),
            ('}', Operator::RBrace),
        ];

        let rest = &self.source[self.pos..];
        for (text, op) in THREE {
            if rest.starts_with(text) {
                for _ in 0..3 {
                    self.bump();
                }
                return self.make_token(TokenKind::Op(*op), start_pos, start_line, start_col, None);
            }
        }
        for (text, op) in TWO {
            if rest.starts_with(text) {
                for _ in 0..2 {
                    self.bump();
                }
                return self.make_token(TokenKind::Op(*op), start_pos, start_line, start_col, None);
            }
        }
        if let Some(c0) = self.peek_char() {
            for (c, op) in ONE {
                if c0 == *c {
                    self.bump();
                    return self.make_token(
                        TokenKind::Op(*op),
                        start_pos,
                        start_line,
                        start_col,
                        None,
                    );
                }
            }
            self.bump();
        }
        self.make_token(
            TokenKind::Error("unknown operator character"),
            start_pos,
            start_line,
            start_col,
            None,
        )
    }
}

/// A stack of lexers for `#include`. The bottom of the
/// stack is the originally-compiled source; `#include "path"` pushes a new lexer for
/// the included file's content. When the top lexer is exhausted, it is popped
/// automatically and scanning resumes in the lexer beneath it.
pub struct LexerStack {
    stack: Vec<Lexer>,
}

impl LexerStack {
    pub fn new(root: Lexer) -> Self {
        LexerStack { stack: vec![root] }
    }

    pub fn push(&mut self, lexer: Lexer) {
        self.stack.push(lexer);
    }

    /// The file id of whichever lexer is currently on top (used to tag parse errors
    /// with the right source file before a token has actually been produced).
    pub fn current_file_id(&self) -> u32 {
        self.stack.last().map(|l| l.file_id()).unwrap_or(0)
    }

    fn pop_exhausted_tops(&mut self) {
        while self.stack.len() > 1 {
            let top_is_eof = matches!(
                self.stack.last_mut().unwrap().peek().kind,
                TokenKind::Eof
            );
            if top_is_eof {
                self.stack.pop();
            } else {
                break;
            }
        }
    }

    pub fn next(&mut self) -> Token {
        self.pop_exhausted_tops();
        self.stack
            .last_mut()
            .map(|l| l.next())
            .unwrap_or(Token {
                kind: TokenKind::Eof,
                offset: 0,
                byte_len: 0,
                utf8_len: 0,
                line: 1,
                column: 1,
                file_id: 0,
                builtin: None,
            })
    }

    pub fn peek(&mut self) -> Token {
        self.pop_exhausted_tops();
        match self.stack.last_mut() {
            Some(l) => l.peek().clone(),
            None => Token {
                kind: TokenKind::Eof,
                offset: 0,
                byte_len: 0,
                utf8_len: 0,
                line: 1,
                column: 1,
                file_id: 0,
                builtin: None,
            },
        }
    }

    pub fn peek2(&mut self) -> Token {
        self.pop_exhausted_tops();
        match self.stack.last_mut() {
            Some(l) => l.peek2().clone(),
            None => self.peek(),
        }
    }

    /// Slice token text out of whichever lexer currently owns `token`'s `file_id`.
    /// Included files keep their own `Lexer` (and hence their own source buffer)
    /// alive on the stack for exactly as long as tokens referencing them can still
    /// be live, i.e. until that lexer is popped.
    pub fn text_of<'a>(&'a self, token: &Token) -> &'a str {
        self.stack
            .iter()
            .rev()
            .find(|l| l.file_id() == token.file_id)
            .map(|l| token.text(l.source()))
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src, 0);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next();
            let eof = tok.kind.is_eof();
            out.push(tok.kind);
            if eof {
                break;
            }
        }
        out
    }

    #[test]
    fn skips_whitespace_and_comments() {
        let toks = kinds("  // hi\n  /* block */  func");
        assert_eq!(
            toks,
            vec![
                TokenKind::Comment(CommentKind::Line),
                TokenKind::Comment(CommentKind::Block),
                TokenKind::Keyword(Keyword::Func),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn nested_block_comments() {
        let toks = kinds("/* outer /* inner */ still outer */ 1");
        assert_eq!(
            toks,
            vec![
                TokenKind::Comment(CommentKind::Block),
                TokenKind::Number,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn identifiers_and_keywords() {
        let mut lexer = Lexer::new("foo_bar func", 0);
        let t1 = lexer.next();
        assert_eq!(t1.kind, TokenKind::Identifier);
        assert_eq!(t1.text(lexer.source()), "foo_bar");
        let t2 = lexer.next();
        assert_eq!(t2.kind, TokenKind::Keyword(Keyword::Func));
    }

    #[test]
    fn builtin_substitution() {
        let mut lexer = Lexer::new("__LINE__ __FILE__", 3);
        let t1 = lexer.next();
        assert_eq!(t1.kind, TokenKind::Number);
        assert_eq!(t1.builtin, Some(Builtin::Line));
        let t2 = lexer.next();
        assert_eq!(t2.kind, TokenKind::String);
        assert_eq!(t2.builtin, Some(Builtin::File));
    }

    #[test]
    fn numeric_prefixes() {
        let src = "0xFF 0b101 0o17 3.14 2e10 .5";
        let mut lexer = Lexer::new(src, 0);
        let mut texts = Vec::new();
        loop {
            let tok = lexer.next();
            if tok.kind.is_eof() {
                break;
            }
            texts.push(tok.text(lexer.source()).to_string());
        }
        assert_eq!(texts, vec!["0xFF", "0b101", "0o17", "3.14", "2e10", ".5"]);
    }

    #[test]
    fn maximal_munch_operators() {
        let toks = kinds("<<= ..< ... == = <");
        assert_eq!(
            toks,
            vec![
                TokenKind::Op(Operator::ShlAssign),
                TokenKind::Op(Operator::RangeExcl),
                TokenKind::Op(Operator::RangeIncl),
                TokenKind::Op(Operator::Eq),
                TokenKind::Op(Operator::Assign),
                TokenKind::Op(Operator::Lt),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn line_and_column_track_utf8_codepoints() {
        let mut lexer = Lexer::new("café x", 0);
        let t1 = lexer.next();
        assert_eq!(t1.kind, TokenKind::Identifier);
        assert_eq!(t1.text(lexer.source()), "café");
        // 'x' starts at column 6 (c-a-f-é counted as 4 codepoints, + space = col 6)
        let t2 = lexer.next();
        assert_eq!(t2.column, 6);
    }

    #[test]
    fn crlf_counts_as_one_newline() {
        let mut lexer = Lexer::new("a\r\nb", 0);
        let t1 = lexer.next();
        assert_eq!(t1.line, 1);
        let t2 = lexer.next();
        assert_eq!(t2.line, 2);
        assert_eq!(t2.column, 1);
    }

    #[test]
    fn unterminated_string_is_error() {
        let mut lexer = Lexer::new("\"abc", 0);
        let tok = lexer.next();
        assert!(matches!(tok.kind, TokenKind::Error(_)));
    }

    #[test]
    fn shebang_skipped_on_first_line() {
        let mut lexer = Lexer::new("#!/usr/bin/env lumen\nfunc", 0);
        let tok = lexer.next();
        assert_eq!(tok.kind, TokenKind::Keyword(Keyword::Func));
    }

    #[test]
    fn peek_does_not_consume() {
        let mut lexer = Lexer::new("func main", 0);
        assert_eq!(lexer.peek().kind, TokenKind::Keyword(Keyword::Func));
        assert_eq!(lexer.peek().kind, TokenKind::Keyword(Keyword::Func));
        let tok = lexer.next();
        assert_eq!(tok.kind, TokenKind::Keyword(Keyword::Func));
        assert_eq!(lexer.next().kind, TokenKind::Identifier);
    }

    #[test]
    fn lexer_stack_pops_exhausted_include() {
        let root = Lexer::new("a", 0);
        let mut stack = LexerStack::new(root);
        stack.push(Lexer::new("b", 1));
        let t1 = stack.next();
        assert_eq!(stack.text_of(&t1), "b");
        let t2 = stack.next();
        assert_eq!(stack.text_of(&t2), "a");
        assert!(stack.next().kind.is_eof());
    }
}
