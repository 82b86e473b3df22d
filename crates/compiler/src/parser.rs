//! Recursive-descent statement parser plus a Pratt expression parser.
//!
//! `Parser` owns the token source (a [`LexerStack`]) and the [`Ast`] arena being built.
//! It does not own or consult symbol tables: those belong to the two semantic passes,
//! which run after the whole tree exists. The only state this module tracks beyond the
//! token stream is the innermost enclosing function/class declaration, needed for two
//! parse-time-only rewrites the original performs before semantic analysis ever sees the
//! tree: lowering a `func`/`class`/`enum` declared inside a function body into an
//! ordinary `var` declaration, and inserting a hidden `outer` ivar into a class nested
//! inside another class.

use crate::ast::{
    Access, Ast, FlowKind, JumpKind, LiteralValue, LoopKind, NodeId, NodeKind, NodeMeta, Storage,
    SubOpKind, VarInit,
};
use crate::delegate::{Delegate, UnitTestExpectation};
use crate::error::{CompileError, ErrorKind, ErrorSink};
use crate::lexer::{Lexer, LexerStack};
use crate::token::{Keyword, Operator, Token, TokenKind};
use lumen_runtime::Value;
use std::collections::VecDeque;

const SELF_PARAMETER_NAME: &str = "self";
const SETTER_PARAMETER_NAME: &str = "value";
const OUTER_IVAR_NAME: &str = "outer";
const GETTER_FUNCTION_NAME: &str = "get";
const SETTER_FUNCTION_NAME: &str = "set";

/// File id reserved for host-injected pre-code; never collides with a
/// real source/include file id, which are allocated by the host starting at 0.
pub const PRECODE_FILE_ID: u32 = u32::MAX;

// Precedence ladder. Ternary's `?` is handled as a pseudo-infix trigger
// at TERNARY; everything else is a plain left-to-right climb except ASSIGN/AND/OR, which
// recurse one level lower on their right-hand side to get right-associativity.
const PREC_ASSIGN: i32 = 90;
const PREC_TERNARY: i32 = 100;
const PREC_LOGIC_OR: i32 = 110;
const PREC_LOGIC_AND: i32 = 120;
const PREC_COMPARISON: i32 = 130;
const PREC_ISA: i32 = 132;
const PREC_RANGE: i32 = 135;
const PREC_TERM: i32 = 140;
const PREC_FACTOR: i32 = 150;
const PREC_SHIFT: i32 = 160;
const PREC_UNARY: i32 = 170;

fn binary_precedence(op: Operator) -> i32 {
    use Operator::*;
    match op {
        Assign | PlusAssign | MinusAssign | StarAssign | SlashAssign | PercentAssign
        | AndAssign | OrAssign | XorAssign | ShlAssign | ShrAssign => PREC_ASSIGN,
        Or => PREC_LOGIC_OR,
        And => PREC_LOGIC_AND,
        Eq | Neq | Leq | Geq | Lt | Gt | StrictEq | StrictNeq | TildeAssign => PREC_COMPARISON,
        Is => PREC_ISA,
        RangeExcl | RangeIncl => PREC_RANGE,
        Plus | Minus | Pipe | Caret => PREC_TERM,
        Star | Slash | Percent | Amp => PREC_FACTOR,
        Shl | Shr => PREC_SHIFT,
        _ => 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DeclKind {
    Function(String),
    Class(String),
}

pub struct ParseOutput {
    pub ast: Ast,
    pub root: Vec<NodeId>,
    pub errors: Vec<CompileError>,
    pub warnings: Vec<CompileError>,
}

/// Parses `source` (with `file_id` as its outermost file id) into a flat list of
/// top-level statement/declaration node ids, plus whatever pre-code the host's
/// [`Delegate::precode`] callback supplies, injected first.
pub fn parse(source: impl Into<String>, file_id: u32, delegate: &mut Delegate) -> ParseOutput {
    let precode_text = delegate.precode.as_mut().and_then(|f| f());

    let mut parser = Parser {
        lexer: LexerStack::new(Lexer::new(source.into(), file_id)),
        queue: VecDeque::new(),
        ast: Ast::new(),
        errors: ErrorSink::new(),
        delegate,
        decl_stack: Vec::new(),
        enclosing_decl_node: Vec::new(),
        first_line: 0,
    };

    let mut root = Vec::new();
    if let Some(text) = precode_text {
        let saved = std::mem::replace(
            &mut parser.lexer,
            LexerStack::new(Lexer::new(text, PRECODE_FILE_ID)),
        );
        root.extend(parser.parse_top_level());
        parser.lexer = saved;
    }
    root.extend(parser.parse_top_level());

    ParseOutput {
        ast: parser.ast,
        root,
        errors: parser.errors.into_errors(),
        warnings: parser.errors.warnings().to_vec(),
    }
}

struct Parser<'d> {
    lexer: LexerStack,
    queue: VecDeque<Token>,
    ast: Ast,
    errors: ErrorSink,
    delegate: &'d mut Delegate,
    decl_stack: Vec<DeclKind>,
    enclosing_decl_node: Vec<NodeId>,
    /// Tracks whether we're still on line 1, for `#!` shebang-as-comment handling inside
    /// `#` macro dispatch (the lexer already strips a true file-leading `#!`; this covers
    /// `#!` appearing as an ordinary macro token later and being misread as unittest/include).
    first_line: u32,
}

impl<'d> Parser<'d> {
    fn fill(&mut self, n: usize) {
        while self.queue.len() <= n {
            let tok = self.lexer.next();
            match tok.kind {
                TokenKind::Comment(kind) => {
                    if let Some(cb) = self.delegate.comment.as_mut() {
                        cb(kind, tok.line, tok.column);
                    }
                }
                _ => {
                    if let Some(cb) = self.delegate.parser_token.as_mut() {
                        cb(&tok);
                    }
                    self.queue.push_back(tok);
                }
            }
        }
    }

    fn peek(&mut self) -> Token {
        self.fill(0);
        self.queue[0].clone()
    }

    fn peek2(&mut self) -> Token {
        self.fill(1);
        self.queue[1].clone()
    }

    fn advance(&mut self) -> Token {
        self.fill(0);
        self.first_line = self.first_line.max(self.queue[0].line);
        self.queue.pop_front().unwrap()
    }

    fn text(&self, tok: &Token) -> String {
        self.lexer.text_of(tok).to_string()
    }

    fn error_at(&mut self, token: &Token, message: impl Into<String>) {
        let err = CompileError::new(
            ErrorKind::Syntax,
            token.file_id,
            token.line,
            token.column,
            token.offset,
            message.into(),
        );
        (self.delegate.error)(&err);
        self.errors.report(err);
    }

    fn warn_at(&mut self, token: &Token, message: impl Into<String>) {
        let err = CompileError::new(
            ErrorKind::Warning,
            token.file_id,
            token.line,
            token.column,
            token.offset,
            message.into(),
        );
        (self.delegate.error)(&err);
        self.errors.report(err);
    }

    /// Like `error_at`, but reports `ErrorKind::Semantic` instead of `Syntax`. Used for
    /// productions that parse grammatically but are rejected on meaning, not shape (e.g.
    /// `event` declarations).
    fn semantic_error_at(&mut self, token: &Token, message: impl Into<String>) {
        let err = CompileError::new(
            ErrorKind::Semantic,
            token.file_id,
            token.line,
            token.column,
            token.offset,
            message.into(),
        );
        (self.delegate.error)(&err);
        self.errors.report(err);
    }

    /// Allocates a node, stamping it with whatever function/class/module/enum
    /// declaration is currently innermost.
    fn alloc(&mut self, token: Token, kind: NodeKind) -> NodeId {
        let mut meta = NodeMeta::new(token);
        meta.enclosing_declaration = self.enclosing_decl_node.last().copied();
        self.ast.alloc(meta, kind)
    }

    fn reserve(&mut self, token: Token) -> NodeId {
        self.alloc(token, NodeKind::Empty)
    }

    fn fill_node(&mut self, id: NodeId, kind: NodeKind) {
        self.ast.get_mut(id).kind = kind;
    }

    fn expect_op(&mut self, op: Operator) -> bool {
        let tok = self.peek();
        if tok.kind == TokenKind::Op(op) {
            self.advance();
            true
        } else {
            self.error_at(
                &tok,
                format!("Expected '{}' but found {:?}.", op.text(), tok.kind),
            );
            false
        }
    }

    fn optional_op(&mut self, op: Operator) -> bool {
        if self.peek().kind == TokenKind::Op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn optional_semicolon(&mut self) -> bool {
        if matches!(self.peek().kind, TokenKind::Semicolon) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: Keyword) -> bool {
        let tok = self.peek();
        if tok.kind == TokenKind::Keyword(kw) {
            self.advance();
            true
        } else {
            self.error_at(&tok, format!("Expected '{}' but found {:?}.", kw.text(), tok.kind));
            false
        }
    }

    fn expect_identifier(&mut self) -> Option<(String, Token)> {
        let tok = self.peek();
        if tok.kind == TokenKind::Identifier {
            self.advance();
            let name = self.text(&tok);
            Some((name, tok))
        } else {
            self.error_at(&tok, format!("Expected identifier but found {:?}.", tok.kind));
            None
        }
    }

    /// Optional type annotation (`: Identifier`). Consulted through the delegate but
    /// never semantically enforced.
    fn parse_optional_type_annotation(&mut self) -> Option<String> {
        if !self.optional_op(Operator::Colon) {
            return None;
        }
        let (name, _) = self.expect_identifier()?;
        if let Some(cb) = self.delegate.type_annotation.as_mut() {
            cb(&name);
        }
        Some(name)
    }

    // ---------------------------------------------------------------- top level ----

    fn parse_top_level(&mut self) -> Vec<NodeId> {
        let mut stmts = Vec::new();
        loop {
            if self.peek().kind.is_eof() {
                break;
            }
            if let Some(stmt) = self.parse_statement() {
                stmts.push(stmt);
            }
        }
        stmts
    }

    // ------------------------------------------------------------- statements ------

    fn parse_statement(&mut self) -> Option<NodeId> {
        let tok = self.peek();
        match &tok.kind {
            TokenKind::Error(msg) => {
                self.advance();
                self.error_at(&tok, msg.to_string());
                None
            }
            TokenKind::Keyword(Keyword::Case) | TokenKind::Keyword(Keyword::Default) => {
                Some(self.parse_label_statement())
            }
            TokenKind::Keyword(Keyword::If) | TokenKind::Keyword(Keyword::Switch) => {
                Some(self.parse_flow_statement())
            }
            TokenKind::Keyword(Keyword::While)
            | TokenKind::Keyword(Keyword::Repeat)
            | TokenKind::Keyword(Keyword::For) => Some(self.parse_loop_statement()),
            TokenKind::Keyword(Keyword::Break)
            | TokenKind::Keyword(Keyword::Continue)
            | TokenKind::Keyword(Keyword::Return) => Some(self.parse_jump_statement()),
            TokenKind::Op(Operator::LBrace) => Some(self.parse_compound_statement()),
            TokenKind::Semicolon => {
                self.advance();
                Some(self.alloc(tok, NodeKind::Empty))
            }
            TokenKind::Keyword(Keyword::Import) => {
                self.advance();
                // Syntactic sugar the host resolves on its own; contributes nothing to
                // the tree.
                if self.peek().kind == TokenKind::Identifier {
                    self.advance();
                }
                self.optional_semicolon();
                None
            }
            TokenKind::Special => {
                self.advance();
                if let Some((_, _)) = self.expect_identifier() {
                    self.warn_at(&tok, "Unknown special token. Declaration will be ignored.");
                }
                None
            }
            TokenKind::Macro => Some(self.parse_macro_statement()).flatten(),
            _ if self.is_declaration_start(&tok.kind) => self.parse_declaration_statement(),
            _ => {
                let expr = self.parse_expression();
                self.optional_semicolon();
                Some(expr)
            }
        }
    }

    fn is_access_specifier(kind: &TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::Keyword(Keyword::Private)
                | TokenKind::Keyword(Keyword::Internal)
                | TokenKind::Keyword(Keyword::Public)
        )
    }

    fn is_storage_specifier(kind: &TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::Keyword(Keyword::Static)
                | TokenKind::Keyword(Keyword::Extern)
                | TokenKind::Keyword(Keyword::Lazy)
        )
    }

    fn is_declaration_start(&self, kind: &TokenKind) -> bool {
        Self::is_access_specifier(kind)
            || Self::is_storage_specifier(kind)
            || matches!(
                kind,
                TokenKind::Keyword(Keyword::Func)
                    | TokenKind::Keyword(Keyword::Enum)
                    | TokenKind::Keyword(Keyword::Module)
                    | TokenKind::Keyword(Keyword::Event)
                    | TokenKind::Keyword(Keyword::Class)
                    | TokenKind::Keyword(Keyword::Struct)
                    | TokenKind::Keyword(Keyword::Var)
                    | TokenKind::Keyword(Keyword::Const)
            )
    }

    fn access_from(kind: &TokenKind) -> Access {
        match kind {
            TokenKind::Keyword(Keyword::Private) => Access::Private,
            TokenKind::Keyword(Keyword::Internal) => Access::Internal,
            TokenKind::Keyword(Keyword::Public) => Access::Public,
            _ => Access::Default,
        }
    }

    fn storage_from(kind: &TokenKind) -> Storage {
        match kind {
            TokenKind::Keyword(Keyword::Static) => Storage::Static,
            TokenKind::Keyword(Keyword::Extern) => Storage::Extern,
            TokenKind::Keyword(Keyword::Lazy) => Storage::Lazy,
            _ => Storage::Default,
        }
    }

    fn parse_declaration_statement(&mut self) -> Option<NodeId> {
        let mut peek = self.peek();
        let mut access = Access::Default;
        let mut storage = Storage::Default;

        if Self::is_access_specifier(&peek.kind) {
            access = Self::access_from(&peek.kind);
            self.advance();
            peek = self.peek();
        }
        if Self::is_storage_specifier(&peek.kind) {
            storage = Self::storage_from(&peek.kind);
            self.advance();
            peek = self.peek();
        }

        if matches!(peek.kind, TokenKind::Semicolon)
            && (access != Access::Default || storage != Storage::Default)
        {
            self.error_at(&peek, "Access or storage specifier cannot be used here.");
        }

        match peek.kind {
            TokenKind::Keyword(Keyword::Func) => self.parse_function_declaration(access, storage),
            TokenKind::Keyword(Keyword::Enum) => Some(self.parse_enum_declaration(access, storage)),
            TokenKind::Keyword(Keyword::Module) => Some(self.parse_module_declaration(access, storage)),
            TokenKind::Keyword(Keyword::Event) => {
                self.parse_event_declaration(access, storage);
                None
            }
            TokenKind::Keyword(Keyword::Class) | TokenKind::Keyword(Keyword::Struct) => {
                self.parse_class_declaration(access, storage)
            }
            TokenKind::Semicolon => {
                self.advance();
                Some(self.alloc(peek, NodeKind::Empty))
            }
            TokenKind::Keyword(Keyword::Var) | TokenKind::Keyword(Keyword::Const) => {
                Some(self.parse_variable_declaration(true, access, storage))
            }
            _ => {
                self.error_at(&peek, format!("Unrecognized token {:?}.", peek.kind));
                None
            }
        }
    }

    fn parse_label_statement(&mut self) -> NodeId {
        let tok = self.advance();
        let is_case = tok.kind == TokenKind::Keyword(Keyword::Case);
        let expr = if is_case { Some(self.parse_expression()) } else { None };
        self.expect_op(Operator::Colon);
        let stmt = self.parse_statement();
        let label_id = tok.offset; // unique-enough per source position
        self.alloc(
            tok,
            NodeKind::Label {
                flow_kind: if is_case { FlowKind::Switch } else { FlowKind::Switch },
                expr,
                body: stmt,
                label_id,
            },
        )
    }

    fn parse_flow_statement(&mut self) -> NodeId {
        let tok = self.advance();
        let is_if = tok.kind == TokenKind::Keyword(Keyword::If);
        let parenthesized = self.optional_op(Operator::LParen);
        let cond = self.parse_expression();
        if parenthesized {
            self.expect_op(Operator::RParen);
        }
        let then_branch = self
            .parse_statement()
            .unwrap_or_else(|| self.alloc(tok.clone(), NodeKind::Empty));
        let else_branch = if is_if && self.peek().kind == TokenKind::Keyword(Keyword::Else) {
            self.advance();
            self.parse_statement()
        } else {
            None
        };
        self.alloc(
            tok,
            NodeKind::Flow {
                flow_kind: if is_if { FlowKind::If } else { FlowKind::Switch },
                cond,
                then_branch,
                else_branch,
            },
        )
    }

    fn parse_loop_statement(&mut self) -> NodeId {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Keyword(Keyword::While) => {
                let parenthesized = self.optional_op(Operator::LParen);
                let cond = self.parse_expression();
                if parenthesized {
                    self.expect_op(Operator::RParen);
                }
                let body = self
                    .parse_statement()
                    .unwrap_or_else(|| self.alloc(tok.clone(), NodeKind::Empty));
                self.alloc(
                    tok,
                    NodeKind::Loop {
                        loop_kind: LoopKind::While,
                        cond: Some(cond),
                        body,
                        expr: None,
                        close_at_slot: None,
                    },
                )
            }
            TokenKind::Keyword(Keyword::Repeat) => {
                let body = self
                    .parse_statement()
                    .unwrap_or_else(|| self.alloc(tok.clone(), NodeKind::Empty));
                self.expect_keyword(Keyword::While);
                let parenthesized = self.optional_op(Operator::LParen);
                let expr = self.parse_expression();
                if parenthesized {
                    self.expect_op(Operator::RParen);
                }
                self.optional_semicolon();
                self.alloc(
                    tok,
                    NodeKind::Loop {
                        loop_kind: LoopKind::Repeat,
                        cond: None,
                        body,
                        expr: Some(expr),
                        close_at_slot: None,
                    },
                )
            }
            TokenKind::Keyword(Keyword::For) => {
                let parenthesized = self.optional_op(Operator::LParen);
                let cond = if matches!(
                    self.peek().kind,
                    TokenKind::Keyword(Keyword::Var) | TokenKind::Keyword(Keyword::Const)
                ) {
                    self.parse_variable_declaration(false, Access::Default, Storage::Default)
                } else {
                    self.parse_expression()
                };
                self.expect_keyword(Keyword::In);
                let expr = self.parse_expression();
                if parenthesized {
                    self.expect_op(Operator::RParen);
                }
                let body = self
                    .parse_statement()
                    .unwrap_or_else(|| self.alloc(tok.clone(), NodeKind::Empty));
                self.alloc(
                    tok,
                    NodeKind::Loop {
                        loop_kind: LoopKind::For,
                        cond: Some(cond),
                        body,
                        expr: Some(expr),
                        close_at_slot: None,
                    },
                )
            }
            _ => unreachable!("parse_loop_statement called on non-loop token"),
        }
    }

    fn parse_jump_statement(&mut self) -> NodeId {
        let tok = self.advance();
        let kind = match tok.kind {
            TokenKind::Keyword(Keyword::Break) => JumpKind::Break,
            TokenKind::Keyword(Keyword::Continue) => JumpKind::Continue,
            TokenKind::Keyword(Keyword::Return) => JumpKind::Return,
            _ => unreachable!("parse_jump_statement called on non-jump token"),
        };
        let expr = if kind == JumpKind::Return && !matches!(self.peek().kind, TokenKind::Semicolon)
        {
            Some(self.parse_expression())
        } else {
            None
        };
        self.optional_semicolon();
        self.alloc(tok, NodeKind::Jump { jump_kind: kind, expr })
    }

    fn parse_compound_statement(&mut self) -> NodeId {
        self.expect_op(Operator::LBrace);
        let tok = self.peek();
        let mut stmts = Vec::new();
        loop {
            let peek = self.peek();
            if matches!(peek.kind, TokenKind::Op(Operator::RBrace)) || peek.kind.is_eof() {
                break;
            }
            if let Some(stmt) = self.parse_statement() {
                stmts.push(stmt);
            }
        }
        self.expect_op(Operator::RBrace);
        self.alloc(
            tok,
            NodeKind::Compound {
                stmts,
                symtab: None,
                close_at_slot: None,
            },
        )
    }

    /// `import`/`@special`/unknown-`#`-macro all parse cleanly but never do produce a
    /// node; wraps the common "one token consumed, nothing added" shape.
    fn parse_macro_statement(&mut self) -> Option<NodeId> {
        let hash_tok = self.advance(); // '#'
        if matches!(self.peek().kind, TokenKind::Op(Operator::Bang)) && self.first_line <= 1 {
            self.advance();
            // Shebang reaching here (not stripped by the lexer) is treated as a
            // line-comment; nothing else on the line is meaningful.
            while !matches!(self.peek().kind, TokenKind::Semicolon) && !self.peek().kind.is_eof() {
                self.advance();
            }
            return None;
        }
        let Some((name, _)) = self.expect_identifier() else {
            self.warn_at(&hash_tok, "Unknown macro token. Declaration will be ignored.");
            return None;
        };
        match name.as_str() {
            "unittest" => self.parse_unittest_macro(),
            "include" => self.parse_include_macro(),
            _ => {
                self.warn_at(&hash_tok, "Unknown macro token. Declaration will be ignored.");
                None
            }
        }
    }

    fn parse_unittest_macro(&mut self) -> Option<NodeId> {
        self.expect_op(Operator::LBrace);
        let mut expectation = UnitTestExpectation {
            name: String::new(),
            note: None,
            error: None,
            error_row: None,
            error_col: None,
            result: None,
        };
        loop {
            let peek = self.peek();
            if matches!(peek.kind, TokenKind::Op(Operator::RBrace)) || peek.kind.is_eof() {
                break;
            }
            let Some((field, _)) = self.expect_identifier() else {
                break;
            };
            self.expect_op(Operator::Colon);
            match field.as_str() {
                "name" => expectation.name = self.parse_unittest_string(),
                "note" => expectation.note = Some(self.parse_unittest_string()),
                "error" => expectation.error = Some(self.parse_unittest_string()),
                "error_row" => expectation.error_row = Some(self.parse_unittest_int() as u32),
                "error_col" => expectation.error_col = Some(self.parse_unittest_int() as u32),
                "result" => expectation.result = Some(self.parse_unittest_value()),
                _ => {
                    self.error_at(&peek, format!("Unknown #unittest field '{field}'."));
                }
            }
            self.optional_semicolon();
        }
        self.expect_op(Operator::RBrace);
        self.optional_semicolon();
        if let Some(cb) = self.delegate.unittest.as_mut() {
            cb(expectation);
        }
        None
    }

    fn parse_unittest_string(&mut self) -> String {
        let tok = self.peek();
        if tok.kind == TokenKind::String {
            self.advance();
            unescape_string(&self.text(&tok))
        } else {
            self.error_at(&tok, "Expected string literal in #unittest field.");
            String::new()
        }
    }

    fn parse_unittest_int(&mut self) -> i64 {
        let tok = self.peek();
        if tok.kind == TokenKind::Number {
            self.advance();
            self.text(&tok).parse().unwrap_or(0)
        } else {
            self.error_at(&tok, "Expected number in #unittest field.");
            0
        }
    }

    fn parse_unittest_value(&mut self) -> Value {
        let tok = self.peek();
        match &tok.kind {
            TokenKind::Number => {
                self.advance();
                let text = self.text(&tok);
                if text.contains('.') {
                    Value::Float(text.parse().unwrap_or(0.0))
                } else {
                    Value::Int(text.parse().unwrap_or(0))
                }
            }
            TokenKind::String => {
                self.advance();
                Value::String(unescape_string(&self.text(&tok)).into())
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Value::Bool(true)
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Value::Bool(false)
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Value::Null
            }
            _ => {
                self.error_at(&tok, "Expected literal value in #unittest result field.");
                Value::Undefined
            }
        }
    }

    fn parse_include_macro(&mut self) -> Option<NodeId> {
        let tok = self.peek();
        loop {
            let path_tok = self.peek();
            if path_tok.kind != TokenKind::String {
                self.error_at(&path_tok, "Expected a string literal path after #include.");
                break;
            }
            self.advance();
            let path = unescape_string(&self.text(&path_tok));
            match (self.delegate.load_file)(&path) {
                Ok((text, file_id)) => self.lexer.push(Lexer::new(text, file_id)),
                Err(message) => self.error_at(&path_tok, message),
            }
            if !self.optional_op(Operator::Comma) {
                break;
            }
        }
        self.optional_semicolon();
        let _ = tok;
        None
    }

    // ----------------------------------------------------------------- declarations -

    fn local_store_declaration(
        &mut self,
        identifier: String,
        access: Access,
        storage: Storage,
        decl: NodeId,
        tok: Token,
    ) -> NodeId {
        let var = self.alloc(
            tok.clone(),
            NodeKind::Variable {
                identifier,
                type_annotation: None,
                init: VarInit::Expr(decl),
                parent_decl: None,
                is_computed: false,
                is_upvalue: false,
                slot_index: 0,
            },
        );
        self.alloc(
            tok,
            NodeKind::VariableDecl {
                is_const: false,
                access,
                storage,
                vars: vec![var],
            },
        )
    }

    fn is_function_enclosed(&self) -> bool {
        matches!(self.decl_stack.last(), Some(DeclKind::Function(_)))
    }

    fn is_class_enclosed(&self) -> bool {
        matches!(self.decl_stack.last(), Some(DeclKind::Class(_)))
    }

    /// Resolves `__CLASS__`/`__FUNCTION__` to the nearest enclosing name, innermost first.
    fn enclosing_name(&self, want_function: bool) -> Option<&str> {
        self.decl_stack.iter().rev().find_map(|f| match f {
            DeclKind::Function(n) if want_function => Some(n.as_str()),
            DeclKind::Class(n) if !want_function => Some(n.as_str()),
            _ => None,
        })
    }

    fn parse_function_declaration(&mut self, access: Access, storage: Storage) -> Option<NodeId> {
        let (node, identifier) = self.parse_function(true, access, storage);
        let node = node?;
        if self.is_function_enclosed() {
            let tok = self.ast.get(node).meta.token.clone();
            Some(self.local_store_declaration(identifier.unwrap(), access, storage, node, tok))
        } else {
            Some(node)
        }
    }

    /// Shared by function declarations and `func`/`{ }` function-expressions. `is_declaration` controls whether an identifier is mandatory.
    fn parse_function(
        &mut self,
        is_declaration: bool,
        access: Access,
        storage: Storage,
    ) -> (Option<NodeId>, Option<String>) {
        let is_implicit = matches!(self.peek().kind, TokenKind::Op(Operator::LBrace));
        let tok = if is_implicit {
            self.peek()
        } else {
            self.expect_keyword(Keyword::Func);
            self.peek()
        };

        let mut identifier = None;
        if is_declaration {
            let peek = self.peek();
            identifier = if let TokenKind::Op(op) = peek.kind {
                self.advance();
                Some(op.text().to_string())
            } else {
                self.expect_identifier().map(|(n, _)| n)
            };
        }

        if !is_implicit {
            self.expect_op(Operator::LParen);
        }
        let placeholder = self.reserve(tok.clone());
        self.enclosing_decl_node.push(placeholder);
        let (params, has_defaults) = if !is_implicit {
            self.parse_optional_parameter_declaration()
        } else {
            (
                vec![self.alloc(
                    tok.clone(),
                    NodeKind::Variable {
                        identifier: SELF_PARAMETER_NAME.to_string(),
                        type_annotation: None,
                        init: VarInit::None,
                        parent_decl: None,
                        is_computed: false,
                        is_upvalue: false,
                        slot_index: 0,
                    },
                )],
                false,
            )
        };
        if !is_implicit {
            self.expect_op(Operator::RParen);
        }

        self.decl_stack
            .push(DeclKind::Function(identifier.clone().unwrap_or_default()));
        let block = self.parse_compound_statement();
        self.decl_stack.pop();
        self.enclosing_decl_node.pop();
        self.optional_semicolon();

        self.fill_node(
            placeholder,
            NodeKind::Function {
                access,
                storage,
                identifier: identifier.clone().unwrap_or_default(),
                params,
                block: Some(block),
                symtab: None,
                nlocals: 0,
                nparams: 0,
                has_defaults,
                upvalues: Vec::new(),
                is_closure: false,
                useargs: false,
            },
        );
        (Some(placeholder), identifier)
    }

    /// Returns the parameter list (always led by the implicit `self`) plus whether any
    /// explicit parameter carried a default value.
    fn parse_optional_parameter_declaration(&mut self) -> (Vec<NodeId>, bool) {
        let mut params = Vec::new();
        let self_tok = self.peek();
        params.push(self.alloc(
            self_tok,
            NodeKind::Variable {
                identifier: SELF_PARAMETER_NAME.to_string(),
                type_annotation: None,
                init: VarInit::None,
                parent_decl: None,
                is_computed: false,
                is_upvalue: false,
                slot_index: 0,
            },
        ));

        if matches!(self.peek().kind, TokenKind::Op(Operator::RParen)) {
            return (params, false);
        }

        let mut has_defaults = false;
        loop {
            let Some((identifier, tok)) = self.expect_identifier() else {
                break;
            };
            let type_annotation = self.parse_optional_type_annotation();
            let init = if self.optional_op(Operator::Assign) {
                has_defaults = true;
                VarInit::Expr(self.parse_default_value_literal())
            } else {
                if has_defaults {
                    self.error_at(&tok, "A parameter without a default value cannot follow one that has a default value.");
                }
                VarInit::None
            };
            params.push(self.alloc(
                tok,
                NodeKind::Variable {
                    identifier,
                    type_annotation,
                    init,
                    parent_decl: None,
                    is_computed: false,
                    is_upvalue: false,
                    slot_index: 0,
                },
            ));
            if !self.optional_op(Operator::Comma) {
                break;
            }
        }
        (params, has_defaults)
    }

    /// A parameter default is a literal expression evaluated at compile time to a
    /// runtime value — number, string, boolean, or `null`/`undefined`, with an
    /// optional leading unary sign on numbers. Anything else is an error, but parsing
    /// still consumes one expression so the surrounding parameter list stays in sync.
    fn parse_default_value_literal(&mut self) -> NodeId {
        let tok = self.peek();
        let value = self.parse_expression();
        let folded = match &self.ast.get(value).kind {
            NodeKind::Unary { op, expr } if matches!(op, Operator::Plus | Operator::Minus) => {
                let op = *op;
                let expr = *expr;
                match &self.ast.get(expr).kind {
                    NodeKind::Literal { value: LiteralValue::Int(n) } => {
                        let n = if op == Operator::Minus { -n } else { *n };
                        Some(self.alloc(tok.clone(), NodeKind::Literal { value: LiteralValue::Int(n) }))
                    }
                    NodeKind::Literal { value: LiteralValue::Double(d) } => {
                        let d = if op == Operator::Minus { -d } else { *d };
                        Some(self.alloc(tok.clone(), NodeKind::Literal { value: LiteralValue::Double(d) }))
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        let value = folded.unwrap_or(value);
        if !matches!(
            self.ast.get(value).kind,
            NodeKind::Literal { .. }
                | NodeKind::KeywordExpr {
                    keyword: Keyword::True | Keyword::False | Keyword::Null | Keyword::Undefined
                }
        ) {
            self.error_at(&tok, "A parameter default value must be a literal.");
        }
        value
    }

    fn parse_getter_setter(&mut self) -> (Option<NodeId>, Option<NodeId>) {
        let mut getter = None;
        let mut setter = None;
        while !matches!(self.peek().kind, TokenKind::Op(Operator::RBrace)) && !self.peek().kind.is_eof() {
            let Some((identifier, tok)) = self.expect_identifier() else {
                break;
            };
            let is_getter = identifier == GETTER_FUNCTION_NAME;
            let is_setter = identifier == SETTER_FUNCTION_NAME;
            if !is_getter && !is_setter {
                self.error_at(&tok, "Expected 'get' or 'set' inside a computed property.");
                break;
            }

            let params = if is_getter {
                vec![self.alloc(
                    tok.clone(),
                    NodeKind::Variable {
                        identifier: SELF_PARAMETER_NAME.to_string(),
                        type_annotation: None,
                        init: VarInit::None,
                        parent_decl: None,
                        is_computed: false,
                        is_upvalue: false,
                        slot_index: 0,
                    },
                )]
            } else if matches!(self.peek().kind, TokenKind::Op(Operator::LParen)) {
                self.advance();
                let (explicit, _has_defaults) = self.parse_optional_parameter_declaration();
                self.expect_op(Operator::RParen);
                explicit
            } else {
                vec![
                    self.alloc(
                        tok.clone(),
                        NodeKind::Variable {
                            identifier: SELF_PARAMETER_NAME.to_string(),
                            type_annotation: None,
                            init: VarInit::None,
                            parent_decl: None,
                            is_computed: false,
                            is_upvalue: false,
                            slot_index: 0,
                        },
                    ),
                    self.alloc(
                        tok.clone(),
                        NodeKind::Variable {
                            identifier: SETTER_PARAMETER_NAME.to_string(),
                            type_annotation: None,
                            init: VarInit::None,
                            parent_decl: None,
                            is_computed: false,
                            is_upvalue: false,
                            slot_index: 0,
                        },
                    ),
                ]
            };

            let placeholder = self.reserve(tok.clone());
            self.enclosing_decl_node.push(placeholder);
            self.decl_stack.push(DeclKind::Function(identifier.clone()));
            let block = self.parse_compound_statement();
            self.decl_stack.pop();
            self.enclosing_decl_node.pop();
            self.fill_node(
                placeholder,
                NodeKind::Function {
                    access: Access::Default,
                    storage: Storage::Default,
                    identifier: identifier.clone(),
                    params,
                    block: Some(block),
                    symtab: None,
                    nlocals: 0,
                    nparams: 0,
                    has_defaults: false,
                    upvalues: Vec::new(),
                    is_closure: false,
                    useargs: false,
                },
            );
            if is_getter {
                getter = Some(placeholder);
            } else {
                setter = Some(placeholder);
            }
        }
        (getter, setter)
    }

    fn parse_variable_declaration(
        &mut self,
        is_statement: bool,
        access: Access,
        storage: Storage,
    ) -> NodeId {
        let type_tok = self.advance();
        let is_const = type_tok.kind == TokenKind::Keyword(Keyword::Const);
        if !matches!(
            type_tok.kind,
            TokenKind::Keyword(Keyword::Var) | TokenKind::Keyword(Keyword::Const)
        ) {
            self.error_at(&type_tok, "VAR or CONST expected here.");
        }

        let mut vars = Vec::new();
        loop {
            let Some((identifier, ident_tok)) = self.expect_identifier() else {
                break;
            };
            let type_annotation = self.parse_optional_type_annotation();

            let peek = self.peek();
            let init = if matches!(peek.kind, TokenKind::Op(Operator::Assign)) {
                self.advance();
                VarInit::Expr(self.parse_expression())
            } else if matches!(peek.kind, TokenKind::Op(Operator::LBrace)) {
                self.advance();
                let (getter, setter) = self.parse_getter_setter();
                self.expect_op(Operator::RBrace);
                match getter {
                    Some(getter) => VarInit::Accessor { getter, setter },
                    None => {
                        self.error_at(&peek, "A computed property needs at least a getter.");
                        VarInit::None
                    }
                }
            } else {
                VarInit::None
            };

            let is_computed = matches!(init, VarInit::Accessor { .. });
            vars.push(self.alloc(
                ident_tok,
                NodeKind::Variable {
                    identifier,
                    type_annotation,
                    init,
                    parent_decl: None,
                    is_computed,
                    is_upvalue: false,
                    slot_index: 0,
                },
            ));

            if !self.optional_op(Operator::Comma) {
                break;
            }
        }

        if is_statement {
            self.optional_semicolon();
        }

        self.alloc(
            type_tok,
            NodeKind::VariableDecl {
                is_const,
                access,
                storage,
                vars,
            },
        )
    }

    fn parse_enum_declaration(&mut self, access: Access, storage: Storage) -> NodeId {
        let tok = self.advance(); // 'enum'
        let Some((identifier, _)) = self.expect_identifier() else {
            return self.alloc(tok, NodeKind::Empty);
        };
        self.expect_op(Operator::LBrace);

        let mut members: Vec<(String, NodeId)> = Vec::new();
        let mut autoint: i64 = 0;
        let mut fixed_kind: Option<std::mem::Discriminant<LiteralValue>> = None;

        loop {
            if matches!(self.peek().kind, TokenKind::Op(Operator::RBrace)) {
                break;
            }
            let peek = self.peek();
            let enum_id = if peek.kind == TokenKind::Identifier {
                self.expect_identifier().map(|(n, _)| n)
            } else {
                self.error_at(&peek, format!("Identifier expected here (found {:?}).", peek.kind));
                None
            };

            let peek = self.peek();
            let has_assign = matches!(peek.kind, TokenKind::Op(Operator::Assign));
            if !has_assign
                && !matches!(
                    peek.kind,
                    TokenKind::Op(Operator::Comma) | TokenKind::Op(Operator::RBrace)
                )
            {
                self.error_at(&peek, format!("Token {:?} not allowed here.", peek.kind));
            }
            if !has_assign && fixed_kind.is_some() {
                self.error_at(&peek, "A default value is expected here.");
            }

            let value_node = if has_assign {
                self.advance();
                let value = self.parse_expression();
                Some(self.fold_enum_literal(value, &mut fixed_kind, &mut autoint))
            } else {
                None
            };

            let value_node = value_node.unwrap_or_else(|| {
                let v = self.alloc(
                    peek.clone(),
                    NodeKind::Literal {
                        value: LiteralValue::Int(autoint),
                    },
                );
                autoint += 1;
                v
            });

            if let Some(enum_id) = enum_id {
                if members.iter().any(|(name, _)| name == &enum_id) {
                    self.error_at(&peek, format!("Identifier {enum_id} redeclared."));
                } else {
                    members.push((enum_id, value_node));
                }
            }

            if !self.optional_op(Operator::Comma) {
                break;
            }
        }

        self.expect_op(Operator::RBrace);
        self.optional_semicolon();

        if members.is_empty() {
            self.error_at(&tok, format!("Empty enum {identifier} not allowed."));
        }

        let node = self.alloc(
            tok.clone(),
            NodeKind::Enum {
                identifier: identifier.clone(),
                symtab: None,
                members,
            },
        );
        let _ = (access, storage);
        if self.is_function_enclosed() {
            self.local_store_declaration(identifier, access, storage, node, tok)
        } else {
            node
        }
    }

    /// Folds a leading unary `+`/`-` directly into a literal, and has the first assigned literal fix the
    /// enum's element type for the rest of the declaration.
    fn fold_enum_literal(
        &mut self,
        value: NodeId,
        fixed_kind: &mut Option<std::mem::Discriminant<LiteralValue>>,
        autoint: &mut i64,
    ) -> NodeId {
        let folded = match &self.ast.get(value).kind {
            NodeKind::Unary { op, expr } => {
                let op = *op;
                let expr = *expr;
                match &self.ast.get(expr).kind {
                    NodeKind::Literal {
                        value: LiteralValue::Int(n),
                    } if matches!(op, Operator::Plus | Operator::Minus) => {
                        let n = if op == Operator::Minus { -n } else { *n };
                        Some(
                            self.alloc(
                                self.ast.get(value).meta.token.clone(),
                                NodeKind::Literal {
                                    value: LiteralValue::Int(n),
                                },
                            ),
                        )
                    }
                    NodeKind::Literal {
                        value: LiteralValue::Double(d),
                    } if matches!(op, Operator::Plus | Operator::Minus) => {
                        let d = if op == Operator::Minus { -d } else { *d };
                        Some(
                            self.alloc(
                                self.ast.get(value).meta.token.clone(),
                                NodeKind::Literal {
                                    value: LiteralValue::Double(d),
                                },
                            ),
                        )
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        let value = folded.unwrap_or(value);

        let tok = self.ast.get(value).meta.token.clone();
        match &self.ast.get(value).kind {
            NodeKind::Literal { value: lit } => {
                let discr = std::mem::discriminant(lit);
                if let Some(first) = fixed_kind {
                    if *first != discr {
                        self.error_at(&tok, "Literal value of the enum's established type expected here.");
                    }
                } else {
                    *fixed_kind = Some(discr);
                }
                if let LiteralValue::Int(n) = lit {
                    *autoint = n + 1;
                }
            }
            _ => {
                self.error_at(&tok, "Literal value expected here.");
            }
        }
        value
    }

    fn parse_module_declaration(&mut self, access: Access, storage: Storage) -> NodeId {
        let tok = self.advance(); // 'module'
        let Some((identifier, _)) = self.expect_identifier() else {
            return self.alloc(tok, NodeKind::Empty);
        };
        let has_braces = self.optional_op(Operator::LBrace);

        let placeholder = self.reserve(tok.clone());
        self.enclosing_decl_node.push(placeholder);
        let mut decls = Vec::new();
        while self.is_declaration_start(&self.peek().kind) {
            if let Some(decl) = self.parse_declaration_statement() {
                decls.push(decl);
            }
        }
        self.enclosing_decl_node.pop();

        if has_braces {
            self.expect_op(Operator::RBrace);
        }
        self.optional_semicolon();

        self.fill_node(
            placeholder,
            NodeKind::Module {
                identifier,
                decls,
                symtab: None,
            },
        );
        let _ = (access, storage);
        placeholder
    }

    /// `event` declarations parse cleanly (so the rest of the file never desyncs) but
    /// are always rejected with a semantic error rather than silently accepted or
    /// treated as unimplemented.
    fn parse_event_declaration(&mut self, access: Access, storage: Storage) -> NodeId {
        let tok = self.advance(); // 'event'
        let Some((identifier, _)) = self.expect_identifier() else {
            return self.alloc(tok, NodeKind::Empty);
        };
        self.expect_op(Operator::LParen);
        let params = if !matches!(self.peek().kind, TokenKind::Op(Operator::RParen)) {
            self.parse_optional_parameter_declaration().0
        } else {
            Vec::new()
        };
        self.expect_op(Operator::RParen);
        self.optional_semicolon();
        self.semantic_error_at(&tok, "'event' declarations are not supported.");
        self.alloc(
            tok,
            NodeKind::Function {
                access,
                storage,
                identifier,
                params,
                block: None,
                symtab: None,
                nlocals: 0,
                nparams: 0,
                has_defaults: false,
                upvalues: Vec::new(),
                is_closure: false,
                useargs: false,
            },
        )
    }

    fn parse_id(&mut self) -> Option<NodeId> {
        let (name1, tok) = self.expect_identifier()?;
        let secondary = if self.optional_op(Operator::Dot) {
            self.expect_identifier().map(|(n, _)| n)
        } else {
            None
        };
        Some(self.alloc(
            tok,
            NodeKind::Identifier {
                name: name1,
                secondary,
                symbol: None,
                location: None,
                upvalue: None,
            },
        ))
    }

    fn parse_protocols(&mut self) -> Vec<String> {
        let mut list = Vec::new();
        if matches!(self.peek().kind, TokenKind::Op(Operator::Gt)) {
            return list;
        }
        loop {
            let Some((name, _)) = self.expect_identifier() else {
                break;
            };
            let mut full = name;
            if self.optional_op(Operator::Dot) {
                if let Some((n2, _)) = self.expect_identifier() {
                    full = format!("{full}.{n2}");
                }
            }
            list.push(full);
            if !self.optional_op(Operator::Comma) {
                break;
            }
        }
        list
    }

    fn parse_class_declaration(&mut self, access: Access, storage: Storage) -> Option<NodeId> {
        let type_tok = self.advance(); // 'class' | 'struct'
        let is_struct = type_tok.kind == TokenKind::Keyword(Keyword::Struct);
        let Some((identifier, _)) = self.expect_identifier() else {
            return Some(self.alloc(type_tok, NodeKind::Empty));
        };

        let superclass = if self.optional_op(Operator::Colon) {
            self.parse_id()
        } else {
            None
        };

        let protocols = if self.optional_op(Operator::Lt) {
            let list = self.parse_protocols();
            self.expect_op(Operator::Gt);
            list
        } else {
            Vec::new()
        };

        self.expect_op(Operator::LBrace);

        let placeholder = self.reserve(type_tok.clone());
        self.enclosing_decl_node.push(placeholder);

        let mut decls = Vec::new();
        if self.is_class_enclosed() {
            let outer_var = self.alloc(
                type_tok.clone(),
                NodeKind::Variable {
                    identifier: OUTER_IVAR_NAME.to_string(),
                    type_annotation: None,
                    init: VarInit::None,
                    parent_decl: None,
                    is_computed: false,
                    is_upvalue: false,
                    slot_index: 0,
                },
            );
            decls.push(self.alloc(
                type_tok.clone(),
                NodeKind::VariableDecl {
                    is_const: false,
                    access: Access::Private,
                    storage: Storage::Default,
                    vars: vec![outer_var],
                },
            ));
        }

        self.decl_stack.push(DeclKind::Class(identifier.clone()));
        while self.is_declaration_start(&self.peek().kind) {
            if let Some(decl) = self.parse_declaration_statement() {
                decls.push(decl);
            }
        }
        self.decl_stack.pop();
        self.enclosing_decl_node.pop();

        self.expect_op(Operator::RBrace);
        self.optional_semicolon();

        self.fill_node(
            placeholder,
            NodeKind::Class {
                access,
                storage,
                identifier: identifier.clone(),
                superclass,
                is_struct,
                is_extern_superclass: false,
                decls,
                symtab: None,
                ivar_count: 0,
                static_ivar_count: 0,
                runtime_class: None,
                protocols,
            },
        );

        if self.is_function_enclosed() {
            Some(self.local_store_declaration(identifier, access, storage, placeholder, type_tok))
        } else {
            Some(placeholder)
        }
    }

    // ----------------------------------------------------------------- expressions --

    fn parse_expression(&mut self) -> NodeId {
        let tok1 = self.peek();
        let expr = self.parse_precedence(0);
        match expr {
            Some(id) => id,
            None => {
                let tok2 = self.peek();
                if tok1.offset == tok2.offset && tok1.file_id == tok2.file_id {
                    self.advance();
                }
                self.alloc(tok1, NodeKind::Empty)
            }
        }
    }

    fn parse_precedence(&mut self, limit: i32) -> Option<NodeId> {
        let mut left = self.parse_prefix()?;

        loop {
            let peek = self.peek();
            if matches!(
                peek.kind,
                TokenKind::Op(Operator::LParen)
                    | TokenKind::Op(Operator::LBracket)
                    | TokenKind::Op(Operator::Dot)
            ) {
                left = self.parse_postfix_chain(left);
                continue;
            }

            let op = match &peek.kind {
                TokenKind::Op(o) if o.is_binary() => *o,
                TokenKind::Keyword(Keyword::Is) => Operator::Is,
                TokenKind::Op(Operator::Question) => Operator::Question,
                _ => break,
            };

            if op == Operator::Question {
                if limit >= PREC_TERNARY {
                    break;
                }
                self.advance();
                left = self.parse_ternary(left, peek);
                continue;
            }

            let prec = binary_precedence(op);
            if prec == 0 || prec <= limit {
                break;
            }

            self.advance();
            if prec == PREC_ASSIGN {
                left = self.parse_assignment(left, op, peek);
                continue;
            }

            let right_assoc = matches!(op, Operator::And | Operator::Or);
            let next_limit = if right_assoc { prec - 1 } else { prec };
            let Some(right) = self.parse_precedence(next_limit) else {
                break;
            };
            left = self.alloc(peek, NodeKind::Binary { op, left, right });
        }

        Some(left)
    }

    fn parse_assignment(&mut self, lhs: NodeId, op: Operator, tok: Token) -> NodeId {
        self.ast.get_mut(lhs).meta.is_assignment_lvalue = true;
        let rhs = self
            .parse_precedence(PREC_ASSIGN - 1)
            .unwrap_or_else(|| self.alloc(tok.clone(), NodeKind::Empty));
        match op.compound_base() {
            Some(base) => {
                let lhs_dup = self.ast.duplicate_lvalue(lhs);
                self.ast.get_mut(lhs_dup).meta.is_assignment_lvalue = false;
                let inner = self.alloc(
                    tok.clone(),
                    NodeKind::Binary {
                        op: base,
                        left: lhs_dup,
                        right: rhs,
                    },
                );
                self.alloc(
                    tok,
                    NodeKind::Binary {
                        op: Operator::Assign,
                        left: lhs,
                        right: inner,
                    },
                )
            }
            None => self.alloc(
                tok,
                NodeKind::Binary {
                    op: Operator::Assign,
                    left: lhs,
                    right: rhs,
                },
            ),
        }
    }

    fn parse_ternary(&mut self, cond: NodeId, tok: Token) -> NodeId {
        let then_branch = self.parse_expression();
        self.expect_op(Operator::Colon);
        let else_branch = self
            .parse_precedence(PREC_TERNARY - 1)
            .unwrap_or_else(|| self.alloc(tok.clone(), NodeKind::Empty));
        self.alloc(
            tok,
            NodeKind::Flow {
                flow_kind: FlowKind::Ternary,
                cond,
                then_branch,
                else_branch: Some(else_branch),
            },
        )
    }

    fn parse_prefix(&mut self) -> Option<NodeId> {
        let tok = self.peek();
        match &tok.kind {
            TokenKind::Op(Operator::Bang)
            | TokenKind::Op(Operator::Minus)
            | TokenKind::Op(Operator::Plus)
            | TokenKind::Op(Operator::Tilde) => {
                self.advance();
                let op = match tok.kind {
                    TokenKind::Op(o) => o,
                    _ => unreachable!(),
                };
                let expr = self
                    .parse_precedence(PREC_UNARY)
                    .unwrap_or_else(|| self.alloc(tok.clone(), NodeKind::Empty));
                let node = self.alloc(tok, NodeKind::Unary { op, expr });
                Some(self.parse_postfix_chain(node))
            }
            TokenKind::Op(Operator::LParen) => {
                self.advance();
                let expr = self.parse_expression();
                self.expect_op(Operator::RParen);
                Some(self.parse_postfix_chain(expr))
            }
            TokenKind::Op(Operator::LBracket) => {
                let node = self.parse_list_expression();
                Some(self.parse_postfix_chain(node))
            }
            TokenKind::Op(Operator::LBrace) | TokenKind::Keyword(Keyword::Func) => {
                let (node, _) = self.parse_function(false, Access::Default, Storage::Default);
                node.map(|n| self.parse_postfix_chain(n))
            }
            TokenKind::Identifier => {
                self.advance();
                let name = self.text(&tok);
                let node = self.alloc(
                    tok,
                    NodeKind::Identifier {
                        name,
                        secondary: None,
                        symbol: None,
                        location: None,
                        upvalue: None,
                    },
                );
                Some(self.parse_postfix_chain(node))
            }
            TokenKind::String => {
                self.advance();
                let node = self.parse_string_literal(tok);
                Some(self.parse_postfix_chain(node))
            }
            TokenKind::Number => {
                self.advance();
                let node = self.parse_number_literal(tok);
                Some(self.parse_postfix_chain(node))
            }
            TokenKind::Keyword(Keyword::True) | TokenKind::Keyword(Keyword::False) => {
                self.advance();
                let node = self.alloc(
                    tok.clone(),
                    NodeKind::Literal {
                        value: LiteralValue::Bool(tok.kind == TokenKind::Keyword(Keyword::True)),
                    },
                );
                Some(self.parse_postfix_chain(node))
            }
            TokenKind::Keyword(Keyword::Undefined)
            | TokenKind::Keyword(Keyword::Args)
            | TokenKind::Keyword(Keyword::Func_)
            | TokenKind::Keyword(Keyword::Super)
            | TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                let keyword = match tok.kind {
                    TokenKind::Keyword(k) => k,
                    _ => unreachable!(),
                };
                let node = self.alloc(tok, NodeKind::KeywordExpr { keyword });
                Some(self.parse_postfix_chain(node))
            }
            TokenKind::Keyword(Keyword::File) => {
                let node = self.parse_file_expression();
                node.map(|n| self.parse_postfix_chain(n))
            }
            _ => {
                self.error_at(&tok, format!("Expected expression but found {:?}.", tok.kind));
                None
            }
        }
    }

    fn parse_file_expression(&mut self) -> Option<NodeId> {
        let tok = self.advance(); // 'file'
        if !matches!(self.peek().kind, TokenKind::Op(Operator::Dot)) {
            self.error_at(&tok, "A .identifier list is expected here.");
            return None;
        }
        let mut parts = Vec::new();
        while self.optional_op(Operator::Dot) {
            let Some((name, _)) = self.expect_identifier() else {
                return None;
            };
            parts.push(name);
        }
        Some(self.alloc(tok, NodeKind::FileRef { parts }))
    }

    fn parse_number_literal(&mut self, tok: Token) -> NodeId {
        match tok.builtin {
            Some(crate::token::Builtin::Line) => {
                return self.alloc(
                    tok.clone(),
                    NodeKind::Literal {
                        value: LiteralValue::Int(tok.line as i64),
                    },
                );
            }
            Some(crate::token::Builtin::Column) => {
                return self.alloc(
                    tok.clone(),
                    NodeKind::Literal {
                        value: LiteralValue::Int(tok.column as i64),
                    },
                );
            }
            _ => {}
        }
        let text = self.text(&tok);
        let value = if let Some(rest) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            LiteralValue::Int(i64::from_str_radix(rest, 16).unwrap_or(0))
        } else if let Some(rest) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
            LiteralValue::Int(i64::from_str_radix(rest, 2).unwrap_or(0))
        } else if let Some(rest) = text.strip_prefix("0o").or_else(|| text.strip_prefix("0O")) {
            LiteralValue::Int(i64::from_str_radix(rest, 8).unwrap_or(0))
        } else if text.contains('.') || text.contains('e') || text.contains('E') {
            LiteralValue::Double(text.parse().unwrap_or(0.0))
        } else {
            LiteralValue::Int(text.parse().unwrap_or(0))
        };
        self.alloc(tok, NodeKind::Literal { value })
    }

    fn parse_string_literal(&mut self, tok: Token) -> NodeId {
        match tok.builtin {
            Some(crate::token::Builtin::File) => {
                return self.alloc(
                    tok.clone(),
                    NodeKind::Literal {
                        value: LiteralValue::String(format!("<file#{}>", tok.file_id)),
                    },
                );
            }
            Some(crate::token::Builtin::Class) => {
                let name = self.enclosing_name(false).unwrap_or("").to_string();
                return self.alloc(tok.clone(), NodeKind::Literal { value: LiteralValue::String(name) });
            }
            Some(crate::token::Builtin::Function) => {
                let name = self.enclosing_name(true).unwrap_or("").to_string();
                return self.alloc(tok.clone(), NodeKind::Literal { value: LiteralValue::String(name) });
            }
            _ => {}
        }
        let raw = self.text(&tok);
        let inner = &raw[1..raw.len().saturating_sub(1)];
        match split_interpolation(inner) {
            Some(parts) => {
                let mut nodes = Vec::new();
                for part in parts {
                    match part {
                        StrPart::Text(s) => {
                            nodes.push(self.alloc(
                                tok.clone(),
                                NodeKind::Literal {
                                    value: LiteralValue::String(unescape_string(&s)),
                                },
                            ));
                        }
                        StrPart::Expr(src) => {
                            let saved = std::mem::replace(
                                &mut self.lexer,
                                LexerStack::new(Lexer::new(src, tok.file_id)),
                            );
                            let saved_queue = std::mem::take(&mut self.queue);
                            let expr = self.parse_expression();
                            self.lexer = saved;
                            self.queue = saved_queue;
                            nodes.push(expr);
                        }
                    }
                }
                self.alloc(
                    tok,
                    NodeKind::Literal {
                        value: LiteralValue::InterpolatedList(nodes),
                    },
                )
            }
            None => self.alloc(
                tok,
                NodeKind::Literal {
                    value: LiteralValue::String(unescape_string(inner)),
                },
            ),
        }
    }

    fn parse_list_expression(&mut self) -> NodeId {
        self.expect_op(Operator::LBracket);
        let tok = self.peek();

        if self.optional_op(Operator::RBracket) {
            return self.alloc(
                tok,
                NodeKind::ListExpr {
                    is_map: false,
                    keys: Vec::new(),
                    values: Vec::new(),
                },
            );
        }
        if self.optional_op(Operator::Colon) {
            self.expect_op(Operator::RBracket);
            return self.alloc(
                tok,
                NodeKind::ListExpr {
                    is_map: true,
                    keys: Vec::new(),
                    values: Vec::new(),
                },
            );
        }

        let first = self.parse_expression();
        let is_map = matches!(self.peek().kind, TokenKind::Op(Operator::Colon));

        let mut keys = Vec::new();
        let mut values = Vec::new();
        if is_map {
            keys.push(first);
            self.expect_op(Operator::Colon);
            values.push(self.parse_expression());
        } else {
            values.push(first);
        }

        while self.optional_op(Operator::Comma) {
            let expr = self.parse_expression();
            if is_map {
                keys.push(expr);
                self.expect_op(Operator::Colon);
                values.push(self.parse_expression());
            } else {
                values.push(expr);
            }
        }

        self.expect_op(Operator::RBracket);
        self.alloc(
            tok,
            NodeKind::ListExpr {
                is_map,
                keys,
                values,
            },
        )
    }

    /// Consumes every consecutive `(...)`/`[...]`/`.name` suffix into a single flattened
    /// `Postfix` node. A `,,`-separated call argument is
    /// treated as an implicit `undefined`.
    fn parse_postfix_chain(&mut self, base: NodeId) -> NodeId {
        let mut subops = Vec::new();
        loop {
            let tok = self.peek();
            match tok.kind {
                TokenKind::Op(Operator::LBracket) => {
                    self.advance();
                    let index = self.parse_expression();
                    let sub_tok = self.peek();
                    self.expect_op(Operator::RBracket);
                    subops.push(self.alloc(
                        sub_tok,
                        NodeKind::PostfixSubOp {
                            kind: SubOpKind::Subscript(index),
                        },
                    ));
                }
                TokenKind::Op(Operator::LParen) => {
                    self.advance();
                    let args = self.parse_call_arguments();
                    let sub_tok = self.peek();
                    self.expect_op(Operator::RParen);
                    subops.push(self.alloc(
                        sub_tok,
                        NodeKind::PostfixSubOp {
                            kind: SubOpKind::Call(args),
                        },
                    ));
                }
                TokenKind::Op(Operator::Dot) => {
                    self.advance();
                    let name = self.parse_member_name();
                    let sub_tok = self.peek();
                    subops.push(self.alloc(
                        sub_tok,
                        NodeKind::PostfixSubOp {
                            kind: SubOpKind::Access(name),
                        },
                    ));
                }
                _ => break,
            }
        }
        if subops.is_empty() {
            base
        } else {
            let tok = self.ast.get(base).meta.token.clone();
            self.alloc(tok, NodeKind::Postfix { base, subops })
        }
    }

    /// `.repeat`, `.is`, etc: keywords are valid member names here.
    fn parse_member_name(&mut self) -> String {
        let tok = self.peek();
        match &tok.kind {
            TokenKind::Identifier => {
                self.advance();
                self.text(&tok)
            }
            TokenKind::Keyword(kw) => {
                self.advance();
                kw.text().to_string()
            }
            _ => {
                self.error_at(&tok, format!("Expected identifier but found {:?}.", tok.kind));
                String::new()
            }
        }
    }

    fn parse_call_arguments(&mut self) -> Vec<NodeId> {
        let mut args = Vec::new();
        if matches!(self.peek().kind, TokenKind::Op(Operator::RParen)) {
            return args;
        }
        let mut arg_expected = true;
        loop {
            let peek = self.peek();
            if matches!(peek.kind, TokenKind::Op(Operator::Comma)) {
                args.push(self.alloc(peek.clone(), NodeKind::KeywordExpr { keyword: Keyword::Undefined }));
                self.advance();
                arg_expected = true;
                if matches!(self.peek().kind, TokenKind::Op(Operator::RParen)) {
                    args.push(self.alloc(peek, NodeKind::KeywordExpr { keyword: Keyword::Undefined }));
                }
                continue;
            }
            if peek.kind.is_eof() || matches!(peek.kind, TokenKind::Op(Operator::RParen)) {
                break;
            }
            if !arg_expected {
                self.error_at(&peek, "Missing ',' in function call.");
                break;
            }
            args.push(self.parse_expression());
            arg_expected = false;
            if !matches!(self.peek().kind, TokenKind::Op(Operator::Comma)) {
                break;
            }
        }
        args
    }
}

enum StrPart {
    Text(String),
    Expr(String),
}

/// Splits a raw (still-escaped) string body on `\( ... )` interpolation markers. Nesting
/// is tracked by parenthesis depth only; a quote inside an interpolated expression is not
/// specially handled, matching the scope of a single-pass splitter.
fn split_interpolation(body: &str) -> Option<Vec<StrPart>> {
    if !body.contains("\\(") {
        return None;
    }
    let mut parts = Vec::new();
    let mut text = String::new();
    let chars: Vec<char> = body.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && chars.get(i + 1) == Some(&'(') {
            if !text.is_empty() {
                parts.push(StrPart::Text(std::mem::take(&mut text)));
            }
            i += 2;
            let mut depth = 1;
            let mut expr = String::new();
            while i < chars.len() && depth > 0 {
                match chars[i] {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            i += 1;
                            break;
                        }
                    }
                    _ => {}
                }
                if depth > 0 {
                    expr.push(chars[i]);
                }
                i += 1;
            }
            parts.push(StrPart::Expr(expr));
            continue;
        }
        text.push(chars[i]);
        i += 1;
    }
    if !text.is_empty() {
        parts.push(StrPart::Text(text));
    }
    Some(parts)
}

/// Resolves the lexer's raw `\n`/`\t`/`\\`/`\"`/`\'` escapes.
fn unescape_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LocationKind;

    fn parse_ok(src: &str) -> (Ast, Vec<NodeId>) {
        let mut delegate = Delegate::default();
        let out = parse(src, 0, &mut delegate);
        assert!(out.errors.is_empty(), "unexpected errors: {:?}", out.errors);
        (out.ast, out.root)
    }

    #[test]
    fn parses_arithmetic_precedence() {
        let (ast, root) = parse_ok("var x = 1 + 2 * 3;");
        assert_eq!(root.len(), 1);
        let NodeKind::VariableDecl { vars, .. } = &ast.get(root[0]).kind else {
            panic!("expected variable decl")
        };
        let NodeKind::Variable { init, .. } = &ast.get(vars[0]).kind else {
            panic!("expected variable")
        };
        let VarInit::Expr(expr) = init else { panic!("expected init expr") };
        let NodeKind::Binary { op, right, .. } = &ast.get(*expr).kind else {
            panic!("expected top-level binary (+ wins over * due to left precedence climb)")
        };
        assert_eq!(*op, Operator::Plus);
        assert!(matches!(ast.get(*right).kind, NodeKind::Binary { op: Operator::Star, .. }));
    }

    #[test]
    fn compound_assignment_is_rewritten() {
        let (ast, root) = parse_ok("a += 1;");
        assert_eq!(root.len(), 1);
        let NodeKind::Binary { op: Operator::Assign, left, right } = &ast.get(root[0]).kind else {
            panic!("expected rewritten assignment")
        };
        assert!(matches!(ast.get(*left).kind, NodeKind::Identifier { .. }));
        let NodeKind::Binary { op: Operator::Plus, left: inner_left, .. } = &ast.get(*right).kind else {
            panic!("expected inner + node")
        };
        assert_ne!(inner_left, left);
    }

    #[test]
    fn logical_and_or_right_associative() {
        let (ast, root) = parse_ok("a && b && c;");
        let NodeKind::Binary { op: Operator::And, right, .. } = &ast.get(root[0]).kind else {
            panic!("expected &&")
        };
        assert!(matches!(ast.get(*right).kind, NodeKind::Binary { op: Operator::And, .. }));
    }

    #[test]
    fn ternary_parses() {
        let (ast, root) = parse_ok("a ? b : c;");
        assert!(matches!(
            ast.get(root[0]).kind,
            NodeKind::Flow {
                flow_kind: FlowKind::Ternary,
                ..
            }
        ));
    }

    #[test]
    fn postfix_chain_is_flattened() {
        let (ast, root) = parse_ok("a.b(1)[2];");
        let NodeKind::Postfix { subops, .. } = &ast.get(root[0]).kind else {
            panic!("expected postfix chain")
        };
        assert_eq!(subops.len(), 3);
    }

    #[test]
    fn function_always_has_implicit_self() {
        let (ast, root) = parse_ok("func f(x) { return x; }");
        let NodeKind::Function { params, .. } = &ast.get(root[0]).kind else {
            panic!("expected function decl")
        };
        let NodeKind::Variable { identifier, .. } = &ast.get(params[0]).kind else {
            panic!("expected first param")
        };
        assert_eq!(identifier, "self");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn parameter_default_values_are_literals() {
        let (ast, root) = parse_ok("func greet(name, excited = true, times = -2) { return name; }");
        let NodeKind::Function { params, has_defaults, .. } = &ast.get(root[0]).kind else {
            panic!("expected function decl")
        };
        assert!(*has_defaults);
        assert_eq!(params.len(), 4); // self, name, excited, times
        let NodeKind::Variable { init, .. } = &ast.get(params[2]).kind else {
            panic!("expected excited param")
        };
        assert!(matches!(init, VarInit::Expr(_)));
        let NodeKind::Variable { init, .. } = &ast.get(params[3]).kind else {
            panic!("expected times param")
        };
        let VarInit::Expr(default) = init else { panic!("expected default expr") };
        assert!(matches!(
            ast.get(*default).kind,
            NodeKind::Literal { value: LiteralValue::Int(-2) }
        ));
    }

    #[test]
    fn non_literal_parameter_default_is_rejected() {
        let mut delegate = Delegate::default();
        let out = parse("func f(x = y) { }", 0, &mut delegate);
        assert!(!out.errors.is_empty());
    }

    #[test]
    fn nested_function_is_lowered_to_local_var() {
        let (ast, root) = parse_ok("func outer() { func inner() { return 1; } }");
        let NodeKind::Function { block, .. } = &ast.get(root[0]).kind else {
            panic!("expected outer function")
        };
        let NodeKind::Compound { stmts, .. } = &ast.get(block.unwrap()).kind else {
            panic!("expected compound block")
        };
        assert!(matches!(ast.get(stmts[0]).kind, NodeKind::VariableDecl { .. }));
    }

    #[test]
    fn nested_class_gets_hidden_outer_ivar() {
        let (ast, root) = parse_ok("class Outer { class Inner {} }");
        let NodeKind::Class { decls, .. } = &ast.get(root[0]).kind else {
            panic!("expected outer class")
        };
        let NodeKind::Class { decls: inner_decls, .. } = &ast.get(decls[0]).kind else {
            panic!("expected inner class")
        };
        let NodeKind::VariableDecl { vars, access, .. } = &ast.get(inner_decls[0]).kind else {
            panic!("expected hidden outer ivar decl")
        };
        assert_eq!(*access, Access::Private);
        assert!(matches!(&ast.get(vars[0]).kind, NodeKind::Variable { identifier, .. } if identifier == "outer"));
    }

    #[test]
    fn enum_auto_increments_and_fixes_type() {
        let (ast, root) = parse_ok("enum Color { red, green = 10, blue }");
        let NodeKind::Enum { members, .. } = &ast.get(root[0]).kind else {
            panic!("expected enum")
        };
        assert_eq!(members.len(), 3);
        let value_of = |ast: &Ast, id: NodeId| match &ast.get(id).kind {
            NodeKind::Literal { value: LiteralValue::Int(n) } => *n,
            _ => panic!("expected int literal"),
        };
        assert_eq!(value_of(&ast, members[0].1), 0);
        assert_eq!(value_of(&ast, members[1].1), 10);
        assert_eq!(value_of(&ast, members[2].1), 11);
    }

    #[test]
    fn enum_rejects_duplicate_identifiers() {
        let mut delegate = Delegate::default();
        let out = parse("enum E { a, a }", 0, &mut delegate);
        assert!(!out.errors.is_empty());
    }

    #[test]
    fn empty_enum_is_rejected() {
        let mut delegate = Delegate::default();
        let out = parse("enum E {}", 0, &mut delegate);
        assert!(!out.errors.is_empty());
    }

    #[test]
    fn import_and_special_statements_produce_no_node() {
        let (_, root) = parse_ok("import foo; @bogus bar;");
        assert!(root.is_empty());
    }

    #[test]
    fn unittest_macro_invokes_delegate_and_produces_no_node() {
        let mut delegate = Delegate::default();
        let calls = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let calls2 = calls.clone();
        delegate.unittest = Some(Box::new(move |expectation| calls2.borrow_mut().push(expectation)));
        let out = parse(r#"#unittest { name: "case 1"; result: 42; }"#, 0, &mut delegate);
        assert!(out.errors.is_empty());
        assert!(out.root.is_empty());
        assert_eq!(calls.borrow().len(), 1);
        assert_eq!(calls.borrow()[0].name, "case 1");
    }

    #[test]
    fn include_macro_pushes_included_source() {
        let mut delegate = Delegate::default();
        delegate.load_file = Box::new(|_path| Ok(("var included = 1;".to_string(), 7)));
        let out = parse(r#"#include "other.lm"; var main_var = 2;"#, 0, &mut delegate);
        assert!(out.errors.is_empty());
        assert_eq!(out.root.len(), 2);
    }

    #[test]
    fn string_interpolation_splits_into_parts() {
        let (ast, root) = parse_ok(r#"var s = "a \(1 + 1) b";"#);
        let NodeKind::VariableDecl { vars, .. } = &ast.get(root[0]).kind else {
            panic!("expected var decl")
        };
        let NodeKind::Variable { init, .. } = &ast.get(vars[0]).kind else {
            panic!("expected variable")
        };
        let VarInit::Expr(expr) = init else { panic!("expected expr init") };
        let NodeKind::Literal {
            value: LiteralValue::InterpolatedList(parts),
        } = &ast.get(*expr).kind
        else {
            panic!("expected interpolated list literal")
        };
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn for_loop_accepts_variable_declaration_condition() {
        let (ast, root) = parse_ok("for (var i in 0..<3) { }");
        let NodeKind::Loop { loop_kind: LoopKind::For, cond, .. } = &ast.get(root[0]).kind else {
            panic!("expected for loop")
        };
        assert!(matches!(ast.get(cond.unwrap()).kind, NodeKind::VariableDecl { .. }));
    }

    #[test]
    fn break_outside_loop_still_parses_successfully() {
        // scope/placement validity is a semantic-pass concern, not a parser one.
        let (ast, root) = parse_ok("break;");
        assert!(matches!(
            ast.get(root[0]).kind,
            NodeKind::Jump {
                jump_kind: JumpKind::Break,
                ..
            }
        ));
    }

    #[test]
    fn computed_property_parses_getter_and_setter() {
        let (ast, root) = parse_ok("var x { get { return 1; } set(v) { } }");
        let NodeKind::VariableDecl { vars, .. } = &ast.get(root[0]).kind else {
            panic!("expected var decl")
        };
        let NodeKind::Variable { init, .. } = &ast.get(vars[0]).kind else {
            panic!("expected variable")
        };
        let VarInit::Accessor { getter, setter } = init else {
            panic!("expected accessor init")
        };
        assert!(setter.is_some());
        let NodeKind::Function { params, .. } = &ast.get(*getter).kind else {
            panic!("expected getter function")
        };
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn event_declaration_reports_semantic_style_error_but_still_parses() {
        let mut delegate = Delegate::default();
        let out = parse("event Clicked();", 0, &mut delegate);
        assert!(!out.errors.is_empty());
        assert_eq!(out.root.len(), 1);
    }

    #[test]
    fn builtin_identifiers_resolve_against_enclosing_names() {
        let (ast, root) = parse_ok("class Greeter { func hello() { return __CLASS__; } }");
        let NodeKind::Class { decls, .. } = &ast.get(root[0]).kind else {
            panic!("expected class")
        };
        let NodeKind::Function { block, .. } = &ast.get(decls[0]).kind else {
            panic!("expected method")
        };
        let NodeKind::Compound { stmts, .. } = &ast.get(block.unwrap()).kind else {
            panic!("expected block")
        };
        let NodeKind::Jump { expr, .. } = &ast.get(stmts[0]).kind else {
            panic!("expected return statement")
        };
        let NodeKind::Literal {
            value: LiteralValue::String(name),
        } = &ast.get(expr.unwrap()).kind
        else {
            panic!("expected resolved __CLASS__ literal")
        };
        assert_eq!(name, "Greeter");
    }

    #[test]
    fn location_kind_is_untouched_by_parser() {
        let (ast, root) = parse_ok("var x = y;");
        let NodeKind::VariableDecl { vars, .. } = &ast.get(root[0]).kind else {
            panic!("expected var decl")
        };
        let NodeKind::Variable { init, .. } = &ast.get(vars[0]).kind else {
            panic!("expected variable")
        };
        let VarInit::Expr(expr) = init else { panic!("expected init") };
        let NodeKind::Identifier { location, .. } = &ast.get(*expr).kind else {
            panic!("expected identifier")
        };
        assert!(location.is_none());
        let _ = LocationKind::Local;
    }
}
