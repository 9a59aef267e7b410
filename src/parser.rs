//! Parser state: the lexer, current function, the three auxiliary
//! stacks (flags/exits/conds), the shared operator stack, and the
//! top-level driver (`compile_next_unit`, `reset`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bytecode::{Function, Op, Program, ProgramSnapshot, MAIN};
use crate::diagnostics::{CompileError, Control, ParseError, PResult, Position, PosixWarning};
use crate::lexer::{Lexed, Lexer};
use crate::token::{Token, TokenKind};

pub mod flags {
    pub const FUNC: u8 = 1 << 0;
    pub const FUNC_INNER: u8 = 1 << 1;
    pub const BODY: u8 = 1 << 2;
    pub const LOOP: u8 = 1 << 3;
    pub const LOOP_INNER: u8 = 1 << 4;
    pub const IF: u8 = 1 << 5;
    pub const ELSE: u8 = 1 << 6;
    pub const IF_END: u8 = 1 << 7;
}

/// A pending forward jump: the label to patch, and whether it marks a
/// loop's exit (relevant to `break`, which must skip past `if`/`else`
/// exits to find the nearest *loop* exit).
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExitEntry {
    pub label: usize,
    pub is_loop_exit: bool,
}

/// Compile-time configuration. No file-format config is in scope here
/// (no CLI, no REPL) — just the POSIX-strictness gate threaded through
/// every lex/parse call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    pub posix_strict: bool,
}

/// Outcome of compiling one executable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileUnit {
    /// A statement was compiled into MAIN.
    MainBytecode,
    /// A `define` was compiled into a new function, at this index.
    FunctionDefined(usize),
    /// No more input.
    Eof,
    /// `quit` was seen: the whole compile should stop now.
    Quit,
    /// `limits` was seen: the engine should report its numeric limits.
    Limits,
}

pub struct Parser {
    lexer: Lexer,
    pub prog: Program,
    cur_fn: usize,
    cur: Token,
    last_kind: TokenKind,
    pub(crate) ops: Vec<TokenKind>,
    flags: Vec<u8>,
    exits: Vec<ExitEntry>,
    conds: Vec<usize>,
    nbraces: u32,
    pub(crate) auto_part: bool,
    options: ParseOptions,
    pub warnings: Vec<PosixWarning>,
    cancel: Option<Arc<AtomicBool>>,
    peeked: Option<Lexed>,
}

impl Parser {
    pub fn new(source: impl Into<String>, file: impl Into<String>, options: ParseOptions) -> PResult<Self> {
        Self::with_cancellation(source, file, options, None)
    }

    /// Construct with a cooperative cancellation flag owned by the
    /// embedding engine. `compile_next_unit` aborts the current unit as
    /// soon as the flag is observed set, with no locking on either side.
    pub fn with_cancellation(
        source: impl Into<String>,
        file: impl Into<String>,
        options: ParseOptions,
        cancel: Option<Arc<AtomicBool>>,
    ) -> PResult<Self> {
        let mut lexer = Lexer::new(source, file);
        let first = lexer.next().map_err(CompileError::from)?;
        let mut warnings = Vec::new();
        if let Some(w) = first.warning {
            Self::record_warning(&mut warnings, &options, w)?;
        }
        Ok(Parser {
            lexer,
            prog: Program::new(),
            cur_fn: MAIN,
            cur: first.token,
            last_kind: TokenKind::Eof,
            ops: Vec::new(),
            flags: vec![0],
            exits: Vec::new(),
            conds: Vec::new(),
            nbraces: 0,
            auto_part: false,
            options,
            warnings,
            cancel,
            peeked: None,
        })
    }

    fn record_warning(warnings: &mut Vec<PosixWarning>, options: &ParseOptions, w: PosixWarning) -> PResult<()> {
        log::warn!("{w}");
        if options.posix_strict {
            return Err(CompileError::Posix(w));
        }
        warnings.push(w);
        Ok(())
    }

    /// Record a POSIX-portability warning found during parsing itself
    /// (as opposed to one attached to a lexed token). Escalates to a
    /// hard error under strict mode, same as lexer-sourced warnings.
    pub(crate) fn warn(&mut self, w: PosixWarning) -> PResult<()> {
        Self::record_warning(&mut self.warnings, &self.options, w)
    }

    pub(crate) fn pos(&self) -> Position {
        self.cur.pos.clone()
    }

    pub(crate) fn cur(&self) -> &Token {
        &self.cur
    }

    pub(crate) fn last_kind(&self) -> TokenKind {
        self.last_kind
    }

    pub(crate) fn check_cancelled(&self) -> PResult<()> {
        if self.cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed)) {
            return Err(CompileError::Control(Control::Signal));
        }
        Ok(())
    }

    /// Pull the next token from the lexer into `cur`, recording the
    /// outgoing token as `last`. POSIX warnings attached to the new
    /// token are logged, collected, and (under strict mode) escalated.
    pub(crate) fn advance(&mut self) -> PResult<()> {
        self.check_cancelled()?;
        let lexed = match self.peeked.take() {
            Some(l) => l,
            None => self.lexer.next().map_err(CompileError::from)?,
        };
        if let Some(w) = lexed.warning {
            Self::record_warning(&mut self.warnings, &self.options, w)?;
        }
        self.last_kind = self.cur.kind;
        self.cur = lexed.token;
        Ok(())
    }

    /// Look at the token after `cur` without consuming it. Used for the
    /// handful of spots (`return()`) that need one token of lookahead
    /// past a token that isn't itself a statement terminator.
    pub(crate) fn peek(&mut self) -> PResult<TokenKind> {
        if self.peeked.is_none() {
            let lexed = self.lexer.next().map_err(CompileError::from)?;
            self.peeked = Some(lexed);
        }
        Ok(self.peeked.as_ref().unwrap().token.kind)
    }

    pub(crate) fn expect(&mut self, kind: TokenKind) -> PResult<()> {
        if self.cur.kind == kind {
            Ok(())
        } else {
            Err(CompileError::Parse(ParseError::BadToken(self.pos())))
        }
    }

    pub(crate) fn declare_local(&mut self, name: String, is_array: bool, pos: &Position) -> PResult<()> {
        self.cur_function().insert_local(name, is_array, pos).map_err(CompileError::Parse)
    }

    fn cur_function(&mut self) -> &mut Function {
        &mut self.prog.functions[self.cur_fn]
    }

    pub(crate) fn emit(&mut self, op: Op) {
        self.cur_function().push_op(op);
    }

    pub(crate) fn emit_index(&mut self, idx: usize) {
        self.cur_function().push_index(idx);
    }

    pub(crate) fn emit_name(&mut self, name: &str) {
        self.cur_function().push_name(name);
    }

    pub(crate) fn new_label(&mut self) -> usize {
        self.cur_function().new_label()
    }

    pub(crate) fn label_here(&mut self) -> usize {
        self.cur_function().label_here()
    }

    pub(crate) fn resolve_label(&mut self, idx: usize) {
        self.cur_function().resolve_label(idx);
    }

    pub(crate) fn cur_fn(&self) -> usize {
        self.cur_fn
    }

    // -- flags stack -------------------------------------------------

    fn top_flags(&self) -> u8 {
        *self.flags.last().expect("sentinel flags entry is never popped")
    }

    fn set_top_flags(&mut self, f: u8) {
        *self.flags.last_mut().expect("sentinel flags entry is never popped") = f;
    }

    pub(crate) fn push_flags(&mut self, extra: u8) {
        let inherited = self.top_flags() & (flags::FUNC | flags::LOOP);
        self.flags.push(inherited | extra | flags::BODY);
    }

    pub(crate) fn pop_flags(&mut self) -> u8 {
        assert!(self.flags.len() > 1, "flags sentinel must never be popped");
        self.flags.pop().unwrap()
    }

    pub(crate) fn is_if(&self) -> bool {
        self.top_flags() & flags::IF != 0
    }

    pub(crate) fn is_else(&self) -> bool {
        self.top_flags() & flags::ELSE != 0
    }

    pub(crate) fn is_if_end(&self) -> bool {
        self.top_flags() & flags::IF_END != 0
    }

    pub(crate) fn is_loop(&self) -> bool {
        self.top_flags() & flags::LOOP != 0
    }

    pub(crate) fn is_func_inner(&self) -> bool {
        self.top_flags() & flags::FUNC_INNER != 0
    }

    pub(crate) fn is_func(&self) -> bool {
        self.top_flags() & flags::FUNC != 0
    }

    pub(crate) fn is_body(&self) -> bool {
        self.top_flags() & flags::BODY != 0
    }

    pub(crate) fn clear_body_flag(&mut self) {
        let f = self.top_flags();
        self.set_top_flags(f & !flags::BODY);
    }

    pub(crate) fn set_if_end(&mut self) {
        let f = self.top_flags();
        self.set_top_flags(f | flags::IF_END);
    }

    pub(crate) fn clear_if_end(&mut self) {
        let f = self.top_flags();
        self.set_top_flags(f & !flags::IF_END);
    }

    /// A `define` is only legal when no body is pending — i.e. we're
    /// sitting at a top-level executable boundary.
    pub(crate) fn can_exec(&self) -> bool {
        self.flags.len() == 1
    }

    // -- exits / conds stacks -----------------------------------------

    pub(crate) fn push_exit(&mut self, label: usize, is_loop_exit: bool) {
        self.exits.push(ExitEntry { label, is_loop_exit });
    }

    pub(crate) fn pop_exit(&mut self) -> ExitEntry {
        self.exits.pop().expect("exits stack underflow: body end without matching body start")
    }

    pub(crate) fn push_cond(&mut self, label: usize) {
        self.conds.push(label);
    }

    pub(crate) fn pop_cond(&mut self) -> usize {
        self.conds.pop().expect("conds stack underflow")
    }

    pub(crate) fn top_cond(&self) -> Option<usize> {
        self.conds.last().copied()
    }

    /// `break` targets the nearest *loop* exit, scanning top-down past
    /// any intervening `if`/`else` exits. The original C parser scans
    /// with an unsigned index that wraps on underflow and happens to
    /// terminate the loop that way (see DESIGN.md); this walks a plain
    /// reverse range and uses an explicit found-flag instead.
    pub(crate) fn nearest_loop_exit(&self) -> Option<usize> {
        self.exits.iter().rev().find(|e| e.is_loop_exit).map(|e| e.label)
    }

    pub(crate) fn inc_braces(&mut self) {
        self.nbraces += 1;
    }

    pub(crate) fn dec_braces(&mut self) -> bool {
        if self.nbraces == 0 {
            false
        } else {
            self.nbraces -= 1;
            true
        }
    }

    pub(crate) fn braces(&self) -> u32 {
        self.nbraces
    }

    // -- functions ------------------------------------------------------

    pub(crate) fn select_function(&mut self, idx: usize) {
        self.cur_fn = idx;
    }

    // -- driver -----------------------------------------------------

    /// Compile the next executable unit: a top-level statement into
    /// MAIN, or a whole function definition. Mirrors `bc_parse_parse`.
    pub fn compile_next_unit(&mut self) -> PResult<CompileUnit> {
        self.check_cancelled()?;

        if self.cur.kind == TokenKind::Eof {
            return Ok(CompileUnit::Eof);
        }

        let result = if self.cur.kind == TokenKind::Define {
            if !self.can_exec() {
                Err(CompileError::Parse(ParseError::BadToken(self.pos())))
            } else {
                self.parse_func().map(|idx| Some(CompileUnit::FunctionDefined(idx)))
            }
        } else {
            self.parse_stmt()
        };

        match result {
            Ok(Some(unit)) => Ok(unit),
            Ok(None) => Ok(CompileUnit::MainBytecode),
            Err(CompileError::Control(Control::Quit)) => Ok(CompileUnit::Quit),
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    /// Read-only view of the compiled program so far.
    pub fn program_snapshot(&self) -> ProgramSnapshot<'_> {
        self.prog.snapshot()
    }

    /// Abort the current compile unit: drop pending operator/flag/exit/
    /// cond state, truncate MAIN back to empty, and resynchronize the
    /// lexer at the next statement boundary.
    pub fn reset(&mut self) {
        self.ops.clear();
        self.flags.truncate(1);
        self.flags[0] = 0;
        self.exits.clear();
        self.conds.clear();
        self.nbraces = 0;
        self.auto_part = false;
        self.cur_fn = MAIN;
        self.prog.main_mut().reset();

        while !matches!(self.cur.kind, TokenKind::Semicolon | TokenKind::Nline | TokenKind::Eof) {
            if self.advance().is_err() {
                break;
            }
        }
        if self.cur.kind != TokenKind::Eof {
            let _ = self.advance();
        }
    }
}
