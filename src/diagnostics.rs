//! Catalogued error/warning kinds and the POSIX-strictness gate.
//!
//! bc distinguishes three kinds of non-success outcome from a compile:
//! hard errors (abort the current unit), POSIX warnings (accepted
//! extensions, escalated to hard errors under strict mode), and control
//! pseudo-statuses (`Eof`, `Quit`, `Halt`, ...) that the driver treats
//! as ordinary signalling rather than user errors.

use std::fmt;

/// A location in the source being compiled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub line: usize,
    pub file: String,
}

impl Position {
    pub fn new(line: usize, file: impl Into<String>) -> Self {
        Position { line, file: file.into() }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Hard lexical errors: always abort the current compile unit.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("{0}: end of file reached before string literal was terminated")]
    UnterminatedString(Position),
    #[error("{0}: end of file reached before comment was terminated")]
    UnterminatedComment(Position),
    #[error("{0}: bad character {1:?}")]
    BadCharacter(Position, char),
    #[error("{0}: unexpected end of file")]
    UnexpectedEof(Position),
}

/// Hard parse errors: always abort the current compile unit.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("{0}: bad token")]
    BadToken(Position),
    #[error("{0}: bad expression")]
    BadExpression(Position),
    #[error("{0}: bad assignment: left side must be an lvalue")]
    BadAssignment(Position),
    #[error("{0}: bad function definition")]
    BadFunctionDefinition(Position),
    #[error("{0}: no block end (unterminated body)")]
    NoBlockEnd(Position),
    #[error("{0}: auto variables may only be declared at the top of a function")]
    AutoNotAllowedHere(Position),
    #[error("{0}: variable or array '{1}' was already declared in this scope")]
    DuplicateLocal(Position, String),
    #[error("{0}: return statement outside of function")]
    ReturnOutsideFunction(Position),
    #[error("{0}: break or continue outside of loop")]
    LoopControlOutsideLoop(Position),
}

/// POSIX-portability warnings: accepted extensions, escalated to hard
/// errors under [`ParseOptions::posix_strict`](crate::parser::ParseOptions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PosixWarning {
    ScriptComment(Position),
    BooleanOperator(Position, &'static str),
    DotAsLast(Position),
    NonParenthesizedReturn(Position),
    RelationalOutsideCondition(Position),
    MultipleRelationalOperators(Position),
    ForMissingInit(Position),
    ForMissingCondition(Position),
    ForMissingUpdate(Position),
    FuncBraceOnNextLine(Position),
    ArrayReferenceParameter(Position),
}

impl fmt::Display for PosixWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use PosixWarning::*;
        match self {
            ScriptComment(p) => write!(f, "{p}: POSIX does not allow '#' script comments"),
            BooleanOperator(p, op) => {
                write!(f, "{p}: POSIX does not allow the boolean operator '{op}'")
            }
            DotAsLast(p) => write!(f, "{p}: POSIX does not allow '.' as an abbreviation for 'last'"),
            NonParenthesizedReturn(p) => {
                write!(f, "{p}: POSIX requires parentheses around a return expression")
            }
            RelationalOutsideCondition(p) => {
                write!(f, "{p}: POSIX only allows relational operators in if/while/for conditions")
            }
            MultipleRelationalOperators(p) => {
                write!(f, "{p}: POSIX only allows one relational operator per condition")
            }
            ForMissingInit(p) => write!(f, "{p}: POSIX requires a for-loop init clause"),
            ForMissingCondition(p) => write!(f, "{p}: POSIX requires a for-loop condition clause"),
            ForMissingUpdate(p) => write!(f, "{p}: POSIX requires a for-loop update clause"),
            FuncBraceOnNextLine(p) => {
                write!(f, "{p}: POSIX requires the opening brace on the same line as 'define'")
            }
            ArrayReferenceParameter(p) => {
                write!(f, "{p}: POSIX does not allow array reference parameters")
            }
        }
    }
}

impl std::error::Error for PosixWarning {}

/// Control pseudo-statuses: not user errors, but signalling values the
/// driver must act on without reporting a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Eof,
    /// An expression turned out to be empty; quietly downgraded by the
    /// caller (e.g. `return()` becomes `RET0`) rather than reported.
    EmptyExpr,
    Quit,
    Limits,
    /// The engine's cooperative cancellation flag was observed set.
    Signal,
}

/// Any non-success outcome of compiling one unit.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Posix(PosixWarning),
    #[error("control signal: {0:?}")]
    Control(Control),
}

impl From<PosixWarning> for CompileError {
    fn from(w: PosixWarning) -> Self {
        CompileError::Posix(w)
    }
}

impl From<Control> for CompileError {
    fn from(c: Control) -> Self {
        CompileError::Control(c)
    }
}

pub type LResult<T> = Result<T, LexError>;
pub type PResult<T> = Result<T, CompileError>;
