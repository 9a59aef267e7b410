//! A lexer, parser, and bytecode compiler for a POSIX `bc`-compatible
//! language.
//!
//! This crate turns `bc` source text into linear bytecode ([`bytecode::Op`])
//! ready for a separate execution engine. It does not execute anything
//! itself: no arbitrary-precision arithmetic, no I/O, no REPL. Compile one
//! executable unit at a time with [`parser::Parser::compile_next_unit`] and
//! hand the resulting [`bytecode::ProgramSnapshot`] to whatever runs it.
//!
//! # Example
//!
//! ```
//! use bcc::parser::{CompileUnit, ParseOptions, Parser};
//!
//! let mut parser = Parser::new("a = 1 + 2\nprint a\n", "input.bc", ParseOptions::default())
//!     .expect("lexing the first token never fails on this input");
//!
//! loop {
//!     match parser.compile_next_unit().expect("valid program") {
//!         CompileUnit::Eof | CompileUnit::Quit => break,
//!         _ => {}
//!     }
//! }
//!
//! let program = parser.program_snapshot();
//! assert!(!program.functions[bcc::bytecode::MAIN].code.is_empty());
//! ```
//!
//! # Diagnostics
//!
//! Every compile call returns a [`diagnostics::CompileError`], closing over
//! three distinct kinds of non-success outcome: hard lex/parse errors, POSIX
//! portability warnings (escalated to errors under
//! [`parser::ParseOptions::posix_strict`]), and control signals (`quit`,
//! cooperative cancellation) that the driver should treat as ordinary
//! signalling rather than report to a user.

pub mod bytecode;
pub mod diagnostics;
mod expr;
mod lexer;
pub mod parser;
mod stmt;
pub mod token;
