//! Statement and control-flow compiler: the token-switch statement
//! dispatcher, `if`/`else` (dangling-else via the `IF_END` flag bit),
//! `while`/`for` (labels patched at emission time), `break`/`continue`,
//! `return`, `print`, and function definitions.

use crate::bytecode::{Op, MAIN};
use crate::diagnostics::{CompileError, Control, ParseError, PResult, PosixWarning};
use crate::expr::ExprFlags;
use crate::parser::{flags, CompileUnit, Parser};
use crate::token::TokenKind;

impl Parser {
    /// Compile exactly one top-level unit. `quit`/`limits` are only
    /// recognized as driver-level signals here, at the outermost call;
    /// nested occurrences fall through to [`Parser::parse_stmt_body`]
    /// as no-ops.
    pub(crate) fn parse_stmt(&mut self) -> PResult<Option<CompileUnit>> {
        match self.cur().kind {
            TokenKind::Quit => Err(CompileError::Control(Control::Quit)),
            TokenKind::Limits => {
                self.advance()?;
                self.end_of_simple_stmt()?;
                Ok(Some(CompileUnit::Limits))
            }
            _ => {
                self.parse_stmt_body()?;
                Ok(None)
            }
        }
    }

    /// One statement, usable both at the top level and nested inside a
    /// body (`if`/`while`/`for`/`{ }`/function bodies all bottom out here).
    pub(crate) fn parse_stmt_body(&mut self) -> PResult<()> {
        let kind = self.cur().kind;
        if !matches!(kind, TokenKind::Auto | TokenKind::Nline | TokenKind::Semicolon) {
            self.auto_part = false;
        }

        match kind {
            TokenKind::Quit | TokenKind::Limits => {
                self.advance()?;
                self.end_of_simple_stmt()
            }
            TokenKind::Nline | TokenKind::Semicolon => self.advance(),
            TokenKind::LBrace => self.parse_block(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Break => self.parse_break(),
            TokenKind::Continue => self.parse_continue(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Halt => {
                self.advance()?;
                self.emit(Op::Halt);
                self.end_of_simple_stmt()
            }
            TokenKind::Auto => self.parse_auto(),
            TokenKind::Print => self.parse_print(),
            TokenKind::String => {
                let idx = {
                    let text = self.cur().text().to_string();
                    self.prog.intern_string(text)
                };
                self.advance()?;
                self.emit(Op::PrintStr);
                self.emit_index(idx);
                self.end_of_simple_stmt()
            }
            _ => {
                self.parse_expr(ExprFlags { print: true, ..ExprFlags::default() })?;
                self.end_of_simple_stmt()
            }
        }
    }

    fn end_of_simple_stmt(&mut self) -> PResult<()> {
        match self.cur().kind {
            TokenKind::Semicolon | TokenKind::Nline => self.advance(),
            TokenKind::RBrace | TokenKind::Eof => Ok(()),
            _ => Err(CompileError::Parse(ParseError::BadToken(self.pos()))),
        }
    }

    fn parse_block(&mut self) -> PResult<()> {
        self.advance()?; // consume '{'
        self.inc_braces();
        while self.cur().kind != TokenKind::RBrace {
            if self.cur().kind == TokenKind::Eof {
                return Err(CompileError::Parse(ParseError::NoBlockEnd(self.pos())));
            }
            self.parse_stmt_body()?;
        }
        self.dec_braces();
        self.advance()
    }

    fn parse_if(&mut self) -> PResult<()> {
        self.advance()?; // consume 'if'
        self.expect(TokenKind::LParen)?;
        self.advance()?;
        self.parse_expr(ExprFlags { rel: true, ..ExprFlags::default() })?;
        self.expect(TokenKind::RParen)?;
        self.advance()?;

        let else_label = self.new_label();
        self.emit(Op::JumpZero);
        self.emit_index(else_label);

        self.push_flags(flags::IF);
        self.parse_stmt_body()?;
        self.pop_flags();
        self.set_if_end();

        if self.cur().kind == TokenKind::Else {
            self.clear_if_end();
            let end_label = self.new_label();
            self.emit(Op::Jump);
            self.emit_index(end_label);
            self.resolve_label(else_label);

            self.advance()?; // consume 'else'
            self.push_flags(flags::ELSE);
            self.parse_stmt_body()?;
            self.pop_flags();

            self.resolve_label(end_label);
        } else {
            self.resolve_label(else_label);
        }
        Ok(())
    }

    fn parse_while(&mut self) -> PResult<()> {
        self.advance()?; // consume 'while'
        self.expect(TokenKind::LParen)?;
        self.advance()?;

        let cond_label = self.label_here();
        self.parse_expr(ExprFlags { rel: true, ..ExprFlags::default() })?;
        self.expect(TokenKind::RParen)?;
        self.advance()?;

        let exit_label = self.new_label();
        self.emit(Op::JumpZero);
        self.emit_index(exit_label);

        self.push_cond(cond_label);
        self.push_exit(exit_label, true);
        self.push_flags(flags::LOOP | flags::LOOP_INNER);

        self.parse_stmt_body()?;

        self.pop_flags();
        self.emit(Op::Jump);
        self.emit_index(cond_label);
        self.resolve_label(exit_label);
        self.pop_exit();
        self.pop_cond();
        Ok(())
    }

    /// 4-label lowering: `init; [cond: jz exit]; jmp body; update: <update
    /// code>; jmp cond; body: <body code>; jmp update; exit:`. The
    /// unconditional jump straight from the condition check to the body
    /// skips the update clause on the loop's first iteration.
    fn parse_for(&mut self) -> PResult<()> {
        self.advance()?; // consume 'for'
        self.expect(TokenKind::LParen)?;
        self.advance()?;

        if self.cur().kind == TokenKind::Semicolon {
            self.warn(PosixWarning::ForMissingInit(self.pos()))?;
        } else {
            self.parse_expr(ExprFlags::default())?;
            self.emit(Op::Pop);
        }
        self.expect(TokenKind::Semicolon)?;
        self.advance()?;

        let cond_label = self.label_here();
        let exit_label = self.new_label();
        if self.cur().kind == TokenKind::Semicolon {
            self.warn(PosixWarning::ForMissingCondition(self.pos()))?;
        } else {
            self.parse_expr(ExprFlags { rel: true, ..ExprFlags::default() })?;
            self.emit(Op::JumpZero);
            self.emit_index(exit_label);
        }
        self.expect(TokenKind::Semicolon)?;
        self.advance()?;

        let update_label = self.new_label();
        let body_label = self.new_label();
        self.emit(Op::Jump);
        self.emit_index(body_label);

        self.resolve_label(update_label);
        if self.cur().kind == TokenKind::RParen {
            self.warn(PosixWarning::ForMissingUpdate(self.pos()))?;
        } else {
            self.parse_expr(ExprFlags::default())?;
            self.emit(Op::Pop);
        }
        self.emit(Op::Jump);
        self.emit_index(cond_label);

        self.expect(TokenKind::RParen)?;
        self.advance()?;

        self.resolve_label(body_label);
        self.push_cond(update_label);
        self.push_exit(exit_label, true);
        self.push_flags(flags::LOOP | flags::LOOP_INNER);

        self.parse_stmt_body()?;

        self.pop_flags();
        self.emit(Op::Jump);
        self.emit_index(update_label);
        self.resolve_label(exit_label);
        self.pop_exit();
        self.pop_cond();
        Ok(())
    }

    fn parse_break(&mut self) -> PResult<()> {
        self.advance()?;
        let target = self
            .nearest_loop_exit()
            .ok_or_else(|| CompileError::Parse(ParseError::LoopControlOutsideLoop(self.pos())))?;
        self.emit(Op::Jump);
        self.emit_index(target);
        self.end_of_simple_stmt()
    }

    fn parse_continue(&mut self) -> PResult<()> {
        self.advance()?;
        let target = self
            .top_cond()
            .ok_or_else(|| CompileError::Parse(ParseError::LoopControlOutsideLoop(self.pos())))?;
        self.emit(Op::Jump);
        self.emit_index(target);
        self.end_of_simple_stmt()
    }

    fn parse_return(&mut self) -> PResult<()> {
        let pos = self.pos();
        if !self.is_func() {
            return Err(CompileError::Parse(ParseError::ReturnOutsideFunction(pos)));
        }
        self.advance()?; // consume 'return'

        if self.cur().kind == TokenKind::LParen && self.peek()? == TokenKind::RParen {
            self.advance()?; // '('
            self.advance()?; // ')'
            self.emit(Op::Ret0);
            return self.end_of_simple_stmt();
        }

        let started_with_paren = self.cur().kind == TokenKind::LParen;
        match self.parse_expr(ExprFlags::default()) {
            Ok(()) => {
                if !(started_with_paren && self.last_kind() == TokenKind::RParen) {
                    self.warn(PosixWarning::NonParenthesizedReturn(pos))?;
                }
                self.emit(Op::Ret);
            }
            Err(CompileError::Control(Control::EmptyExpr)) => {
                self.emit(Op::Ret0);
            }
            Err(e) => return Err(e),
        }
        self.end_of_simple_stmt()
    }

    fn parse_auto(&mut self) -> PResult<()> {
        let pos = self.pos();
        if !self.auto_part {
            return Err(CompileError::Parse(ParseError::AutoNotAllowedHere(pos)));
        }
        self.advance()?; // consume 'auto'

        loop {
            if self.cur().kind != TokenKind::Name {
                return Err(CompileError::Parse(ParseError::BadFunctionDefinition(self.pos())));
            }
            let name = self.cur().text().to_string();
            let name_pos = self.pos();
            self.advance()?;

            let is_array = if self.cur().kind == TokenKind::LBracket {
                self.advance()?;
                self.expect(TokenKind::RBracket)?;
                self.advance()?;
                true
            } else {
                false
            };
            self.declare_local(name, is_array, &name_pos)?;

            if self.cur().kind == TokenKind::Comma {
                self.advance()?;
                continue;
            }
            break;
        }
        self.end_of_simple_stmt()
    }

    fn parse_print(&mut self) -> PResult<()> {
        self.advance()?; // consume 'print'
        loop {
            if self.cur().kind == TokenKind::String {
                let idx = {
                    let text = self.cur().text().to_string();
                    self.prog.intern_string(text)
                };
                self.advance()?;
                self.emit(Op::PrintStr);
                self.emit_index(idx);
            } else {
                self.parse_expr(ExprFlags::default())?;
                self.emit(Op::PrintPop);
            }
            if self.cur().kind == TokenKind::Comma {
                self.advance()?;
                continue;
            }
            break;
        }
        self.end_of_simple_stmt()
    }

    pub(crate) fn parse_func(&mut self) -> PResult<usize> {
        self.advance()?; // consume 'define'
        if self.cur().kind != TokenKind::Name {
            return Err(CompileError::Parse(ParseError::BadFunctionDefinition(self.pos())));
        }
        let name = self.cur().text().to_string();
        self.advance()?;
        self.expect(TokenKind::LParen)?;
        self.advance()?;

        let fn_idx = self.prog.fn_index_of(&name);
        self.select_function(fn_idx);
        {
            let f = &mut self.prog.functions[fn_idx];
            f.locals.clear();
            f.nparams = 0;
            f.code.clear();
            f.labels.clear();
        }

        if self.cur().kind != TokenKind::RParen {
            loop {
                let by_ref = self.cur().kind == TokenKind::OpMultiply;
                if by_ref {
                    self.advance()?;
                }
                if self.cur().kind != TokenKind::Name {
                    return Err(CompileError::Parse(ParseError::BadFunctionDefinition(self.pos())));
                }
                let pname = self.cur().text().to_string();
                let ppos = self.pos();
                self.advance()?;

                let is_array = self.cur().kind == TokenKind::LBracket;
                if is_array {
                    self.advance()?;
                    self.expect(TokenKind::RBracket)?;
                    self.advance()?;
                } else if by_ref {
                    return Err(CompileError::Parse(ParseError::BadFunctionDefinition(ppos)));
                }
                if by_ref {
                    self.warn(PosixWarning::ArrayReferenceParameter(ppos.clone()))?;
                }

                self.prog.functions[fn_idx]
                    .insert_local(pname, is_array, &ppos)
                    .map_err(CompileError::Parse)?;
                self.prog.functions[fn_idx].nparams += 1;

                if self.cur().kind == TokenKind::Comma {
                    self.advance()?;
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        self.advance()?;

        if self.cur().kind == TokenKind::Nline {
            self.warn(PosixWarning::FuncBraceOnNextLine(self.pos()))?;
            self.advance()?;
        }
        self.expect(TokenKind::LBrace)?;

        self.auto_part = true;
        self.push_flags(flags::FUNC | flags::FUNC_INNER);
        self.parse_block()?;
        self.pop_flags();
        self.auto_part = false;

        self.emit(Op::Ret0);
        self.select_function(MAIN);
        Ok(fn_idx)
    }
}

#[cfg(test)]
mod tests {
    use crate::bytecode::Op;
    use crate::parser::{CompileUnit, ParseOptions};

    use super::*;

    #[test]
    fn if_without_else_jumps_past_body() {
        let mut p = Parser::new("if (1) x=2;\n", "t.bc", ParseOptions::default()).unwrap();
        assert_eq!(p.compile_next_unit().unwrap(), CompileUnit::MainBytecode);
        assert!(p.prog.main().labels_well_formed());
        assert!(p.prog.main().code.contains(&(Op::JumpZero as u8)));
    }

    #[test]
    fn if_else_emits_both_branches() {
        let mut p = Parser::new("if (1) x=2; else x=3;\n", "t.bc", ParseOptions::default()).unwrap();
        assert_eq!(p.compile_next_unit().unwrap(), CompileUnit::MainBytecode);
        let code = &p.prog.main().code;
        assert!(code.contains(&(Op::JumpZero as u8)));
        assert!(code.contains(&(Op::Jump as u8)));
        assert!(p.prog.main().labels_well_formed());
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let mut p = Parser::new("break;\n", "t.bc", ParseOptions::default()).unwrap();
        let err = p.compile_next_unit().unwrap_err();
        assert!(matches!(err, CompileError::Parse(ParseError::LoopControlOutsideLoop(_))));
    }

    #[test]
    fn break_in_nested_if_inside_while_targets_loop_exit() {
        let src = "while (1) { if (1) break; }\n";
        let mut p = Parser::new(src, "t.bc", ParseOptions::default()).unwrap();
        assert_eq!(p.compile_next_unit().unwrap(), CompileUnit::MainBytecode);
        assert!(p.prog.main().labels_well_formed());
    }

    #[test]
    fn return_outside_function_is_an_error() {
        let mut p = Parser::new("return;\n", "t.bc", ParseOptions::default()).unwrap();
        let err = p.compile_next_unit().unwrap_err();
        assert!(matches!(err, CompileError::Parse(ParseError::ReturnOutsideFunction(_))));
    }

    #[test]
    fn function_definition_compiles_into_its_own_slot() {
        let mut p = Parser::new("define f(x) {\nreturn (x+1);\n}\n", "t.bc", ParseOptions::default()).unwrap();
        match p.compile_next_unit().unwrap() {
            CompileUnit::FunctionDefined(idx) => {
                assert_ne!(idx, MAIN);
                assert!(p.prog.functions[idx].code.contains(&(Op::Ret as u8)));
                assert!(!p.warnings.iter().any(|w| matches!(w, PosixWarning::NonParenthesizedReturn(_))));
            }
            other => panic!("expected FunctionDefined, got {other:?}"),
        }
    }

    #[test]
    fn bare_return_expression_warns_under_default_options() {
        let mut p = Parser::new("define f(x) {\nreturn x+1;\n}\n", "t.bc", ParseOptions::default()).unwrap();
        p.compile_next_unit().unwrap();
        assert!(p.warnings.iter().any(|w| matches!(w, PosixWarning::NonParenthesizedReturn(_))));
    }

    #[test]
    fn auto_outside_function_top_is_rejected() {
        let mut p = Parser::new("x=1;\nauto y;\n", "t.bc", ParseOptions::default()).unwrap();
        p.compile_next_unit().unwrap();
        let err = p.compile_next_unit().unwrap_err();
        assert!(matches!(err, CompileError::Parse(ParseError::AutoNotAllowedHere(_))));
    }

    #[test]
    fn quit_is_a_driver_level_signal_not_an_error() {
        let mut p = Parser::new("quit\n", "t.bc", ParseOptions::default()).unwrap();
        assert_eq!(p.compile_next_unit().unwrap(), CompileUnit::Quit);
    }

    #[test]
    fn posix_strict_escalates_boolean_operator_warning() {
        let mut p = Parser::new("if (1 && 0) x=1;\n", "t.bc", ParseOptions { posix_strict: true }).unwrap();
        let err = p.compile_next_unit().unwrap_err();
        assert!(matches!(err, CompileError::Posix(PosixWarning::BooleanOperator(_, "&&"))));
    }
}
