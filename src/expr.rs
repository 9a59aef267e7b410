//! Shunting-yard expression parser: tokens straight to postfix bytecode,
//! no intermediate AST. Grounded on the operator classification and
//! disambiguation rules of the original `bc_parse_expr`/`bc_parse_operator`
//! (see SPEC_FULL.md §B for the exact rules this follows).

use crate::bytecode::Op;
use crate::diagnostics::{CompileError, Control, ParseError, PResult, PosixWarning};
use crate::parser::Parser;
use crate::token::TokenKind;

/// Caller-supplied context for one `parse_expr` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprFlags {
    /// Emit a trailing `PRINT` unless the expression is a parenthesized
    /// assignment (the `paren_first || !assign` rule).
    pub print: bool,
    /// Relational operators are expected here (an `if`/`while`/`for`
    /// condition) rather than merely tolerated as a POSIX extension.
    pub rel: bool,
    /// A bare `name[]` whole-array reference is legal here (function
    /// call arguments only).
    pub array: bool,
    /// A function call is not legal here.
    pub no_call: bool,
    /// `read()` is not legal here (already inside one).
    pub no_read: bool,
}

struct NameFlags {
    array: bool,
    no_call: bool,
}

/// Classification of the most recently completed primary, used to
/// decide whether the next token may start a new primary or must be an
/// operator/terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prev {
    /// Nothing parsed yet.
    Start,
    /// An assignable primary (a variable, array element, `ibase`,
    /// `obase`, or bare `scale`).
    Lvalue,
    /// A non-assignable value (a number, array whole-reference, call,
    /// `length`/`sqrt`/`scale(...)`, `read()`, or a postfix inc/dec result).
    Leaf,
    /// `!` was just pushed, still awaiting its operand.
    Not,
    /// Some other operator was just pushed, still awaiting its operand.
    BinOp,
}

fn is_leaf(prev: Prev, rprn: bool) -> bool {
    rprn || matches!(prev, Prev::Lvalue | Prev::Leaf)
}

fn precedence(op: TokenKind) -> (u8, bool) {
    use TokenKind::*;
    match op {
        OpPower => (1, false),
        OpNeg | OpBoolNot => (2, false),
        OpMultiply | OpDivide | OpModulus => (3, true),
        OpPlus | OpMinus => (4, true),
        OpAssign | OpAssignPlus | OpAssignMinus | OpAssignMultiply | OpAssignDivide | OpAssignModulus
        | OpAssignPower => (5, false),
        OpRelEq | OpRelNe | OpRelLt | OpRelLe | OpRelGt | OpRelGe => (6, true),
        OpBoolAnd => (7, true),
        OpBoolOr => (8, true),
        _ => unreachable!("not an expression operator: {op:?}"),
    }
}

fn token_to_op(op: TokenKind) -> Op {
    use TokenKind::*;
    match op {
        OpPower => Op::Pow,
        OpNeg => Op::Neg,
        OpBoolNot => Op::BoolNot,
        OpMultiply => Op::Mul,
        OpDivide => Op::Div,
        OpModulus => Op::Mod,
        OpPlus => Op::Add,
        OpMinus => Op::Sub,
        OpAssign => Op::Assign,
        OpAssignPlus => Op::AssignPlus,
        OpAssignMinus => Op::AssignMinus,
        OpAssignMultiply => Op::AssignMultiply,
        OpAssignDivide => Op::AssignDivide,
        OpAssignModulus => Op::AssignModulus,
        OpAssignPower => Op::AssignPower,
        OpRelEq => Op::RelEq,
        OpRelNe => Op::RelNe,
        OpRelLt => Op::RelLt,
        OpRelLe => Op::RelLe,
        OpRelGt => Op::RelGt,
        OpRelGe => Op::RelGe,
        OpBoolAnd => Op::BoolAnd,
        OpBoolOr => Op::BoolOr,
        _ => unreachable!("not an expression operator: {op:?}"),
    }
}

fn is_unary_op(op: TokenKind) -> bool {
    matches!(op, TokenKind::OpNeg | TokenKind::OpBoolNot)
}

fn is_assign_op(op: TokenKind) -> bool {
    use TokenKind::*;
    matches!(
        op,
        OpAssign | OpAssignPlus | OpAssignMinus | OpAssignMultiply | OpAssignDivide | OpAssignModulus | OpAssignPower
    )
}

fn is_rel_op(op: TokenKind) -> bool {
    use TokenKind::*;
    matches!(op, OpRelEq | OpRelNe | OpRelLt | OpRelLe | OpRelGt | OpRelGe)
}

impl Parser {
    /// Parse one expression, leaving its value on top of the runtime
    /// stack. Pops into bytecode eagerly (shunting-yard): by the time
    /// this returns, every operator the expression used has already
    /// been emitted.
    pub(crate) fn parse_expr(&mut self, flags: ExprFlags) -> PResult<()> {
        let ops_start = self.ops.len();
        let paren_first = self.cur().kind == TokenKind::LParen;

        let mut prev = Prev::Start;
        let mut nexprs: i64 = 0;
        let mut nparens: u32 = 0;
        let mut nrelops: u32 = 0;
        let mut rprn = false;
        let mut expect_operand = true;

        while self.cur().kind.starts_expr() {
            self.check_cancelled()?;
            let kind = self.cur().kind;
            let pos = self.pos();

            match kind {
                TokenKind::OpInc | TokenKind::OpDec => {
                    self.parse_incdec(&mut prev, &mut nexprs, kind, expect_operand)?;
                    rprn = false;
                    expect_operand = false;
                }
                TokenKind::OpMinus => {
                    let op = if is_leaf(prev, rprn) { TokenKind::OpMinus } else { TokenKind::OpNeg };
                    self.operator_push(op, &mut nexprs)?;
                    prev = Prev::BinOp;
                    rprn = false;
                    expect_operand = true;
                }
                TokenKind::OpBoolNot => {
                    if !expect_operand {
                        return Err(CompileError::Parse(ParseError::BadExpression(pos)));
                    }
                    self.operator_push(TokenKind::OpBoolNot, &mut nexprs)?;
                    prev = Prev::Not;
                    rprn = false;
                    expect_operand = true;
                }
                TokenKind::OpPlus
                | TokenKind::OpMultiply
                | TokenKind::OpDivide
                | TokenKind::OpModulus
                | TokenKind::OpPower
                | TokenKind::OpAssign
                | TokenKind::OpAssignPlus
                | TokenKind::OpAssignMinus
                | TokenKind::OpAssignMultiply
                | TokenKind::OpAssignDivide
                | TokenKind::OpAssignModulus
                | TokenKind::OpAssignPower
                | TokenKind::OpRelEq
                | TokenKind::OpRelNe
                | TokenKind::OpRelLt
                | TokenKind::OpRelLe
                | TokenKind::OpRelGt
                | TokenKind::OpRelGe
                | TokenKind::OpBoolAnd
                | TokenKind::OpBoolOr => {
                    if expect_operand || matches!(prev, Prev::Not) {
                        return Err(CompileError::Parse(ParseError::BadExpression(pos)));
                    }
                    if is_assign_op(kind) && !matches!(prev, Prev::Lvalue) {
                        return Err(CompileError::Parse(ParseError::BadAssignment(pos)));
                    }
                    if is_rel_op(kind) {
                        nrelops += 1;
                    }
                    self.operator_push(kind, &mut nexprs)?;
                    prev = Prev::BinOp;
                    rprn = false;
                    expect_operand = true;
                }
                TokenKind::LParen => {
                    if is_leaf(prev, rprn) {
                        return Err(CompileError::Parse(ParseError::BadExpression(pos)));
                    }
                    self.ops.push(TokenKind::LParen);
                    nparens += 1;
                    rprn = false;
                    expect_operand = true;
                    self.advance()?;
                }
                TokenKind::RParen => {
                    if expect_operand || matches!(prev, Prev::Not) {
                        return Err(CompileError::Parse(ParseError::BadExpression(pos)));
                    }
                    if nparens == 0 {
                        break;
                    }
                    self.flush_until_lparen(ops_start, &mut nexprs)?;
                    nparens -= 1;
                    rprn = true;
                    prev = Prev::Leaf;
                    expect_operand = false;
                    self.advance()?;
                }
                TokenKind::Name => {
                    if is_leaf(prev, rprn) {
                        return Err(CompileError::Parse(ParseError::BadExpression(pos)));
                    }
                    prev = self.parse_name(NameFlags { array: flags.array, no_call: flags.no_call })?;
                    nexprs += 1;
                    rprn = false;
                    expect_operand = false;
                }
                TokenKind::Number => {
                    if is_leaf(prev, rprn) {
                        return Err(CompileError::Parse(ParseError::BadExpression(pos)));
                    }
                    let digits = self.cur().text().to_string();
                    let idx = self.prog.intern_number(digits);
                    self.emit(Op::Num);
                    self.emit_index(idx);
                    prev = Prev::Leaf;
                    nexprs += 1;
                    rprn = false;
                    expect_operand = false;
                    self.advance()?;
                }
                TokenKind::Ibase | TokenKind::Last | TokenKind::Obase => {
                    if is_leaf(prev, rprn) {
                        return Err(CompileError::Parse(ParseError::BadExpression(pos)));
                    }
                    let op = match kind {
                        TokenKind::Ibase => Op::Ibase,
                        TokenKind::Last => Op::Last,
                        TokenKind::Obase => Op::Obase,
                        _ => unreachable!(),
                    };
                    self.emit(op);
                    prev = Prev::Lvalue;
                    nexprs += 1;
                    rprn = false;
                    expect_operand = false;
                    self.advance()?;
                }
                TokenKind::Length | TokenKind::Sqrt => {
                    if is_leaf(prev, rprn) {
                        return Err(CompileError::Parse(ParseError::BadExpression(pos)));
                    }
                    self.parse_builtin(kind)?;
                    prev = Prev::Leaf;
                    nexprs += 1;
                    rprn = false;
                    expect_operand = false;
                }
                TokenKind::Read => {
                    if is_leaf(prev, rprn) {
                        return Err(CompileError::Parse(ParseError::BadExpression(pos)));
                    }
                    if flags.no_read {
                        return Err(CompileError::Parse(ParseError::BadExpression(pos)));
                    }
                    self.parse_read()?;
                    prev = Prev::Leaf;
                    nexprs += 1;
                    rprn = false;
                    expect_operand = false;
                }
                TokenKind::Scale => {
                    if is_leaf(prev, rprn) {
                        return Err(CompileError::Parse(ParseError::BadExpression(pos)));
                    }
                    let was_call = self.parse_scale()?;
                    prev = if was_call { Prev::Leaf } else { Prev::Lvalue };
                    nexprs += 1;
                    rprn = false;
                    expect_operand = false;
                }
                _ => unreachable!("TokenKind::starts_expr admitted a token expr_loop doesn't handle"),
            }
        }

        let nothing_parsed = matches!(prev, Prev::Start) && self.ops.len() == ops_start;
        if nothing_parsed {
            return Err(CompileError::Control(Control::EmptyExpr));
        }
        if matches!(prev, Prev::Not) {
            return Err(CompileError::Parse(ParseError::BadExpression(self.pos())));
        }

        let last_was_assign = self.flush_to_baseline(ops_start, &mut nexprs)?;
        if nexprs != 1 {
            return Err(CompileError::Parse(ParseError::BadExpression(self.pos())));
        }

        if !flags.rel && nrelops > 0 {
            self.warn(PosixWarning::RelationalOutsideCondition(self.pos()))?;
        } else if flags.rel && nrelops > 1 {
            self.warn(PosixWarning::MultipleRelationalOperators(self.pos()))?;
        }

        if flags.print {
            if paren_first || !last_was_assign {
                self.emit(Op::Print);
            }
            self.emit(Op::Pop);
        }

        Ok(())
    }

    fn parse_incdec(&mut self, prev: &mut Prev, nexprs: &mut i64, kind: TokenKind, expect_operand: bool) -> PResult<()> {
        if !expect_operand {
            if *prev != Prev::Lvalue {
                return Err(CompileError::Parse(ParseError::BadExpression(self.pos())));
            }
            self.emit(if kind == TokenKind::OpInc { Op::IncPost } else { Op::DecPost });
            *prev = Prev::Leaf;
            return self.advance();
        }

        self.advance()?;
        self.parse_lvalue_primary()?;
        self.emit(if kind == TokenKind::OpInc { Op::IncPre } else { Op::DecPre });
        *prev = Prev::Leaf;
        *nexprs += 1;
        Ok(())
    }

    /// The single lvalue-producing primary a prefix `++`/`--` applies to.
    fn parse_lvalue_primary(&mut self) -> PResult<()> {
        match self.cur().kind {
            TokenKind::Name => {
                let prev = self.parse_name(NameFlags { array: false, no_call: true })?;
                if prev != Prev::Lvalue {
                    return Err(CompileError::Parse(ParseError::BadExpression(self.pos())));
                }
                Ok(())
            }
            TokenKind::Ibase => {
                self.emit(Op::Ibase);
                self.advance()
            }
            TokenKind::Obase => {
                self.emit(Op::Obase);
                self.advance()
            }
            TokenKind::Last => {
                self.emit(Op::Last);
                self.advance()
            }
            TokenKind::Scale => {
                self.advance()?;
                if self.cur().kind == TokenKind::LParen {
                    return Err(CompileError::Parse(ParseError::BadExpression(self.pos())));
                }
                self.emit(Op::Scale);
                Ok(())
            }
            _ => Err(CompileError::Parse(ParseError::BadExpression(self.pos()))),
        }
    }

    fn parse_name(&mut self, flags: NameFlags) -> PResult<Prev> {
        let name = self.cur().text().to_string();
        let pos = self.pos();
        self.advance()?;

        match self.cur().kind {
            TokenKind::LBracket => {
                self.advance()?;
                if self.cur().kind == TokenKind::RBracket {
                    if !flags.array {
                        return Err(CompileError::Parse(ParseError::BadExpression(pos)));
                    }
                    self.advance()?;
                    self.emit(Op::Array);
                    self.emit_name(&name);
                    Ok(Prev::Leaf)
                } else {
                    self.parse_expr(ExprFlags::default())?;
                    if self.cur().kind != TokenKind::RBracket {
                        return Err(CompileError::Parse(ParseError::BadExpression(self.pos())));
                    }
                    self.advance()?;
                    self.emit(Op::ArrayElem);
                    self.emit_name(&name);
                    Ok(Prev::Lvalue)
                }
            }
            TokenKind::LParen => {
                if flags.no_call {
                    return Err(CompileError::Parse(ParseError::BadExpression(pos)));
                }
                self.parse_call(&name)?;
                Ok(Prev::Leaf)
            }
            _ => {
                self.emit(Op::Var);
                self.emit_name(&name);
                Ok(Prev::Lvalue)
            }
        }
    }

    fn parse_call(&mut self, name: &str) -> PResult<()> {
        self.advance()?;
        let mut count = 0usize;
        if self.cur().kind != TokenKind::RParen {
            loop {
                self.parse_expr(ExprFlags { array: true, ..ExprFlags::default() })?;
                count += 1;
                if self.cur().kind == TokenKind::Comma {
                    self.advance()?;
                    continue;
                }
                break;
            }
        }
        if self.cur().kind != TokenKind::RParen {
            return Err(CompileError::Parse(ParseError::BadExpression(self.pos())));
        }
        self.advance()?;
        let fn_idx = self.prog.fn_index_of(name);
        self.emit(Op::Call);
        self.emit_index(count);
        self.emit_index(fn_idx);
        Ok(())
    }

    fn parse_builtin(&mut self, kind: TokenKind) -> PResult<()> {
        self.advance()?;
        if self.cur().kind != TokenKind::LParen {
            return Err(CompileError::Parse(ParseError::BadExpression(self.pos())));
        }
        self.advance()?;
        self.parse_expr(ExprFlags::default())?;
        if self.cur().kind != TokenKind::RParen {
            return Err(CompileError::Parse(ParseError::BadExpression(self.pos())));
        }
        self.advance()?;
        self.emit(if kind == TokenKind::Length { Op::Length } else { Op::Sqrt });
        Ok(())
    }

    fn parse_read(&mut self) -> PResult<()> {
        self.advance()?;
        if self.cur().kind != TokenKind::LParen {
            return Err(CompileError::Parse(ParseError::BadExpression(self.pos())));
        }
        self.advance()?;
        if self.cur().kind != TokenKind::RParen {
            return Err(CompileError::Parse(ParseError::BadExpression(self.pos())));
        }
        self.advance()?;
        self.emit(Op::Read);
        Ok(())
    }

    /// Returns `true` when this was `scale(expr)` (a value, not an
    /// lvalue); `false` for bare `scale`.
    fn parse_scale(&mut self) -> PResult<bool> {
        self.advance()?;
        if self.cur().kind == TokenKind::LParen {
            self.advance()?;
            self.parse_expr(ExprFlags::default())?;
            if self.cur().kind != TokenKind::RParen {
                return Err(CompileError::Parse(ParseError::BadExpression(self.pos())));
            }
            self.advance()?;
            self.emit(Op::ScaleFunc);
            Ok(true)
        } else {
            self.emit(Op::Scale);
            Ok(false)
        }
    }

    /// Shunting-yard: pop and emit every operator binding at least as
    /// tightly as `op` (strictly, for a right-associative `op`), then
    /// push `op` itself. Advances past `op`'s token.
    fn operator_push(&mut self, op: TokenKind, nexprs: &mut i64) -> PResult<()> {
        let (prec, left_assoc) = precedence(op);
        while let Some(&top) = self.ops.last() {
            if top == TokenKind::LParen {
                break;
            }
            let (top_prec, _) = precedence(top);
            let should_pop = if left_assoc { top_prec <= prec } else { top_prec < prec };
            if !should_pop {
                break;
            }
            self.ops.pop();
            self.emit(token_to_op(top));
            if !is_unary_op(top) {
                *nexprs -= 1;
            }
        }
        self.ops.push(op);
        self.advance()
    }

    /// Pop and emit operators down to (and including) the matching `(`.
    fn flush_until_lparen(&mut self, ops_start: usize, nexprs: &mut i64) -> PResult<()> {
        loop {
            match self.ops.last().copied() {
                Some(TokenKind::LParen) => {
                    self.ops.pop();
                    return Ok(());
                }
                Some(top) if self.ops.len() > ops_start => {
                    self.ops.pop();
                    self.emit(token_to_op(top));
                    if !is_unary_op(top) {
                        *nexprs -= 1;
                    }
                }
                _ => return Err(CompileError::Parse(ParseError::BadExpression(self.pos()))),
            }
        }
    }

    /// Pop and emit every operator remaining above `ops_start`. Returns
    /// whether the outermost (last popped) operator was an assignment —
    /// the `paren_first || !assign` rule uses this to suppress `PRINT`
    /// for a bare top-level assignment.
    fn flush_to_baseline(&mut self, ops_start: usize, nexprs: &mut i64) -> PResult<bool> {
        let mut last_was_assign = false;
        while self.ops.len() > ops_start {
            let top = self.ops.pop().unwrap();
            if matches!(top, TokenKind::LParen | TokenKind::RParen) {
                return Err(CompileError::Parse(ParseError::BadExpression(self.pos())));
            }
            last_was_assign = is_assign_op(top);
            self.emit(token_to_op(top));
            if !is_unary_op(top) {
                *nexprs -= 1;
            }
        }
        Ok(last_was_assign)
    }
}

#[cfg(test)]
mod tests {
    use crate::bytecode::MAIN;
    use crate::parser::ParseOptions;

    use super::*;

    fn compile_expr(src: &str) -> Parser {
        let mut p = Parser::new(src, "t.bc", ParseOptions::default()).unwrap();
        p.parse_expr(ExprFlags { print: true, ..ExprFlags::default() }).unwrap();
        p
    }

    #[test]
    fn simple_addition_emits_postfix_order() {
        let p = compile_expr("1+2");
        let code = &p.prog.main().code;
        // NUM 0; NUM 1; ADD; PRINT
        assert_eq!(code[0], Op::Num as u8);
        assert_eq!(&code[1..3], &[1, 0]);
        assert_eq!(code[3], Op::Num as u8);
        assert_eq!(&code[4..6], &[1, 1]);
        assert_eq!(code[6], Op::Add as u8);
        assert_eq!(code[7], Op::Print as u8);
    }

    #[test]
    fn power_is_right_associative() {
        // 2^3^2 should parse as 2^(3^2): NUM NUM NUM POW POW
        let p = compile_expr("2^3^2");
        let ops: Vec<u8> = p.prog.main().code.iter().copied().collect();
        let pow_positions: Vec<usize> = ops
            .iter()
            .enumerate()
            .filter(|(_, &b)| b == Op::Pow as u8)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(pow_positions.len(), 2);
    }

    #[test]
    fn unary_minus_vs_binary_minus() {
        let p = compile_expr("-a-b");
        let code = &p.prog.main().code;
        assert_eq!(code[0], Op::Neg as u8);
        // followed by VAR "a\0"
        assert_eq!(code[1], Op::Var as u8);
    }

    #[test]
    fn assignment_requires_lvalue() {
        let mut p = Parser::new("1=2", "t.bc", ParseOptions::default()).unwrap();
        let err = p.parse_expr(ExprFlags::default()).unwrap_err();
        assert!(matches!(err, CompileError::Parse(ParseError::BadAssignment(_))));
    }

    #[test]
    fn bare_assignment_suppresses_print() {
        let p = compile_expr("a=1");
        assert!(!p.prog.main().code.contains(&(Op::Print as u8)));
    }

    #[test]
    fn parenthesized_assignment_still_prints() {
        let p = compile_expr("(a=1)");
        assert!(p.prog.main().code.contains(&(Op::Print as u8)));
    }

    #[test]
    fn empty_expression_is_a_control_signal() {
        let mut p = Parser::new(")", "t.bc", ParseOptions::default()).unwrap();
        let err = p.parse_expr(ExprFlags::default()).unwrap_err();
        assert!(matches!(err, CompileError::Control(Control::EmptyExpr)));
    }

    #[test]
    fn relational_outside_condition_warns() {
        let mut p = Parser::new("a<b", "t.bc", ParseOptions::default()).unwrap();
        p.parse_expr(ExprFlags::default()).unwrap();
        assert!(p.warnings.iter().any(|w| matches!(w, PosixWarning::RelationalOutsideCondition(_))));
    }

    #[test]
    fn function_call_encodes_arg_count_and_index() {
        let mut p = Parser::new("f(1,2)", "t.bc", ParseOptions::default()).unwrap();
        p.parse_expr(ExprFlags::default()).unwrap();
        let idx = p.prog.fn_index.get("f").copied().unwrap();
        let code = &p.prog.functions[MAIN].code;
        assert_eq!(code.last(), Some(&(idx as u8)));
    }
}
