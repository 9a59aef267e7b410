//! End-to-end compile tests driving the public `Parser` surface.

use bcc::bytecode::{Op, MAIN};
use bcc::diagnostics::{CompileError, ParseError, PosixWarning};
use bcc::parser::{CompileUnit, ParseOptions, Parser};

fn compile_all(src: &str) -> Parser {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut parser = Parser::new(src, "t.bc", ParseOptions::default()).expect("lex first token");
    loop {
        match parser.compile_next_unit().expect("valid program") {
            CompileUnit::Eof | CompileUnit::Quit => break,
            _ => {}
        }
    }
    parser
}

#[test]
fn arithmetic_statement_prints_its_result() {
    let p = compile_all("1 + 2\n");
    let code = &p.prog.main().code;
    assert_eq!(code[0], Op::Num as u8);
    assert_eq!(code[3], Op::Num as u8);
    assert_eq!(code[6], Op::Add as u8);
    assert_eq!(code[7], Op::Print as u8);
}

#[test]
fn if_else_compiles_with_well_formed_labels() {
    let p = compile_all("if (1 < 2) { x = 1 } else { x = 2 }\n");
    assert!(p.prog.main().labels_well_formed());
    let code = &p.prog.main().code;
    assert!(code.contains(&(Op::JumpZero as u8)));
    assert!(code.contains(&(Op::Jump as u8)));
}

#[test]
fn dangling_else_binds_to_nearest_if() {
    // else must attach to the inner if, not leave the outer if un-elsed.
    let p = compile_all("if (1) if (0) x = 1; else x = 2;\n");
    assert!(p.prog.main().labels_well_formed());
}

#[test]
fn while_loop_jumps_back_to_its_condition() {
    let p = compile_all("i = 0\nwhile (i < 3) { i = i + 1 }\n");
    assert!(p.prog.main().labels_well_formed());
}

#[test]
fn for_loop_runs_update_after_body_not_before() {
    let p = compile_all("for (i = 0; i < 3; i = i + 1) { print i }\n");
    assert!(p.prog.main().labels_well_formed());
    let code = &p.prog.main().code;
    // two Jump-to-condition style backward jumps from the 4-label lowering
    assert!(code.iter().filter(|&&b| b == Op::Jump as u8).count() >= 2);
}

#[test]
fn break_in_nested_if_reaches_the_enclosing_loop_exit() {
    let p = compile_all("while (1) { if (1) { break } else { continue } }\n");
    assert!(p.prog.main().labels_well_formed());
}

#[test]
fn break_outside_any_loop_is_rejected() {
    let mut parser = Parser::new("break;\n", "t.bc", ParseOptions::default()).unwrap();
    let err = parser.compile_next_unit().unwrap_err();
    assert!(matches!(err, CompileError::Parse(ParseError::LoopControlOutsideLoop(_))));
}

#[test]
fn function_definition_and_call_share_the_function_table_slot() {
    let mut parser = Parser::new("define f(x) {\nreturn (x * x)\n}\nf(3)\n", "t.bc", ParseOptions::default()).unwrap();

    let first = parser.compile_next_unit().unwrap();
    let fn_idx = match first {
        CompileUnit::FunctionDefined(idx) => idx,
        other => panic!("expected FunctionDefined, got {other:?}"),
    };
    assert_ne!(fn_idx, MAIN);
    assert!(parser.prog.functions[fn_idx].code.contains(&(Op::Ret as u8)));

    let second = parser.compile_next_unit().unwrap();
    assert_eq!(second, CompileUnit::MainBytecode);
    let call_idx = parser.prog.fn_index.get("f").copied().unwrap();
    assert_eq!(call_idx, fn_idx);
    assert!(parser.prog.main().code.contains(&(Op::Call as u8)));
}

#[test]
fn auto_locals_are_declared_before_use() {
    let mut parser =
        Parser::new("define f() {\nauto x, y[]\nx = 1\nreturn (x)\n}\n", "t.bc", ParseOptions::default()).unwrap();
    let unit = parser.compile_next_unit().unwrap();
    let fn_idx = match unit {
        CompileUnit::FunctionDefined(idx) => idx,
        other => panic!("expected FunctionDefined, got {other:?}"),
    };
    let f = &parser.prog.functions[fn_idx];
    assert_eq!(f.locals.len(), 2);
    assert!(f.locals[1].is_array);
}

#[test]
fn print_statement_mixes_strings_and_expressions() {
    let p = compile_all("print \"x = \", 1 + 1, \"\\n\"\n");
    let code = &p.prog.main().code;
    assert!(code.contains(&(Op::PrintStr as u8)));
    assert!(code.contains(&(Op::PrintPop as u8)));
}

#[test]
fn posix_strict_mode_escalates_non_parenthesized_return() {
    let mut parser = Parser::new(
        "define f() {\nreturn 1\n}\n",
        "t.bc",
        ParseOptions { posix_strict: true },
    )
    .unwrap();
    let err = parser.compile_next_unit().unwrap_err();
    assert!(matches!(err, CompileError::Posix(PosixWarning::NonParenthesizedReturn(_))));
}

#[test]
fn quit_statement_is_reported_as_a_clean_stop_not_an_error() {
    let mut parser = Parser::new("x = 1\nquit\n", "t.bc", ParseOptions::default()).unwrap();
    assert_eq!(parser.compile_next_unit().unwrap(), CompileUnit::MainBytecode);
    assert_eq!(parser.compile_next_unit().unwrap(), CompileUnit::Quit);
}

#[test]
fn bad_token_recovers_at_the_next_statement_boundary() {
    let mut parser = Parser::new(")1;\nx = 1;\n", "t.bc", ParseOptions::default()).unwrap();
    assert!(parser.compile_next_unit().is_err());
    assert_eq!(parser.compile_next_unit().unwrap(), CompileUnit::MainBytecode);
}
