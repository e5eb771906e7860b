use super::helpers::*;

#[test]
fn e2e_error_unfinished_string() {
    let err = compile_str_err("local x = \"hello");
    assert_eq!(err, "unfinished string near '<eof>'");
}

#[test]
fn e2e_error_break_outside_loop() {
    assert_eq!(compile_str_err("break"), "no loop to break near '<eof>'");
}

#[test]
fn e2e_error_goto_is_not_a_statement() {
    let err = compile_str_err("goto x");
    assert_eq!(err, "'=' expected near 'x'");
}

#[test]
fn e2e_error_unexpected_symbol() {
    assert_eq!(compile_str_err("return )"), "unexpected symbol near ')'");
}

#[test]
fn e2e_error_malformed_number() {
    assert_eq!(compile_str_err("local x = 1e"), "malformed number near '1e'");
}

#[test]
fn e2e_error_expected_end() {
    assert_eq!(compile_str_err("if true then"), "'end' expected near '<eof>'");
}

#[test]
fn e2e_error_expected_end_other_line() {
    let err = compile_str_err("while true do\n\n");
    assert_eq!(err, "'end' expected (to close 'while' at line 1) near '<eof>'");
}

#[test]
fn e2e_error_expected_then() {
    assert_eq!(compile_str_err("if true do end"), "'then' expected near 'do'");
}

#[test]
fn e2e_error_vararg_outside() {
    let err = compile_str_err("function f() return ... end");
    assert!(err.starts_with("cannot use '...' outside a vararg function"));
}

#[test]
fn e2e_error_expression_not_statement() {
    assert_eq!(compile_str_err("42"), "unexpected symbol near '42'");
}

#[test]
fn e2e_error_bad_for() {
    assert_eq!(compile_str_err("for x do end"), "'=' or 'in' expected near 'do'");
}

#[test]
fn e2e_error_bad_parameter() {
    assert_eq!(
        compile_str_err("function f(1) end"),
        "<name> or '...' expected near '1'"
    );
}

#[test]
fn e2e_error_too_many_upvalues() {
    let mut src = String::new();
    for i in 0..61 {
        src.push_str(&format!("local u{i} = {i}\n"));
    }
    src.push_str("return function() return ");
    let uses: Vec<String> = (0..61).map(|i| format!("u{i}")).collect();
    src.push_str(&uses.join(" + "));
    src.push_str(" end\n");
    let err = compile_str_err(&src);
    assert!(err.contains("has more than 60 upvalues"), "{err}");
}

#[test]
fn e2e_error_function_args_expected() {
    assert_eq!(compile_str_err("local t = {}\nt:m 1"), "function arguments expected near '1'");
}
