use pretty_assertions::assert_eq;
use rox::{Error, Vm};

fn compile_errors(source: &str) -> Vec<String> {
    let mut vm = Vm::new();
    match vm.interpret(source) {
        Err(Error::Compile(errors)) => errors.0,
        other => panic!("expected compile error, got {other:?}"),
    }
}

fn runtime_error(source: &str) -> (String, Vec<String>) {
    let mut vm = Vm::new();
    match vm.interpret(source) {
        Err(Error::Runtime { message, trace }) => (message, trace),
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn compile_errors_name_the_offending_lexeme() {
    assert_eq!(
        compile_errors("var;"),
        vec!["[line 1] Error at ';': Expect variable name."]
    );
    assert_eq!(
        compile_errors("print 1"),
        vec!["[line 1] Error at end: Expect ';' after value."]
    );
}

#[test]
fn lex_errors_surface_as_compile_errors() {
    assert_eq!(
        compile_errors("\"unterminated"),
        vec!["[line 1] Error: Unterminated string."]
    );
    assert_eq!(
        compile_errors("var a = @;"),
        vec!["[line 1] Error: Unexpected character."]
    );
}

#[test]
fn error_lines_count_from_one() {
    assert_eq!(
        compile_errors("var ok = 1;\nvar;"),
        vec!["[line 2] Error at ';': Expect variable name."]
    );
}

#[test]
fn invalid_assignment_targets_are_rejected() {
    assert_eq!(
        compile_errors("1 = 2;"),
        vec!["[line 1] Error at '=': Invalid assignment target."]
    );
    assert_eq!(
        compile_errors("var a; var b; a + b = 3;"),
        vec!["[line 1] Error at '=': Invalid assignment target."]
    );
}

#[test]
fn comma_right_operand_is_not_an_lvalue() {
    assert_eq!(
        compile_errors("var a; var b; var c; a, b = c;"),
        vec!["[line 1] Error at '=': Invalid assignment target."]
    );
}

#[test]
fn ternary_branches_are_not_lvalues() {
    assert_eq!(
        compile_errors("var a; var b; true ? a : b = 1;"),
        vec!["[line 1] Error at '=': Invalid assignment target."]
    );
}

#[test]
fn multiple_errors_are_reported_across_statements() {
    let errors = compile_errors("var; print 1 +; var x = ;");
    assert_eq!(errors.len(), 3);
    assert!(errors[0].contains("Expect variable name."));
    assert!(errors[1].contains("Expect expression."));
    assert!(errors[2].contains("Expect expression."));
}

#[test]
fn undefined_global_reads_and_writes_fail() {
    let (message, _) = runtime_error("print missing;");
    assert_eq!(message, "Undefined variable 'missing'.");
    let (message, _) = runtime_error("missing = 1;");
    assert_eq!(message, "Undefined variable 'missing'.");
}

#[test]
fn runtime_traces_walk_the_call_stack_inner_first() {
    let (message, trace) = runtime_error("fun a() { b(); }\na();");
    assert_eq!(message, "Undefined variable 'b'.");
    assert_eq!(trace, vec!["[line 1] in a()", "[line 2] in script"]);
}

#[test]
fn arithmetic_type_errors() {
    let (message, _) = runtime_error("print 1 + \"x\";");
    assert_eq!(message, "Operands must be two numbers or two strings.");
    let (message, _) = runtime_error("print \"a\" * 2;");
    assert_eq!(message, "Operands must be numbers.");
    let (message, _) = runtime_error("print 1 < \"a\";");
    assert_eq!(message, "Operands must be numbers.");
    let (message, _) = runtime_error("print -true;");
    assert_eq!(message, "Operand must be a number.");
}

#[test]
fn local_slots_are_bounded() {
    // Slot 0 is reserved, leaving 255 declarable locals per function.
    let mut body = String::new();
    for i in 0..255 {
        body.push_str(&format!("var v{i} = {i}; "));
    }
    let mut vm = Vm::new();
    vm.interpret(&format!("fun f() {{ {body} }}")).unwrap();

    body.push_str("var overflow = 0; ");
    let errors = compile_errors(&format!("fun f() {{ {body} }}"));
    assert_eq!(
        errors,
        vec!["[line 1] Error at 'overflow': Too many local variables in function."]
    );
}

#[test]
fn parameters_and_arguments_are_bounded_at_255() {
    let params: Vec<String> = (0..255).map(|i| format!("p{i}")).collect();
    let args: Vec<String> = (0..255).map(|i| i.to_string()).collect();
    let ok = format!(
        "fun wide({}) {{ print p254; }} wide({});",
        params.join(", "),
        args.join(", ")
    );
    let mut vm = Vm::new();
    vm.interpret(&ok).unwrap();
    assert_eq!(vm.take_output(), ["254"]);

    let too_many_args = format!(
        "fun f() {{}} f({});",
        (0..256).map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
    );
    let errors = compile_errors(&too_many_args);
    assert!(errors[0].contains("Can't have more than 255 arguments."));

    let too_many_params = format!(
        "fun f({}) {{}}",
        (0..256).map(|i| format!("p{i}")).collect::<Vec<_>>().join(", ")
    );
    let errors = compile_errors(&too_many_params);
    assert!(errors[0].contains("Can't have more than 255 parameters."));
}

#[test]
fn oversized_jumps_are_compile_errors() {
    let body = "print 0; ".repeat(22_000);
    let errors = compile_errors(&format!("if (true) {{ {body} }}"));
    assert_eq!(errors, vec!["[line 1] Error at '}': Too much code to jump over."]);

    let errors = compile_errors(&format!("while (true) {{ {body} }}"));
    assert_eq!(errors, vec!["[line 1] Error at '}': Loop body too large."]);
}

#[test]
fn constant_pool_is_bounded_per_chunk() {
    let source: String = (0..257).map(|i| format!("{i}; ")).collect();
    let errors = compile_errors(&source);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Too many constants in one chunk."));
}

#[test]
fn the_vm_resets_after_every_runtime_error() {
    let mut vm = Vm::new();
    for _ in 0..3 {
        let err = vm.interpret("print missing;").unwrap_err();
        assert!(matches!(err, Error::Runtime { .. }));
        assert_eq!(vm.stack_depth(), 0);
        assert_eq!(vm.frame_depth(), 0);
    }
    vm.interpret("print \"recovered\";").unwrap();
    assert_eq!(vm.take_output(), ["recovered"]);
}
