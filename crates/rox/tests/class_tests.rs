use pretty_assertions::assert_eq;
use rox::{Error, Vm};

fn run(source: &str) -> Vec<String> {
    let mut vm = Vm::new();
    vm.interpret(source).expect("program failed");
    assert_eq!(vm.stack_depth(), 0);
    assert_eq!(vm.frame_depth(), 0);
    vm.take_output()
}

fn runtime_message(source: &str) -> String {
    let mut vm = Vm::new();
    match vm.interpret(source) {
        Err(Error::Runtime { message, .. }) => message,
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn classes_and_instances_print_their_names() {
    assert_eq!(run("class Widget {} print Widget;"), ["<class: Widget>"]);
    assert_eq!(
        run("class Widget {} print Widget();"),
        ["<instance of class: Widget>"]
    );
}

#[test]
fn fields_are_set_and_read_per_instance() {
    let source = r#"
class Box {}
var a = Box();
var b = Box();
a.label = "first";
b.label = "second";
print a.label;
print b.label;
"#;
    assert_eq!(run(source), ["first", "second"]);
}

#[test]
fn field_assignment_is_an_expression() {
    let source = r#"
class Box {}
var box = Box();
print box.size = 3;
print box.size;
"#;
    assert_eq!(run(source), ["3", "3"]);
}

#[test]
fn methods_bind_this_to_the_receiver() {
    let source = r#"
class Greeter {
    greet() {
        print this.name;
    }
}
var g = Greeter();
g.name = "x";
g.greet();
"#;
    assert_eq!(run(source), ["x"]);
}

#[test]
fn methods_can_mutate_fields_through_this() {
    let source = r#"
class Counter {
    bump() {
        this.n = this.n + 1;
        print this.n;
    }
}
var c = Counter();
c.n = 0;
c.bump();
c.bump();
"#;
    assert_eq!(run(source), ["1", "2"]);
}

#[test]
fn methods_return_values() {
    let source = r#"
class Math {
    square(n) { return n * n; }
}
print Math().square(5);
"#;
    assert_eq!(run(source), ["25"]);
}

#[test]
fn extracted_methods_keep_their_receiver() {
    let source = r#"
class Greeter {
    greet() { print this.name; }
}
var g = Greeter();
g.name = "kept";
var m = g.greet;
m();
"#;
    assert_eq!(run(source), ["kept"]);
}

#[test]
fn bound_methods_print_like_functions() {
    let source = r#"
class Greeter {
    greet() {}
}
var g = Greeter();
print g.greet;
"#;
    assert_eq!(run(source), ["<fn greet>"]);
}

#[test]
fn fields_shadow_methods_on_lookup() {
    let source = r#"
class Thing {
    kind() { return "method"; }
}
fun label() { return "field"; }
var t = Thing();
print t.kind();
t.kind = label;
print t.kind();
"#;
    assert_eq!(run(source), ["method", "field"]);
}

#[test]
fn undefined_property_reads_fail() {
    let message = runtime_message("class Box {} Box().missing;");
    assert_eq!(message, "Undefined property 'missing'.");
}

#[test]
fn only_instances_have_properties() {
    assert_eq!(
        runtime_message("var x = 1; x.y;"),
        "Only instances have properties."
    );
    assert_eq!(
        runtime_message("var x = 1; x.y = 2;"),
        "Only instances have fields."
    );
    assert_eq!(
        runtime_message("\"text\".length;"),
        "Only instances have properties."
    );
}

#[test]
fn classes_take_no_construction_arguments() {
    assert_eq!(
        runtime_message("class Box {} Box(1);"),
        "Expected 0 arguments but got 1"
    );
}

#[test]
fn this_outside_a_class_is_a_compile_error() {
    let mut vm = Vm::new();
    match vm.interpret("print this;") {
        Err(Error::Compile(errors)) => assert_eq!(
            errors.0,
            vec!["[line 1] Error at 'this': Can't use 'this' outside of a class."]
        ),
        other => panic!("expected compile error, got {other:?}"),
    }
    match vm.interpret("fun f() { return this; }") {
        Err(Error::Compile(errors)) => assert_eq!(
            errors.0,
            vec!["[line 1] Error at 'this': Can't use 'this' outside of a class."]
        ),
        other => panic!("expected compile error, got {other:?}"),
    }
}

#[test]
fn methods_close_over_enclosing_locals() {
    let source = r#"
var describe;
{
    var suffix = "!";
    class Loud {
        say() { print this.word + suffix; }
    }
    var l = Loud();
    l.word = "hey";
    describe = l.say;
}
describe();
"#;
    assert_eq!(run(source), ["hey!"]);
}
