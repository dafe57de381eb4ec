use pretty_assertions::assert_eq;
use rox::Vm;

#[test]
fn interning_collapses_equal_content_to_one_object() {
    let mut vm = Vm::new();
    vm.interpret(r#"var a = "he" + "llo"; print a == "hello";"#)
        .unwrap();
    assert_eq!(vm.take_output(), ["true"]);

    // Re-building the same string must not add a second copy. (Reuses the
    // existing global so no new identifier is interned either.)
    let before = vm.string_count();
    vm.interpret(r#"a = "he" + "llo";"#).unwrap();
    assert_eq!(vm.string_count(), before);
}

#[test]
fn collection_reclaims_unreachable_objects() {
    let mut vm = Vm::new();
    vm.interpret(
        r#"
var keep = "";
for (var i = 0; i < 50; i = i + 1) {
    keep = keep + "x";
}
"#,
    )
    .unwrap();

    // Every intermediate concatenation is now garbage.
    let before = vm.object_count();
    vm.collect_garbage();
    let after = vm.object_count();
    assert!(after < before, "collection freed nothing ({before} -> {after})");
}

#[test]
fn double_collection_is_a_fixed_point() {
    let mut vm = Vm::new();
    vm.interpret(
        r#"
fun makeAdder(n) {
    fun add(m) { return n + m; }
    return add;
}
var add5 = makeAdder(5);
var junk = "a" + "b" + "c";
junk = nil;
"#,
    )
    .unwrap();

    vm.collect_garbage();
    let objects = vm.object_count();
    let strings = vm.string_count();
    vm.collect_garbage();
    assert_eq!(vm.object_count(), objects);
    assert_eq!(vm.string_count(), strings);
}

#[test]
fn reachable_data_survives_collection() {
    let mut vm = Vm::new();
    vm.interpret(
        r#"
fun makeAdder(n) {
    fun add(m) { return n + m; }
    return add;
}
var add5 = makeAdder(5);
class Box {}
var box = Box();
box.label = "keep";
"#,
    )
    .unwrap();

    vm.collect_garbage();
    vm.collect_garbage();

    vm.interpret("print add5(4); print box.label;").unwrap();
    assert_eq!(vm.take_output(), ["9", "keep"]);
}

#[test]
fn dead_strings_leave_the_interner() {
    let mut vm = Vm::new();
    vm.interpret(r#"{ var temp = "only" + " used" + " once"; }"#)
        .unwrap();

    let before = vm.string_count();
    vm.collect_garbage();
    assert!(
        vm.string_count() < before,
        "weak string sweep freed nothing ({before} strings)"
    );
}

#[test]
fn collection_during_heavy_churn_keeps_programs_correct() {
    let mut vm = Vm::new();
    // Each build() doubles a string twelve times (~16 KB of transient
    // allocation), and the loop repeats it enough to cross the collection
    // threshold many times mid-run. Interning guarantees the final string
    // from every build is the very same object.
    vm.interpret(
        r#"
fun build() {
    var s = "ab";
    for (var i = 0; i < 12; i = i + 1) {
        s = s + s;
    }
    return s;
}
var first = build();
for (var round = 0; round < 100; round = round + 1) {
    build();
}
print first == build();
"#,
    )
    .unwrap();
    assert_eq!(vm.take_output(), ["true"]);
    assert_eq!(vm.stack_depth(), 0);
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn machine_state_is_idle_between_runs() {
    let mut vm = Vm::new();
    vm.interpret("var a = 1;").unwrap();
    assert_eq!(vm.stack_depth(), 0);
    assert_eq!(vm.frame_depth(), 0);
    vm.interpret("fun f() { return a; } print f();").unwrap();
    assert_eq!(vm.take_output(), ["1"]);
    assert_eq!(vm.stack_depth(), 0);
    assert_eq!(vm.frame_depth(), 0);
}
