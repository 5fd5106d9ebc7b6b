//! Snippet tests for the whole pipeline: each one runs a source
//! string end-to-end through the compiler and the VM and checks the
//! decoded result.

use siskin::vm::Data;
use siskin::{run, Error, Source};

fn eval(source: &str) -> Data {
    match run(Source::source(source)) {
        Ok(value) => value,
        Err(error) => panic!("snippet failed:\n{}\n{}", source, error),
    }
}

fn eval_err(source: &str) -> Error {
    match run(Source::source(source)) {
        Ok(value) => panic!("snippet should fail:\n{}\ngot {}", source, value),
        Err(error) => error,
    }
}

fn number(n: i32) -> Data {
    Data::Number(n)
}

fn symbol(name: &str) -> Data {
    Data::Symbol(name.to_string())
}

#[test]
fn number_literals() {
    assert_eq!(eval("4815"), number(4815));
    assert_eq!(eval("-23"), number(-23));
}

#[test]
fn symbol_literals() {
    assert_eq!(eval(":spot"), symbol("spot"));
}

#[test]
fn compound_symbol_literals() {
    assert_eq!(
        eval(":sym 2 3"),
        Data::Compound("sym".to_string(), vec![number(2), number(3)]),
    );
}

#[test]
fn bindings_evaluate_to_their_values() {
    assert_eq!(eval("val a = 4\nval b = 7\nadd a b"), number(11));
}

#[test]
fn arithmetic_agrees_with_the_integers() {
    assert_eq!(eval("sub (mul 6 7) (div 10 2)"), number(37));
    assert_eq!(eval("add -5 3"), number(-2));
}

#[test]
fn comparisons_produce_booleans() {
    assert_eq!(eval("lt 1 2"), symbol("true"));
    assert_eq!(eval("gt 1 2"), symbol("false"));
    assert_eq!(eval("eq :spot :spot"), symbol("true"));
    assert_eq!(eval("eq :a :b"), symbol("false"));
    assert_eq!(eval("and (lt 1 2) (gt 1 2)"), symbol("false"));
    assert_eq!(eval("or (lt 1 2) (gt 1 2)"), symbol("true"));
    assert_eq!(eval("not false"), symbol("true"));
}

#[test]
fn closures_capture_their_environment() {
    assert_eq!(
        eval("val make-adder (x) = { val (y) = add x y }\nval adder = make-adder 22\nadder 55"),
        number(77),
    );
}

#[test]
fn captured_parameters_nest() {
    assert_eq!(
        eval(
            "val make-sub (x y z w) = { val (a) = sub (sub z y) (sub x a) }\n\
             val test = make-sub 33 55 99 160\n\
             test 24"
        ),
        number(35),
    );
}

#[test]
fn three_nested_lambdas_capture_lexically() {
    // constants materialize at capture time, parameters ride closures
    assert_eq!(
        eval(
            "val a = 1000\n\
             val f (x) = { val (y) = { val (z) = add (add x y) (add z a) } }\n\
             val g = f 800\n\
             val h = g 50\n\
             h 12"
        ),
        number(1862),
    );
}

#[test]
fn constants_materialize_inside_lambdas() {
    assert_eq!(eval("val k = 5\nval f (x) = add x k\nf 1"), number(6));
}

#[test]
fn partial_application() {
    assert_eq!(
        eval("val add2 (a b) = add a b\nval inc = add2 1\ninc 41"),
        number(42),
    );
}

#[test]
fn over_saturation_applies_the_result() {
    assert_eq!(
        eval("val make-adder (x) = { val (y) = add x y }\nmake-adder 20 22"),
        number(42),
    );
}

#[test]
fn matches_pick_the_first_matching_branch() {
    assert_eq!(eval("match 5 { _ -> 1, 5 -> 2 }"), number(1));
    assert_eq!(eval("match 5 { 4 -> 1, 5 -> 2 }"), number(2));
}

#[test]
fn match_captures_bind_sub_values() {
    assert_eq!(eval("match :pair 3 9 { :pair a b -> mul a b }"), number(27));
}

#[test]
fn nested_compound_patterns() {
    assert_eq!(
        eval("match :cons 1 (:cons 2 :nil) { :cons h (:cons t _) -> add h t }"),
        number(3),
    );
}

#[test]
fn match_branches_use_enclosing_bindings() {
    assert_eq!(
        eval("val f (x) = match x { 0 -> x, n -> add n x }\nf 21"),
        number(42),
    );
}

#[test]
fn tail_recursion_runs_in_constant_stack() {
    assert_eq!(
        eval("val count (n) = match n { 0 -> :done, _ -> count (sub n 1) }\ncount 100000"),
        symbol("done"),
    );
}

#[test]
fn non_tail_recursion() {
    assert_eq!(
        eval("val fact (n) = match n { 0 -> 1, _ -> mul n (fact (sub n 1)) }\nfact 10"),
        number(3628800),
    );
}

#[test]
fn deep_non_tail_recursion_traps() {
    let error = eval_err(
        "val f (n) = match n { 0 -> 0, _ -> add 1 (f (sub n 1)) }\nf 100000",
    );
    match error {
        Error::Run(trace) => assert_eq!(trace.kind, "StackOverflow"),
        other => panic!("expected a trap, got {:?}", other),
    }
}

#[test]
fn dynamic_compound_symbols_patch_their_slots() {
    assert_eq!(
        eval("val x = add 1 2\n:sym x 5"),
        Data::Compound("sym".to_string(), vec![number(3), number(5)]),
    );
}

#[test]
fn strings() {
    assert_eq!(eval("\"hello\""), Data::Str("hello".to_string()));
    assert_eq!(eval("val s = \"hi there\"\ns"), Data::Str("hi there".to_string()));
}

#[test]
fn string_equality_is_by_content() {
    // identical literals dedupe to the same cell
    assert_eq!(eval("eq \"abc\" \"abc\""), symbol("true"));
    assert_eq!(eval("eq \"abc\" \"abd\""), symbol("false"));
}

#[test]
fn modules_look_up_members() {
    assert_eq!(
        eval("val m = module { val a = 1\nval b = add 20 22 }\nm.b"),
        number(42),
    );
}

#[test]
fn module_fields_see_earlier_fields() {
    assert_eq!(
        eval("val m = module { val a = 6\nval b = mul a 7 }\nm.b"),
        number(42),
    );
}

#[test]
fn missing_members_trap() {
    let error = eval_err("val m = module { val a = 1 }\nm.b");
    match error {
        Error::Run(trace) => assert_eq!(trace.kind, "LookupError"),
        other => panic!("expected a trap, got {:?}", other),
    }
}

#[test]
fn division_by_zero_traps() {
    let error = eval_err("div 1 0");
    match error {
        Error::Run(trace) => assert_eq!(trace.kind, "DivideByZero"),
        other => panic!("expected a trap, got {:?}", other),
    }
}

#[test]
fn unmatched_subjects_trap() {
    let error = eval_err("match 3 { 0 -> 0, 1 -> 1 }");
    match error {
        Error::Run(trace) => assert_eq!(trace.kind, "MatchError"),
        other => panic!("expected a trap, got {:?}", other),
    }
}

#[test]
fn unknown_variables_fail_to_compile() {
    assert!(matches!(eval_err("frobnicate 1"), Error::Compile(_)));
}

#[test]
fn functions_are_first_class() {
    assert_eq!(
        eval(
            "val twice (f x) = f (f x)\n\
             val inc (n) = add n 1\n\
             twice inc 40"
        ),
        number(42),
    );
}

#[test]
fn recursive_helpers_are_callable_from_sibling_bindings() {
    // the helper is defined in one binding and called from another,
    // so the caller has to capture the helper's closure
    assert_eq!(
        eval(
            "val fact (n) = match n { 0 -> 1, _ -> mul n (fact (sub n 1)) }\n\
             val apply-fact (m) = fact m\n\
             apply-fact 5"
        ),
        number(120),
    );
}

#[test]
fn recursive_helpers_ride_captures_into_nested_lambdas() {
    assert_eq!(
        eval(
            "val double (n) = match n { 0 -> 0, _ -> add 2 (double (sub n 1)) }\n\
             val outer (x) = { val (y) = double (add x y) }\n\
             outer 3 4"
        ),
        number(14),
    );
}

#[test]
fn recursion_through_a_self_reference() {
    assert_eq!(
        eval(
            "val fib (n) = match n {\n\
               0 -> 0\n\
               1 -> 1\n\
               _ -> add (fib (sub n 1)) (fib (sub n 2))\n\
             }\n\
             fib 15"
        ),
        number(610),
    );
}
