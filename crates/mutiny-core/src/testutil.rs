//! Fixture modules for testing the pipeline
//!
//! These builders produce the small LLIR programs the test suites run
//! through the real pipeline: an arithmetic library with mutation targets,
//! test modules for each supported framework, and a side library. They are
//! compiled, instrumented, executed, and mutated exactly like loader-
//! produced modules.

use crate::llir::builder::{arg, func_ref, imm, reg, text};
use crate::llir::{BinOp, CmpOp, Const, FunctionBuilder, Module, ModuleBuilder};
use crate::runner::XUNIT_REGISTER_SYMBOL;

/// Terminate with `ret 0` when `actual == expected`, `ret 1` otherwise
fn ret_zero_if_eq(f: &mut FunctionBuilder, actual: u16, expected: i64) {
    let pass = f.new_block();
    let fail = f.new_block();
    let cond = f.cmp(CmpOp::Eq, reg(actual), imm(expected));
    f.cond_br(reg(cond), pass, fail);
    f.switch_to(pass);
    f.ret(Some(imm(0)));
    f.switch_to(fail);
    f.ret(Some(imm(1)));
}

/// The code under test: arithmetic helpers with one mutation target each
///
/// - `add` / `subtract`: binary-operator targets
/// - `twice_add`: calls `add`, giving depth-2 chains
/// - `count_down`: a loop whose `-` turns into an infinite loop under the
///   math-sub operator
/// - `checked_div`: a guard whose negation divides by zero
#[must_use]
pub fn arithmetic_module() -> Module {
    ModuleBuilder::new("arith")
        .declare("puts", 1)
        .define("add", 2, |f| {
            let r = f.bin(BinOp::Add, arg(0), arg(1));
            f.ret(Some(reg(r)));
        })
        .define("subtract", 2, |f| {
            let r = f.bin(BinOp::Sub, arg(0), arg(1));
            f.ret(Some(reg(r)));
        })
        .define("twice_add", 2, |f| {
            let once = f.call("add", vec![arg(0), arg(1)]);
            let twice = f.call("add", vec![arg(0), arg(1)]);
            let r = f.bin(BinOp::Add, reg(once), reg(twice));
            f.ret(Some(reg(r)));
        })
        .define("count_down", 1, |f| {
            let n = f.slot();
            let head = f.new_block();
            let body = f.new_block();
            let done = f.new_block();

            f.store(n, arg(0));
            f.br(head);

            f.switch_to(head);
            let n_val = f.load(n);
            let cond = f.cmp(CmpOp::Gt, reg(n_val), imm(0));
            f.cond_br(reg(cond), body, done);

            f.switch_to(body);
            let n_val2 = f.load(n);
            let dec = f.bin(BinOp::Sub, reg(n_val2), imm(1));
            f.store(n, reg(dec));
            f.br(head);

            f.switch_to(done);
            f.ret(Some(imm(0)));
        })
        .define("checked_div", 2, |f| {
            let divide = f.new_block();
            let guarded = f.new_block();
            let cond = f.cmp(CmpOp::Ne, arg(1), imm(0));
            f.cond_br(reg(cond), divide, guarded);

            f.switch_to(divide);
            let r = f.bin(BinOp::Div, arg(0), arg(1));
            f.ret(Some(reg(r)));

            f.switch_to(guarded);
            f.call_void("puts", vec![text("division by zero guarded")]);
            f.ret(Some(imm(0)));
        })
        .build()
}

/// Simple-framework tests over [`arithmetic_module`]
#[must_use]
pub fn simple_test_module() -> Module {
    ModuleBuilder::new("simple_tests")
        .declare("add", 2)
        .declare("subtract", 2)
        .declare("twice_add", 2)
        .declare("count_down", 1)
        .declare("checked_div", 2)
        .declare("lib_mul", 2)
        .declare("puts", 1)
        .define("test_addition", 0, |f| {
            f.call_void("puts", vec![text("checking addition")]);
            let r = f.call("add", vec![imm(2), imm(3)]);
            ret_zero_if_eq(f, r, 5);
        })
        .define("test_subtraction", 0, |f| {
            let r = f.call("subtract", vec![imm(5), imm(3)]);
            ret_zero_if_eq(f, r, 2);
        })
        .define("test_countdown", 0, |f| {
            let r = f.call("count_down", vec![imm(5)]);
            f.ret(Some(reg(r)));
        })
        .define("test_division", 0, |f| {
            let r = f.call("checked_div", vec![imm(10), imm(2)]);
            ret_zero_if_eq(f, r, 5);
        })
        .define("test_division_by_zero", 0, |f| {
            let r = f.call("checked_div", vec![imm(10), imm(0)]);
            ret_zero_if_eq(f, r, 0);
        })
        .define("test_nested", 0, |f| {
            let r = f.call("twice_add", vec![imm(1), imm(2)]);
            ret_zero_if_eq(f, r, 6);
        })
        .define("test_lib", 0, |f| {
            let r = f.call("lib_mul", vec![imm(6), imm(7)]);
            ret_zero_if_eq(f, r, 42);
        })
        .define("test_failing", 0, |f| {
            f.ret(Some(imm(1)));
        })
        .build()
}

/// A miniature xUnit framework, itself written in LLIR
///
/// Constructors of suite modules call `xunit_register(name, body)`; the
/// adapter then drives `xunit_init` (which stashes the `--filter=` argv
/// entry), `xunit_instance`, and `xunit_run_all`, which invokes every
/// registered body whose name matches the filter and returns the failure
/// count.
#[must_use]
pub fn xunit_framework_module() -> Module {
    ModuleBuilder::new("xunit_framework")
        .global("xunit_names", Const::List(Vec::new()))
        .global("xunit_bodies", Const::List(Vec::new()))
        .global("xunit_filter", Const::Str(String::new()))
        .declare("list_push", 2)
        .declare("list_len", 1)
        .declare("list_get", 2)
        .declare("strcat", 2)
        .declare("strcmp", 2)
        .define(XUNIT_REGISTER_SYMBOL, 2, |f| {
            let names = f.load_global("xunit_names");
            let names2 = f.call("list_push", vec![reg(names), arg(0)]);
            f.store_global("xunit_names", reg(names2));

            let bodies = f.load_global("xunit_bodies");
            let bodies2 = f.call("list_push", vec![reg(bodies), arg(1)]);
            f.store_global("xunit_bodies", reg(bodies2));
            f.ret(None);
        })
        .define("xunit_init", 2, |f| {
            let filter = f.call("list_get", vec![arg(1), imm(1)]);
            f.store_global("xunit_filter", reg(filter));
            f.ret(None);
        })
        .define("xunit_instance", 0, |f| {
            f.ret(Some(crate::llir::Operand::Const(Const::Ptr(1))));
        })
        .define("xunit_run_all", 1, |f| {
            let failures = f.slot();
            let index = f.slot();

            let head = f.new_block();
            let check = f.new_block();
            let run_one = f.new_block();
            let next = f.new_block();
            let done = f.new_block();

            f.store(failures, imm(0));
            f.store(index, imm(0));
            f.br(head);

            f.switch_to(head);
            let i = f.load(index);
            let names = f.load_global("xunit_names");
            let len = f.call("list_len", vec![reg(names)]);
            let more = f.cmp(CmpOp::Lt, reg(i), reg(len));
            f.cond_br(reg(more), check, done);

            f.switch_to(check);
            let i2 = f.load(index);
            let names2 = f.load_global("xunit_names");
            let name = f.call("list_get", vec![reg(names2), reg(i2)]);
            let expected = f.call("strcat", vec![text("--filter="), reg(name)]);
            let filter = f.load_global("xunit_filter");
            let matches = f.call("strcmp", vec![reg(filter), reg(expected)]);
            let selected = f.cmp(CmpOp::Eq, reg(matches), imm(0));
            f.cond_br(reg(selected), run_one, next);

            f.switch_to(run_one);
            let i3 = f.load(index);
            let bodies = f.load_global("xunit_bodies");
            let body = f.call("list_get", vec![reg(bodies), reg(i3)]);
            let verdict = f.call_indirect(reg(body), vec![]);
            let tally = f.load(failures);
            let updated = f.bin(BinOp::Add, reg(tally), reg(verdict));
            f.store(failures, reg(updated));
            f.br(next);

            f.switch_to(next);
            let i4 = f.load(index);
            let bumped = f.bin(BinOp::Add, reg(i4), imm(1));
            f.store(index, reg(bumped));
            f.br(head);

            f.switch_to(done);
            let result = f.load(failures);
            f.ret(Some(reg(result)));
        })
        .build()
}

/// An xUnit suite registering two tests over [`arithmetic_module`]
#[must_use]
pub fn xunit_suite_module() -> Module {
    ModuleBuilder::new("xunit_suite")
        .ctor("register_math_suite")
        .declare(XUNIT_REGISTER_SYMBOL, 2)
        .declare("add", 2)
        .declare("subtract", 2)
        .define("register_math_suite", 0, |f| {
            f.call_void(
                XUNIT_REGISTER_SYMBOL,
                vec![text("Math.addition"), func_ref("math_addition_body")],
            );
            f.call_void(
                XUNIT_REGISTER_SYMBOL,
                vec![text("Math.subtraction"), func_ref("math_subtraction_body")],
            );
            f.ret(None);
        })
        .define("math_addition_body", 0, |f| {
            let r = f.call("add", vec![imm(2), imm(3)]);
            ret_zero_if_eq(f, r, 5);
        })
        .define("math_subtraction_body", 0, |f| {
            let r = f.call("subtract", vec![imm(5), imm(3)]);
            ret_zero_if_eq(f, r, 2);
        })
        .build()
}

/// A custom-framework program: constructor-initialised state plus a
/// `main(argc, argv)` that delegates to a testee
#[must_use]
pub fn custom_main_module() -> Module {
    ModuleBuilder::new("custom_prog")
        .global("custom_ready", Const::I64(0))
        .ctor("custom_setup")
        .define("custom_setup", 0, |f| {
            f.store_global("custom_ready", imm(1));
            f.ret(None);
        })
        .define("validate", 1, |f| {
            let ok = f.new_block();
            let bad = f.new_block();
            let cond = f.cmp(CmpOp::Eq, arg(0), imm(2));
            f.cond_br(reg(cond), ok, bad);
            f.switch_to(ok);
            f.ret(Some(imm(0)));
            f.switch_to(bad);
            f.ret(Some(imm(1)));
        })
        .define("main", 2, |f| {
            let run = f.new_block();
            let not_ready = f.new_block();
            let ready = f.load_global("custom_ready");
            let cond = f.cmp(CmpOp::Eq, reg(ready), imm(1));
            f.cond_br(reg(cond), run, not_ready);

            f.switch_to(run);
            let r = f.call("validate", vec![arg(0)]);
            f.ret(Some(reg(r)));

            f.switch_to(not_ready);
            f.ret(Some(imm(1)));
        })
        .build()
}

/// A side library loaded permanently, never instrumented
#[must_use]
pub fn mathlib_module() -> Module {
    ModuleBuilder::new("mathlib")
        .define("lib_mul", 2, |f| {
            let r = f.bin(BinOp::Mul, arg(0), arg(1));
            f.ret(Some(reg(r)));
        })
        .build()
}
