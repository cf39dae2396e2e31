//! Embedded numeric-expression VM for preset code sections.
//!
//! Presets carry small programs (per-frame, per-vertex, custom wave/shape
//! init and point code) written as `;`-separated assignments over named
//! double-precision variables. Each code section owns an independent
//! [`Context`] so variable names cannot collide across sections. Variables
//! are registered (or auto-created on first mention) once at compile time and
//! addressed by slot index afterwards; executing a program never performs a
//! name lookup.
//!
//! Compilation failures are ordinary errors the caller reports and survives;
//! runtime domain errors (division by zero, log of a negative) evaluate to
//! zero rather than failing, matching what preset authors expect.

use std::collections::HashMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

mod parse;

pub use parse::ExprError;

/// Handle to one registered variable slot. Valid only for the context that
/// issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Var(pub(crate) usize);

/// One VM context: a flat bank of f64 slots plus the name table used at
/// compile time.
pub struct Context {
    slots: Vec<f64>,
    names: HashMap<String, usize>,
    rng: SmallRng,
}

impl Context {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Deterministic construction for tests and reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            slots: Vec::new(),
            names: HashMap::new(),
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Registers `name`, returning its slot. Registering the same name twice
    /// returns the same slot.
    pub fn register(&mut self, name: &str) -> Var {
        if let Some(&idx) = self.names.get(name) {
            return Var(idx);
        }
        let idx = self.slots.len();
        self.slots.push(0.0);
        self.names.insert(name.to_ascii_lowercase(), idx);
        Var(idx)
    }

    pub fn lookup(&self, name: &str) -> Option<Var> {
        self.names.get(&name.to_ascii_lowercase()).copied().map(Var)
    }

    pub fn get(&self, var: Var) -> f64 {
        self.slots[var.0]
    }

    pub fn set(&mut self, var: Var, value: f64) {
        self.slots[var.0] = value;
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Func1 {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sqrt,
    Exp,
    Log,
    Log10,
    Abs,
    Sign,
    Int,
    Frac,
    Rand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Func2 {
    Atan2,
    Pow,
    Min,
    Max,
    Sigmoid,
    Band,
    Bor,
    Equal,
    Above,
    Below,
}

/// Flat postfix opcode stream. Programs are compiled once per preset load and
/// executed every frame, so execution walks a `Vec` with an explicit value
/// stack instead of re-walking a tree.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Op {
    Push(f64),
    Load(usize),
    Store(usize),
    Pop,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Call1(Func1),
    Call2(Func2),
    /// `if(cond, a, b)`: both branches already evaluated, selects one.
    Select,
}

/// A compiled code section. Cheap to clone; holds no context state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    ops: Vec<Op>,
    max_stack: usize,
}

/// Replaces NaN and infinities with zero so one bad expression cannot poison
/// every downstream frame.
fn scrub(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

impl Program {
    /// Compiles `source` against `ctx`, auto-registering any variable the
    /// source mentions that the caller has not registered yet.
    pub fn compile(ctx: &mut Context, source: &str) -> Result<Program, ExprError> {
        parse::compile(ctx, source)
    }

    /// A program that does nothing, for sections a preset leaves empty.
    pub fn empty() -> Program {
        Program::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Runs the program against the context's variable slots.
    pub fn execute(&self, ctx: &mut Context) {
        let mut stack: Vec<f64> = Vec::with_capacity(self.max_stack);
        for op in &self.ops {
            match op {
                Op::Push(v) => stack.push(*v),
                Op::Load(slot) => stack.push(ctx.slots[*slot]),
                Op::Store(slot) => {
                    let v = scrub(stack.pop().unwrap_or(0.0));
                    ctx.slots[*slot] = v;
                    stack.push(v);
                }
                Op::Pop => {
                    stack.pop();
                }
                Op::Add => binary(&mut stack, |a, b| a + b),
                Op::Sub => binary(&mut stack, |a, b| a - b),
                Op::Mul => binary(&mut stack, |a, b| a * b),
                Op::Div => binary(&mut stack, |a, b| if b == 0.0 { 0.0 } else { a / b }),
                Op::Mod => binary(&mut stack, |a, b| {
                    if b == 0.0 {
                        0.0
                    } else {
                        (a as i64 % b as i64) as f64
                    }
                }),
                Op::Neg => {
                    let v = stack.pop().unwrap_or(0.0);
                    stack.push(-v);
                }
                Op::Call1(f) => {
                    let x = stack.pop().unwrap_or(0.0);
                    let v = match f {
                        Func1::Sin => x.sin(),
                        Func1::Cos => x.cos(),
                        Func1::Tan => x.tan(),
                        Func1::Asin => x.asin(),
                        Func1::Acos => x.acos(),
                        Func1::Atan => x.atan(),
                        Func1::Sqrt => x.abs().sqrt(),
                        Func1::Exp => x.exp(),
                        Func1::Log => x.ln(),
                        Func1::Log10 => x.log10(),
                        Func1::Abs => x.abs(),
                        Func1::Sign => {
                            if x > 0.0 {
                                1.0
                            } else if x < 0.0 {
                                -1.0
                            } else {
                                0.0
                            }
                        }
                        Func1::Int => x.trunc(),
                        Func1::Frac => x.fract(),
                        Func1::Rand => {
                            let n = x.trunc();
                            if n >= 1.0 {
                                ctx.rng.gen_range(0.0..n).trunc()
                            } else {
                                0.0
                            }
                        }
                    };
                    stack.push(scrub(v));
                }
                Op::Call2(f) => {
                    let b = stack.pop().unwrap_or(0.0);
                    let a = stack.pop().unwrap_or(0.0);
                    let v = match f {
                        Func2::Atan2 => a.atan2(b),
                        Func2::Pow => a.powf(b),
                        Func2::Min => a.min(b),
                        Func2::Max => a.max(b),
                        Func2::Sigmoid => {
                            let t = 1.0 + (-a * b).exp();
                            if t.abs() > 1e-15 {
                                1.0 / t
                            } else {
                                0.0
                            }
                        }
                        Func2::Band => bool_val(a != 0.0 && b != 0.0),
                        Func2::Bor => bool_val(a != 0.0 || b != 0.0),
                        Func2::Equal => bool_val(a == b),
                        Func2::Above => bool_val(a > b),
                        Func2::Below => bool_val(a < b),
                    };
                    stack.push(scrub(v));
                }
                Op::Select => {
                    let b = stack.pop().unwrap_or(0.0);
                    let a = stack.pop().unwrap_or(0.0);
                    let cond = stack.pop().unwrap_or(0.0);
                    stack.push(if cond != 0.0 { a } else { b });
                }
            }
        }
    }

    pub(crate) fn from_ops(ops: Vec<Op>, max_stack: usize) -> Program {
        Program { ops, max_stack }
    }
}

fn bool_val(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn binary(stack: &mut Vec<f64>, f: impl FnOnce(f64, f64) -> f64) {
    let b = stack.pop().unwrap_or(0.0);
    let a = stack.pop().unwrap_or(0.0);
    stack.push(scrub(f(a, b)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(ctx: &mut Context, src: &str) {
        let program = Program::compile(ctx, src).expect("compile");
        program.execute(ctx);
    }

    #[test]
    fn assignment_writes_slot() {
        let mut ctx = Context::with_seed(1);
        let zoom = ctx.register("zoom");
        run(&mut ctx, "zoom = 1.5;");
        assert_eq!(ctx.get(zoom), 1.5);
    }

    #[test]
    fn arithmetic_precedence() {
        let mut ctx = Context::with_seed(1);
        let x = ctx.register("x");
        run(&mut ctx, "x = 2 + 3 * 4 - 6 / 3;");
        assert_eq!(ctx.get(x), 12.0);
    }

    #[test]
    fn parentheses_override_precedence() {
        let mut ctx = Context::with_seed(1);
        let x = ctx.register("x");
        run(&mut ctx, "x = (2 + 3) * 4;");
        assert_eq!(ctx.get(x), 20.0);
    }

    #[test]
    fn division_by_zero_is_zero() {
        let mut ctx = Context::with_seed(1);
        let x = ctx.register("x");
        run(&mut ctx, "x = 5 / 0;");
        assert_eq!(ctx.get(x), 0.0);
        run(&mut ctx, "x = 7 % 0;");
        assert_eq!(ctx.get(x), 0.0);
    }

    #[test]
    fn unknown_variables_auto_register() {
        let mut ctx = Context::with_seed(1);
        run(&mut ctx, "my_temp = 3; out = my_temp * 2;");
        let out = ctx.lookup("out").expect("slot exists");
        assert_eq!(ctx.get(out), 6.0);
    }

    #[test]
    fn names_are_case_insensitive() {
        let mut ctx = Context::with_seed(1);
        let zoom = ctx.register("Zoom");
        run(&mut ctx, "ZOOM = 2;");
        assert_eq!(ctx.get(zoom), 2.0);
    }

    #[test]
    fn slots_persist_between_executions() {
        let mut ctx = Context::with_seed(1);
        let n = ctx.register("n");
        let program = Program::compile(&mut ctx, "n = n + 1;").expect("compile");
        for _ in 0..5 {
            program.execute(&mut ctx);
        }
        assert_eq!(ctx.get(n), 5.0);
    }

    #[test]
    fn builtin_functions() {
        let mut ctx = Context::with_seed(1);
        let x = ctx.register("x");
        run(&mut ctx, "x = max(min(9, 4), 2);");
        assert_eq!(ctx.get(x), 4.0);
        run(&mut ctx, "x = if(above(3, 2), 10, 20);");
        assert_eq!(ctx.get(x), 10.0);
        run(&mut ctx, "x = int(3.7) + frac(0.25);");
        assert_eq!(ctx.get(x), 3.25);
        run(&mut ctx, "x = atan2(0, 1);");
        assert_eq!(ctx.get(x), 0.0);
    }

    #[test]
    fn sqrt_of_negative_uses_magnitude() {
        let mut ctx = Context::with_seed(1);
        let x = ctx.register("x");
        run(&mut ctx, "x = sqrt(0-4);");
        assert_eq!(ctx.get(x), 2.0);
    }

    #[test]
    fn log_of_negative_scrubs_to_zero() {
        let mut ctx = Context::with_seed(1);
        let x = ctx.register("x");
        run(&mut ctx, "x = log(0-1);");
        assert_eq!(ctx.get(x), 0.0);
    }

    #[test]
    fn rand_stays_in_range() {
        let mut ctx = Context::with_seed(7);
        let x = ctx.register("x");
        let program = Program::compile(&mut ctx, "x = rand(100);").expect("compile");
        for _ in 0..200 {
            program.execute(&mut ctx);
            let v = ctx.get(x);
            assert!((0.0..100.0).contains(&v));
            assert_eq!(v, v.trunc());
        }
    }

    #[test]
    fn comparison_operators() {
        let mut ctx = Context::with_seed(1);
        let x = ctx.register("x");
        run(&mut ctx, "x = (3 > 2) + (2 >= 2) + (1 < 0) + (4 <= 4) + (5 == 5) + (5 != 5);");
        assert_eq!(ctx.get(x), 4.0);
    }

    #[test]
    fn comments_are_ignored() {
        let mut ctx = Context::with_seed(1);
        let x = ctx.register("x");
        run(&mut ctx, "// setup\nx = 1; // trailing\nx = x + 1;");
        assert_eq!(ctx.get(x), 2.0);
    }

    #[test]
    fn empty_program_is_noop() {
        let mut ctx = Context::with_seed(1);
        let x = ctx.register("x");
        ctx.set(x, 42.0);
        let program = Program::compile(&mut ctx, "  \n ").expect("compile");
        assert!(program.is_empty());
        program.execute(&mut ctx);
        assert_eq!(ctx.get(x), 42.0);
    }

    #[test]
    fn compile_error_reports_position() {
        let mut ctx = Context::with_seed(1);
        let err = Program::compile(&mut ctx, "x = 1 + ;").unwrap_err();
        match err {
            ExprError::UnexpectedToken { .. } => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_function_is_an_error() {
        let mut ctx = Context::with_seed(1);
        let err = Program::compile(&mut ctx, "x = warble(1);").unwrap_err();
        match err {
            ExprError::UnknownFunction { name } => assert_eq!(name, "warble"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn contexts_are_independent() {
        let mut a = Context::with_seed(1);
        let mut b = Context::with_seed(1);
        run(&mut a, "q1 = 5;");
        run(&mut b, "q1 = 9;");
        assert_eq!(a.get(a.lookup("q1").unwrap()), 5.0);
        assert_eq!(b.get(b.lookup("q1").unwrap()), 9.0);
    }
}
