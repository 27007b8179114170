use crate::expr::{BinaryOp, Expr, Func, UnaryOp, Var};
use num_complex::Complex64;

/// Values a formula can see while iterating one point.
#[derive(Clone, Copy, Debug)]
pub struct Env<'a> {
    pub z: Complex64,
    pub c: Complex64,
    pub power: f64,
    pub mouse: Complex64,
    pub bailout: f64,
    pub slots: &'a [f64],
}

type Node = Box<dyn Fn(&Env<'_>) -> Complex64 + Send + Sync>;

/// An expression lowered to a tree of closures; evaluating it never re-reads the source.
pub struct Program {
    node: Node,
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Program(..)")
    }
}

impl Program {
    pub fn compile(expr: &Expr) -> Self {
        Self { node: lower(expr) }
    }

    #[inline]
    pub fn eval(&self, env: &Env<'_>) -> Complex64 {
        (self.node)(env)
    }

    /// Boolean view used for bailout conditions: any non-zero real part is true.
    #[inline]
    pub fn truthy(&self, env: &Env<'_>) -> bool {
        truth(self.eval(env))
    }
}

#[inline]
fn truth(v: Complex64) -> bool {
    v.re != 0.0 && !v.re.is_nan()
}

#[inline]
fn boolean(b: bool) -> Complex64 {
    Complex64::new(if b { 1.0 } else { 0.0 }, 0.0)
}

fn node(f: impl Fn(&Env<'_>) -> Complex64 + Send + Sync + 'static) -> Node {
    Box::new(f)
}

fn lower(expr: &Expr) -> Node {
    match expr {
        Expr::Num(v) => {
            let v = *v;
            node(move |_| v)
        }
        Expr::Var(var) => match var {
            Var::Z => node(|env| env.z),
            Var::C => node(|env| env.c),
            Var::Power => node(|env| Complex64::new(env.power, 0.0)),
            Var::Mouse => node(|env| env.mouse),
            Var::Bailout => node(|env| Complex64::new(env.bailout, 0.0)),
        },
        Expr::Slot(idx) => {
            let idx = *idx;
            node(move |env| Complex64::new(env.slots.get(idx).copied().unwrap_or(0.0), 0.0))
        }
        Expr::Unary(op, inner) => {
            let inner = lower(inner);
            match op {
                UnaryOp::Neg => node(move |env| -inner(env)),
                UnaryOp::Not => node(move |env| boolean(!truth(inner(env)))),
            }
        }
        Expr::Binary(BinaryOp::Pow, base, exp) => lower_pow(base, exp),
        Expr::Binary(op, a, b) => {
            if let (Expr::Num(x), Expr::Num(y)) = (a.as_ref(), b.as_ref()) {
                let folded = binary(*op, *x, *y);
                return node(move |_| folded);
            }
            let a = lower(a);
            let b = lower(b);
            match op {
                BinaryOp::Add => node(move |env| a(env) + b(env)),
                BinaryOp::Sub => node(move |env| a(env) - b(env)),
                BinaryOp::Mul => node(move |env| a(env) * b(env)),
                BinaryOp::Div => node(move |env| a(env) / b(env)),
                // Short-circuit like the shader's && / ||.
                BinaryOp::And => node(move |env| boolean(truth(a(env)) && truth(b(env)))),
                BinaryOp::Or => node(move |env| boolean(truth(a(env)) || truth(b(env)))),
                op => {
                    let op = *op;
                    node(move |env| binary(op, a(env), b(env)))
                }
            }
        }
        Expr::Call(Func::Pow, args) => lower_pow(&args[0], &args[1]),
        Expr::Call(func, args) => {
            let func = *func;
            let arg = lower(&args[0]);
            node(move |env| apply_unary(func, arg(env)))
        }
    }
}

fn apply_unary(func: Func, v: Complex64) -> Complex64 {
    match func {
        Func::Sqr => v * v,
        Func::Sqrt => v.sqrt(),
        Func::Exp => v.exp(),
        Func::Log => v.ln(),
        Func::Sin => v.sin(),
        Func::Cos => v.cos(),
        Func::Tan => v.tan(),
        Func::Sinh => v.sinh(),
        Func::Cosh => v.cosh(),
        Func::Conj => v.conj(),
        Func::Abs => Complex64::new(v.re.abs(), v.im.abs()),
        Func::Re => Complex64::new(v.re, 0.0),
        Func::Im => Complex64::new(v.im, 0.0),
        Func::Length => Complex64::new(v.norm(), 0.0),
        Func::Norm => Complex64::new(v.norm_sqr(), 0.0),
        Func::Arg => Complex64::new(v.arg(), 0.0),
        // Two-argument; lowered through lower_pow.
        Func::Pow => v,
    }
}

fn lower_pow(base: &Expr, exp: &Expr) -> Node {
    let b = lower(base);
    match exp {
        Expr::Num(e) if e.im == 0.0 && e.re.fract() == 0.0 && e.re.abs() <= 64.0 => {
            let n = e.re as i32;
            node(move |env| b(env).powi(n))
        }
        Expr::Num(e) if e.im == 0.0 => {
            let p = e.re;
            node(move |env| b(env).powf(p))
        }
        _ => {
            let e = lower(exp);
            node(move |env| complex_pow(b(env), e(env)))
        }
    }
}

/// Integer real exponents stay exact (`z^2` at z = 0 is 0, not NaN).
fn complex_pow(base: Complex64, exp: Complex64) -> Complex64 {
    if exp.im == 0.0 {
        if exp.re.fract() == 0.0 && exp.re.abs() <= 64.0 {
            return base.powi(exp.re as i32);
        }
        return base.powf(exp.re);
    }
    if base == Complex64::new(0.0, 0.0) {
        return base;
    }
    base.powc(exp)
}

fn binary(op: BinaryOp, x: Complex64, y: Complex64) -> Complex64 {
    match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        BinaryOp::Pow => complex_pow(x, y),
        BinaryOp::Lt => boolean(x.re < y.re),
        BinaryOp::Gt => boolean(x.re > y.re),
        BinaryOp::Le => boolean(x.re <= y.re),
        BinaryOp::Ge => boolean(x.re >= y.re),
        BinaryOp::Eq => boolean(x.re == y.re),
        BinaryOp::Ne => boolean(x.re != y.re),
        BinaryOp::And => boolean(truth(x) && truth(y)),
        BinaryOp::Or => boolean(truth(x) || truth(y)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{parse, Field};

    fn env(z: Complex64, c: Complex64) -> Env<'static> {
        Env {
            z,
            c,
            power: 2.0,
            mouse: Complex64::new(0.0, 0.0),
            bailout: 2.0,
            slots: &[],
        }
    }

    #[test]
    fn powi_at_origin_is_zero() {
        let p = Program::compile(&parse("z^power + c", Field::Iterate).unwrap());
        let out = p.eval(&env(Complex64::new(0.0, 0.0), Complex64::new(0.25, 0.0)));
        assert_eq!(out, Complex64::new(0.25, 0.0));
    }

    #[test]
    fn missing_slot_reads_zero() {
        let p = Program::compile(&parse("slot[3] + 1", Field::Iterate).unwrap());
        let out = p.eval(&env(Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0)));
        assert_eq!(out.re, 1.0);
    }

    #[test]
    fn nan_is_not_truthy() {
        assert!(!truth(Complex64::new(f64::NAN, 0.0)));
    }
}
