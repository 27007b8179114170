use crate::expr::{BinaryOp, Expr, Func, UnaryOp, Var};
use std::fmt::Write as _;

/// Prints an expression as a Metal `float2` expression.
///
/// Complex helpers (`c_mul`, `c_pow`, ...) and the `u` uniform block are provided by the
/// kernel template.
pub fn emit_msl(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(&mut out, expr);
    out
}

fn write_expr(out: &mut String, expr: &Expr) {
    match expr {
        Expr::Num(v) => {
            let _ = write!(out, "float2({}, {})", float_lit(v.re), float_lit(v.im));
        }
        Expr::Var(var) => out.push_str(match var {
            Var::Z => "z",
            Var::C => "c",
            Var::Power => "float2(u.power, 0.0f)",
            Var::Mouse => "u.mouse",
            Var::Bailout => "float2(u.bailout, 0.0f)",
        }),
        Expr::Slot(idx) => {
            let _ = write!(out, "float2(u.slots[{idx}], 0.0f)");
        }
        Expr::Unary(UnaryOp::Neg, inner) => {
            out.push_str("(-");
            write_expr(out, inner);
            out.push(')');
        }
        Expr::Unary(UnaryOp::Not, inner) => call(out, "c_not", &[inner.as_ref()]),
        Expr::Binary(op, a, b) => match op {
            BinaryOp::Add | BinaryOp::Sub => {
                out.push('(');
                write_expr(out, a);
                out.push_str(if *op == BinaryOp::Add { " + " } else { " - " });
                write_expr(out, b);
                out.push(')');
            }
            _ => call(out, binary_helper(*op), &[a.as_ref(), b.as_ref()]),
        },
        Expr::Call(func, args) => {
            let refs: Vec<&Expr> = args.iter().collect();
            call(out, func_helper(*func), &refs);
        }
    }
}

fn call(out: &mut String, name: &str, args: &[&Expr]) {
    out.push_str(name);
    out.push('(');
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_expr(out, arg);
    }
    out.push(')');
}

fn binary_helper(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "c_add",
        BinaryOp::Sub => "c_sub",
        BinaryOp::Mul => "c_mul",
        BinaryOp::Div => "c_div",
        BinaryOp::Pow => "c_pow",
        BinaryOp::Lt => "c_lt",
        BinaryOp::Gt => "c_gt",
        BinaryOp::Le => "c_le",
        BinaryOp::Ge => "c_ge",
        BinaryOp::Eq => "c_eq",
        BinaryOp::Ne => "c_ne",
        BinaryOp::And => "c_and",
        BinaryOp::Or => "c_or",
    }
}

fn func_helper(func: Func) -> &'static str {
    match func {
        Func::Sqr => "c_sqr",
        Func::Sqrt => "c_sqrt",
        Func::Exp => "c_exp",
        Func::Log => "c_log",
        Func::Sin => "c_sin",
        Func::Cos => "c_cos",
        Func::Tan => "c_tan",
        Func::Sinh => "c_sinh",
        Func::Cosh => "c_cosh",
        Func::Conj => "c_conj",
        Func::Abs => "c_abs",
        Func::Re => "c_re",
        Func::Im => "c_im",
        Func::Length => "c_length",
        Func::Norm => "c_norm",
        Func::Arg => "c_arg",
        Func::Pow => "c_pow",
    }
}

fn float_lit(v: f64) -> String {
    if !v.is_finite() {
        return if v.is_nan() {
            "NAN".to_string()
        } else if v > 0.0 {
            "INFINITY".to_string()
        } else {
            "(-INFINITY)".to_string()
        };
    }
    let s = format!("{v:?}");
    if s.contains('e') || s.contains('.') {
        format!("{s}f")
    } else {
        format!("{s}.0f")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{parse, Field};

    #[test]
    fn mandelbrot_emits_helpers() {
        let e = parse("z^power + c", Field::Iterate).unwrap();
        assert_eq!(emit_msl(&e), "(c_pow(z, float2(u.power, 0.0f)) + c)");
    }

    #[test]
    fn literals_are_float_suffixed() {
        let e = parse("2i - 1", Field::Initial).unwrap();
        assert_eq!(emit_msl(&e), "(float2(0.0f, 2.0f) - float2(1.0f, 0.0f))");
    }
}
