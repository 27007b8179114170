//! Small complex-valued expression language used by fractal formulas.
//!
//! Source text goes through [`lexer`] (which also performs parameter-to-slot renaming),
//! [`parser`] builds an [`Expr`] tree, [`eval`] turns the tree into native closures for the
//! CPU evaluator and [`emit`] prints it as Metal Shading Language for the GPU template.

pub mod emit;
pub mod eval;
pub mod lexer;
pub mod parser;

use num_complex::Complex64;
use std::fmt;

pub use eval::{Env, Program};
pub use lexer::substitute_params;
pub use parser::parse;

/// Which formula field an expression came from; used only for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Iterate,
    Bailout,
    Initial,
}

impl Field {
    pub fn label(self) -> &'static str {
        match self {
            Self::Iterate => "iterate",
            Self::Bailout => "bailout",
            Self::Initial => "initial",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("{field}: syntax error at column {pos}: {message}")]
    Syntax {
        field: Field,
        pos: usize,
        message: String,
    },
    #[error("{field}: unknown identifier '{name}'")]
    UnknownIdentifier { field: Field, name: String },
    #[error("{field}: unknown function '{name}'")]
    UnknownFunction { field: Field, name: String },
    #[error("{field}: {name}() takes {expected} argument(s), got {found}")]
    Arity {
        field: Field,
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("parameter '{name}': {reason}")]
    Param { name: String, reason: String },
    #[error("formula file line {line}: {message}")]
    FormulaFile { line: usize, message: String },
    #[error("kernel template: {0}")]
    Template(String),
    #[error("backend: {0}")]
    Backend(String),
}

/// Free variables a formula may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Var {
    Z,
    C,
    Power,
    Mouse,
    Bailout,
}

impl Var {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "z" => Some(Self::Z),
            "c" => Some(Self::C),
            "power" => Some(Self::Power),
            "mouse" => Some(Self::Mouse),
            "bailout" => Some(Self::Bailout),
            _ => None,
        }
    }
}

/// Identifiers that formulas cannot use as parameter names.
pub const RESERVED: &[&str] = &["z", "c", "power", "mouse", "bailout", "i", "pi", "slot"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sqr,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
    Sinh,
    Cosh,
    Conj,
    Abs,
    Re,
    Im,
    Length,
    Norm,
    Arg,
    Pow,
}

impl Func {
    pub const ALL: [Func; 17] = [
        Self::Sqr,
        Self::Sqrt,
        Self::Exp,
        Self::Log,
        Self::Sin,
        Self::Cos,
        Self::Tan,
        Self::Sinh,
        Self::Cosh,
        Self::Conj,
        Self::Abs,
        Self::Re,
        Self::Im,
        Self::Length,
        Self::Norm,
        Self::Arg,
        Self::Pow,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Sqr => "sqr",
            Self::Sqrt => "sqrt",
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Sinh => "sinh",
            Self::Cosh => "cosh",
            Self::Conj => "conj",
            Self::Abs => "abs",
            Self::Re => "re",
            Self::Im => "im",
            Self::Length => "length",
            Self::Norm => "norm",
            Self::Arg => "arg",
            Self::Pow => "pow",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }

    pub fn arity(self) -> usize {
        match self {
            Self::Pow => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(Complex64),
    Var(Var),
    Slot(usize),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

impl Expr {
    pub fn references(&self, var: Var) -> bool {
        match self {
            Self::Num(_) | Self::Slot(_) => false,
            Self::Var(v) => *v == var,
            Self::Unary(_, e) => e.references(var),
            Self::Binary(_, a, b) => a.references(var) || b.references(var),
            Self::Call(_, args) => args.iter().any(|a| a.references(var)),
        }
    }

    /// Largest slot index referenced, if any.
    pub fn max_slot(&self) -> Option<usize> {
        match self {
            Self::Num(_) | Self::Var(_) => None,
            Self::Slot(n) => Some(*n),
            Self::Unary(_, e) => e.max_slot(),
            Self::Binary(_, a, b) => a.max_slot().max(b.max_slot()),
            Self::Call(_, args) => args.iter().filter_map(Expr::max_slot).max(),
        }
    }
}

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Parameter names must be plain identifiers that shadow nothing.
pub fn validate_param_name(name: &str) -> Result<(), CompileError> {
    let reason = if !is_identifier(name) {
        "not an identifier"
    } else if RESERVED.contains(&name) {
        "reserved name"
    } else if Func::from_name(name).is_some() {
        "shadows a built-in function"
    } else {
        return Ok(());
    };
    Err(CompileError::Param {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}
