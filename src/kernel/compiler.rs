use crate::expr::emit::emit_msl;
use crate::expr::lexer::slot_ref;
use crate::expr::{parse, substitute_params, CompileError, Expr, Field, Program, Var};
use crate::fractal::{FractalDefinition, PerturbationForm};
use crate::kernel::template::{instantiate, KERNEL_TEMPLATE, MAX_SLOTS};

/// One formula field after parameter renaming.
#[derive(Debug)]
pub struct CompiledExpr {
    /// Source with parameters renamed to `slot[N]`.
    pub source: String,
    pub expr: Expr,
    pub program: Program,
}

impl CompiledExpr {
    fn build(src: &str, names: &[&str], field: Field) -> Result<Self, CompileError> {
        let source = substitute_params(src, names, field, slot_ref)?;
        let expr = parse(&source, field)?;
        if let Some(max) = expr.max_slot() {
            if max >= names.len() {
                return Err(CompileError::Param {
                    name: slot_ref(max),
                    reason: format!("only {} parameter(s) declared", names.len()),
                });
            }
        }
        let program = Program::compile(&expr);
        Ok(Self {
            source,
            expr,
            program,
        })
    }
}

/// A formula ready to run: native closures for the CPU path plus the instantiated shader
/// source for GPU backends.
#[derive(Debug)]
pub struct CompiledKernel {
    pub name: String,
    pub iterate: CompiledExpr,
    pub bailout: CompiledExpr,
    pub initial: CompiledExpr,
    pub msl: String,
    pub power: f64,
    pub slot_count: usize,
    /// Output depends on the live pointer position (`mouse`).
    pub pointer_dependent: bool,
    pub smooth_coloring: bool,
    pub julia: bool,
    pub perturbation: PerturbationForm,
}

pub struct KernelCompiler {
    template: String,
}

impl Default for KernelCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelCompiler {
    pub fn new() -> Self {
        Self::with_template(KERNEL_TEMPLATE)
    }

    pub fn with_template(template: &str) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    pub fn compile(&self, def: &FractalDefinition) -> Result<CompiledKernel, CompileError> {
        def.validate_params()?;
        if def.params.len() > MAX_SLOTS {
            return Err(CompileError::Param {
                name: def.params[MAX_SLOTS].name.clone(),
                reason: format!("at most {MAX_SLOTS} parameters are supported"),
            });
        }
        if !def.power.is_finite() {
            return Err(CompileError::Param {
                name: "power".to_string(),
                reason: "must be finite".to_string(),
            });
        }

        let names = def.param_names();
        let iterate = CompiledExpr::build(&def.iterate, &names, Field::Iterate)?;
        let bailout = CompiledExpr::build(&def.bailout, &names, Field::Bailout)?;
        let initial = CompiledExpr::build(&def.initial, &names, Field::Initial)?;

        let pointer_dependent = [&iterate, &bailout, &initial]
            .iter()
            .any(|e| e.expr.references(Var::Mouse));

        let msl = instantiate(
            &self.template,
            &emit_msl(&iterate.expr),
            &emit_msl(&bailout.expr),
            &emit_msl(&initial.expr),
        )?;

        Ok(CompiledKernel {
            name: def.name.clone(),
            iterate,
            bailout,
            initial,
            msl,
            power: def.power,
            slot_count: names.len(),
            pointer_dependent,
            smooth_coloring: def.smooth_coloring,
            julia: def.julia,
            perturbation: def.perturbation,
        })
    }
}
