use crate::expr::{validate_param_name, CompileError};
use std::collections::HashSet;

pub const CUSTOM_NAME: &str = "Custom";
const ESCAPE_TEST: &str = "norm(z) > bailout * bailout";

#[derive(Debug, Clone, PartialEq)]
pub struct FractalParam {
    pub name: String,
    pub default: f64,
    pub value: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl FractalParam {
    pub fn new(name: &str, default: f64) -> Self {
        Self {
            name: name.to_string(),
            default,
            value: default,
            min: None,
            max: None,
        }
    }

    pub fn bounded(name: &str, default: f64, min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            ..Self::new(name, default)
        }
    }

    pub fn clamp(&self, v: f64) -> f64 {
        let mut v = v;
        if let Some(lo) = self.min {
            v = v.max(lo);
        }
        if let Some(hi) = self.max {
            v = v.min(hi);
        }
        v
    }
}

/// Delta recurrence to use when iterating relative to a reference orbit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerturbationForm {
    /// Formula has no known delta recurrence; always iterated directly.
    None,
    /// `z^p + c`
    Power(u32),
    /// `conj(z)^2 + c`
    Conjugate,
    /// `(|re z| + i|im z|)^2 + c`
    BurningShip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FractalDefinition {
    pub name: String,
    pub iterate: String,
    pub bailout: String,
    pub initial: String,
    pub power: f64,
    pub params: Vec<FractalParam>,
    pub smooth_coloring: bool,
    pub julia: bool,
    pub flip_x: bool,
    pub flip_y: bool,
    pub perturbation: PerturbationForm,
}

impl FractalDefinition {
    fn escape_time(name: &str, iterate: &str, power: f64, form: PerturbationForm) -> Self {
        Self {
            name: name.to_string(),
            iterate: iterate.to_string(),
            bailout: ESCAPE_TEST.to_string(),
            initial: "0".to_string(),
            power,
            params: Vec::new(),
            smooth_coloring: true,
            julia: true,
            flip_x: false,
            flip_y: false,
            perturbation: form,
        }
    }

    pub fn param_names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn slot_values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value).collect()
    }

    pub fn validate_params(&self) -> Result<(), CompileError> {
        let mut seen = HashSet::new();
        for p in &self.params {
            validate_param_name(&p.name)?;
            if !seen.insert(p.name.as_str()) {
                return Err(CompileError::Param {
                    name: p.name.clone(),
                    reason: "declared twice".to_string(),
                });
            }
            if let (Some(lo), Some(hi)) = (p.min, p.max) {
                if lo > hi {
                    return Err(CompileError::Param {
                        name: p.name.clone(),
                        reason: format!("empty range [{lo}, {hi}]"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Parses a formula file: `key = value` lines for `iterate`, `bailout` and `initial`
    /// (all required), plus optional `power = <f64>` and
    /// `param <name> = <default> [<min>, <max>]`. `#` starts a comment line.
    pub fn parse_formula_file(text: &str) -> Result<Self, CompileError> {
        let mut def = Self::escape_time(CUSTOM_NAME, "", 2.0, PerturbationForm::None);
        let mut seen = [false; 3];
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let file_err = |message: String| CompileError::FormulaFile {
                line: line_no,
                message,
            };
            let Some((key, value)) = line.split_once('=') else {
                return Err(file_err("expected <key> = <value>".to_string()));
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "iterate" => {
                    def.iterate = value.to_string();
                    seen[0] = true;
                }
                "bailout" => {
                    def.bailout = value.to_string();
                    seen[1] = true;
                }
                "initial" => {
                    def.initial = value.to_string();
                    seen[2] = true;
                }
                "power" => {
                    def.power = value
                        .parse()
                        .map_err(|_| file_err(format!("power must be a number, got '{value}'")))?;
                }
                _ => {
                    let Some(name) = key.strip_prefix("param ") else {
                        return Err(file_err(format!("unknown key '{key}'")));
                    };
                    def.params
                        .push(parse_param_decl(name.trim(), value).map_err(file_err)?);
                }
            }
        }
        for (present, key) in seen.iter().zip(["iterate", "bailout", "initial"]) {
            if !present {
                return Err(CompileError::FormulaFile {
                    line: 0,
                    message: format!("missing '{key}'"),
                });
            }
        }
        def.validate_params()?;
        Ok(def)
    }
}

fn parse_param_decl(name: &str, value: &str) -> Result<FractalParam, String> {
    let (default_text, range) = match value.split_once('[') {
        Some((d, r)) => (d.trim(), Some(r.trim().trim_end_matches(']'))),
        None => (value, None),
    };
    let default: f64 = default_text
        .parse()
        .map_err(|_| format!("param {name}: default must be a number"))?;
    let Some(range) = range else {
        return Ok(FractalParam::new(name, default));
    };
    let Some((lo, hi)) = range.split_once(',') else {
        return Err(format!("param {name}: range must be [min, max]"));
    };
    let lo: f64 = lo
        .trim()
        .parse()
        .map_err(|_| format!("param {name}: bad minimum"))?;
    let hi: f64 = hi
        .trim()
        .parse()
        .map_err(|_| format!("param {name}: bad maximum"))?;
    let mut p = FractalParam::bounded(name, default, lo, hi);
    p.value = p.clamp(default);
    Ok(p)
}

pub fn builtin_definitions() -> Vec<FractalDefinition> {
    let mut ship = FractalDefinition::escape_time(
        "Burning Ship",
        "sqr(abs(z)) + c",
        2.0,
        PerturbationForm::BurningShip,
    );
    ship.flip_y = true;

    let celtic = FractalDefinition::escape_time(
        "Celtic",
        "abs(re(sqr(z))) + i * im(sqr(z)) + c",
        2.0,
        PerturbationForm::None,
    );

    let mut lambda = FractalDefinition::escape_time(
        "Lambda",
        "c * z * (1 - z) + a",
        2.0,
        PerturbationForm::None,
    );
    lambda.initial = "0.5 + b".to_string();
    lambda.smooth_coloring = false;
    lambda.params = vec![
        FractalParam::bounded("a", 0.0, -1.0, 1.0),
        FractalParam::bounded("b", 0.0, -0.5, 0.5),
    ];

    let mut warp = FractalDefinition::escape_time(
        "Pointer Warp",
        "z^power + c + warp * mouse",
        2.0,
        PerturbationForm::None,
    );
    warp.julia = false;
    warp.params = vec![FractalParam::bounded("warp", 0.1, 0.0, 1.0)];

    vec![
        FractalDefinition::escape_time("Mandelbrot", "z^power + c", 2.0, PerturbationForm::Power(2)),
        FractalDefinition::escape_time("Multibrot", "z^power + c", 3.0, PerturbationForm::Power(3)),
        FractalDefinition::escape_time(
            "Tricorn",
            "sqr(conj(z)) + c",
            2.0,
            PerturbationForm::Conjugate,
        ),
        ship,
        celtic,
        lambda,
        warp,
        FractalDefinition::escape_time(CUSTOM_NAME, "z^power + c", 2.0, PerturbationForm::None),
    ]
}

/// Catalog of formulas. Built-in entries are fixed; the trailing Custom entry is the only
/// one whose expressions can change at runtime.
#[derive(Debug, Clone)]
pub struct FractalRegistry {
    entries: Vec<FractalDefinition>,
    active: usize,
}

impl FractalRegistry {
    pub fn builtin() -> Self {
        Self {
            entries: builtin_definitions(),
            active: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn active(&self) -> &FractalDefinition {
        &self.entries[self.active]
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn custom_index(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn is_custom_active(&self) -> bool {
        self.active == self.custom_index()
    }

    /// Returns `true` if the active entry changed.
    pub fn select(&mut self, idx: usize) -> bool {
        let idx = idx % self.entries.len();
        let changed = idx != self.active;
        self.active = idx;
        changed
    }

    pub fn select_next(&mut self, forward: bool) -> bool {
        let n = self.entries.len();
        let next = if forward {
            (self.active + 1) % n
        } else {
            (self.active + n - 1) % n
        };
        self.select(next)
    }

    pub fn select_by_name(&mut self, name: &str) -> Option<usize> {
        let want = name.trim().to_ascii_lowercase();
        let idx = self.entries.iter().position(|d| {
            let name = d.name.to_ascii_lowercase();
            name == want || name.replace(' ', "-") == want
        })?;
        self.select(idx);
        Some(idx)
    }

    pub fn custom(&self) -> &FractalDefinition {
        &self.entries[self.custom_index()]
    }

    /// Replaces the Custom formula. Returns `true` when Custom is the active entry, in which
    /// case the caller must recompile.
    pub fn edit_custom(&mut self, def: FractalDefinition) -> Result<bool, CompileError> {
        let def = self.prepare_custom(def)?;
        let idx = self.custom_index();
        self.entries[idx] = def;
        Ok(self.active == idx)
    }

    /// Checks and names a Custom candidate without touching the registry.
    pub fn prepare_custom(&self, mut def: FractalDefinition) -> Result<FractalDefinition, CompileError> {
        def.validate_params()?;
        def.name = CUSTOM_NAME.to_string();
        Ok(def)
    }

    /// Stores a prepared Custom formula and makes it the active entry.
    pub fn commit_custom(&mut self, def: FractalDefinition) {
        let idx = self.custom_index();
        self.entries[idx] = def;
        self.active = idx;
    }

    /// Sets a parameter on the active formula, clamped to its bounds. Returns the stored value.
    pub fn set_param(&mut self, name: &str, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        let idx = self.active;
        let p = self.entries[idx].params.iter_mut().find(|p| p.name == name)?;
        p.value = p.clamp(value);
        Some(p.value)
    }

    pub fn reset_params(&mut self) {
        let idx = self.active;
        for p in &mut self.entries[idx].params {
            p.value = p.default;
        }
    }

    pub fn slot_values(&self) -> Vec<f64> {
        self.active().slot_values()
    }
}

impl Default for FractalRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
