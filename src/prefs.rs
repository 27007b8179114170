use std::path::{Path, PathBuf};

/// Interactive toggles remembered between sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppPrefs {
    pub muted: bool,
    pub julia_preview: bool,
    pub show_trail: bool,
    pub show_hud: bool,
}

impl Default for AppPrefs {
    fn default() -> Self {
        Self {
            muted: false,
            julia_preview: true,
            show_trail: true,
            show_hud: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrefsError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
}

impl AppPrefs {
    pub fn load(path: Option<&Path>) -> Result<Self, PrefsError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = match std::fs::read_to_string(path) {
            Ok(v) => v,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(PrefsError::Io(err.to_string())),
        };
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, PrefsError> {
        let mut prefs = Self::default();
        for (line_idx, raw) in text.lines().enumerate() {
            let line_no = line_idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key_raw, value_raw)) = line.split_once('=') else {
                return Err(PrefsError::Parse {
                    line: line_no,
                    message: "expected <key>=<value>".to_string(),
                });
            };
            let key = key_raw.trim();
            let slot = match key {
                "muted" => &mut prefs.muted,
                "julia_preview" => &mut prefs.julia_preview,
                "show_trail" => &mut prefs.show_trail,
                "show_hud" => &mut prefs.show_hud,
                _ => continue,
            };
            *slot = parse_bool(value_raw).ok_or_else(|| PrefsError::Parse {
                line: line_no,
                message: format!("{key} must be true/false"),
            })?;
        }
        Ok(prefs)
    }

    pub fn to_text(&self) -> String {
        let b = |v: bool| if v { "true" } else { "false" };
        format!(
            "# deepbrot prefs v1\nmuted={}\njulia_preview={}\nshow_trail={}\nshow_hud={}\n",
            b(self.muted),
            b(self.julia_preview),
            b(self.show_trail),
            b(self.show_hud)
        )
    }

    pub fn save(&self, path: Option<&Path>) -> Result<(), PrefsError> {
        let Some(path) = path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PrefsError::Io(e.to_string()))?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, self.to_text()).map_err(|e| PrefsError::Io(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| PrefsError::Io(e.to_string()))
    }
}

pub fn prefs_storage_path() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.trim().is_empty() {
            return Some(PathBuf::from(xdg).join("deepbrot").join("prefs.txt"));
        }
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".config").join("deepbrot").join("prefs.txt"))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
