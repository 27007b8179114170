pub mod app;
pub mod audio;
pub mod config;
pub mod export;
pub mod expr;
pub mod fractal;
pub mod kernel;
pub mod location;
pub mod logging;
pub mod orbit;
pub mod palette;
pub mod perturb;
pub mod pipeline;
pub mod precision;
pub mod prefs;
pub mod render;
pub mod terminal;
pub mod view;
