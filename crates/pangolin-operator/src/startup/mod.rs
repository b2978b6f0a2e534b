//! Startup tasks run before the controllers begin watching

mod crds;

pub use crds::{ensure_crds, render_crds};
