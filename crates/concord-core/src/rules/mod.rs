mod loader;
mod types;

pub use loader::{load_rules, RulesSource};
pub use types::*;
