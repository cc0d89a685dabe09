//! Rule fragments: guards, patterns, templates, rule sets, and presets.

pub mod guard;
pub mod pattern;
pub mod presets;
pub mod rule_set;
pub mod template;

pub use guard::{Guard, Value};
pub use pattern::Pattern;
pub use presets::{Preset, Presets};
pub use rule_set::{Command, Field, RuleSet, UNLIMITED};
pub use template::Template;
