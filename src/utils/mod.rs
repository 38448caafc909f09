//! Generic utility primitives with zero domain knowledge.
//!
//! - `shell` - Shell escaping and quoting
//! - `template` - `{{var}}` template rendering
//! - `token` - Random secret and password generation
//! - `validation` - Input validation helpers

pub mod shell;
pub mod template;
pub mod token;
pub mod validation;
