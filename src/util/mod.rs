//! Helpers for printing feed content.
//!
//! Feed titles and bodies come from remote servers, so anything written to a
//! terminal goes through [`sanitize_for_terminal`] first.

mod text;

pub use text::{one_line, sanitize_for_terminal};
