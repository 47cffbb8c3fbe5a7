//! The template language.
//!
//! A template is host code with output directives mixed in:
//!
//! ```text
//! def name(kind, text, brief):
//!     : ## ${escape(text)}
//!     if brief:
//!         : ${maptext(brief).strip()}
//! ```
//!
//! Lines starting with `:` are copied to the output with `${expr}`
//! substituted; everything else is an indentation-structured statement.

pub mod expr;
pub mod format;
pub mod interp;
pub mod translate;
pub mod value;

pub use format::TemplateFormat;
pub use interp::{Environment, Host, NoHost, Template};
pub use value::Value;
