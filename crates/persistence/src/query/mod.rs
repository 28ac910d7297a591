//! Predicate model and the translation contract.
//!
//! - [`predicate`]: the declarative predicate tree
//! - [`fragment`]: SQL fragments with positional parameters
//! - [`translate`]: [`QueryTranslator`] and the [`QueryHack`] override hook

pub mod fragment;
pub mod predicate;
pub mod translate;

pub use fragment::{SqlFragment, SqlParam};
pub use predicate::{Collection, CompareOp, Predicate, Property, PropertyScope, QueryValue};
pub use translate::{QueryHack, QueryTranslator, TranslationScope, describe_target};
