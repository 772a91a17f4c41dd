//! Image references and absent-image directives.

pub mod directive;
pub mod specifier;

pub use directive::{AbsentImageAction, AbsentImageDirective, DIRECTIVE_DELIMITER};
pub use specifier::ImageSpecifier;
