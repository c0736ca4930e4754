//! Version parsing, ordering and selector matching for cinder packages.
//!
//! Versions follow semantic-versioning ordering with a stable tie-break
//! for pre-release tags. Selectors are either exact (`1.2.3`), a
//! comparison (`>=1.0`, `>1.0.0`, `<2`, `<=2.0`, `=1.2`), or the empty
//! selector which matches anything.

mod selector;
mod version;

pub use selector::{is_selector, selector_match_version, Operator, Selector};
pub use version::Version;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),
}

pub type Result<T> = std::result::Result<T, VersionError>;
