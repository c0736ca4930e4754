// Package model for cinder packages
//
// A package is identified by its (category, name, version) triple and
// carries its requirement, conflict and provides relations. Packages
// are cheap to share by value and content-addressed by fingerprint.

mod metadata;
mod package;
mod set;

pub use metadata::PackageMetadata;
pub use package::{Package, PackageFile};
pub use set::Packages;
