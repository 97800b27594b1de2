//! HII package-list database: a GUID-named store of opaque configuration
//! packages with wire-format export and change notification.
//!
//! [`HiiDatabase`] holds [`PackageList`]s under opaque, never-reused
//! [`HiiHandle`]s. Consumers install, replace and remove whole lists;
//! [`HiiDatabase::export_package_lists`] flattens the store (or one list)
//! into the binary shape [`parse`] reverses, and
//! [`HiiDatabase::register_package_notify`] feeds add/remove/update
//! deliveries for a package kind onto an
//! [`EventQueue`](ember_platform::EventQueue).
//!
//! Package payloads are never interpreted. String, font and form encodings
//! belong to whoever produces and consumes the packages; this crate moves
//! labelled byte blobs.

#![forbid(unsafe_code)]

mod database;
mod error;
mod package;
mod wire;

pub use database::{HiiDatabase, HiiHandle, PackageChange, PackageNotify};
pub use error::{HiiError, Result};
pub use package::{Package, PackageKind, PackageList};
pub use wire::parse;

#[cfg(test)]
mod proptests;
