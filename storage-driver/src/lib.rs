//! # Storage driver abstraction
//!
//! The [`Driver`] trait describes an object store addressed by bucket and
//! path, with async streaming upload and download. Concrete backends live in
//! the `storage` crate; this crate only defines the contract and the shared
//! [`StorageError`] type with its semantic [`StorageErrorKind`] categories.

mod driver;
mod error;

pub use driver::Driver;
pub use driver::Metadata;
pub use driver::Reader;
pub use driver::Writer;
pub use error::StorageError;
pub use error::StorageErrorKind;
