pub mod creator;
pub mod document;
pub mod manifest;
pub mod package;
pub mod xml;

pub use document::{verify_package_roundtrip, OdtTemplate};
pub use package::OdtPackage;
