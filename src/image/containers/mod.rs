pub mod icns;
pub mod ico;
pub mod png;
pub mod zip_bundle;
