//! Foreign-language facades over [`crate::table::Table`].
pub mod python;
