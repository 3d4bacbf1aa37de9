//! Small helpers for paths, filesystem cleanup and warnings.

pub mod fs;
pub mod path;
pub mod warn;
