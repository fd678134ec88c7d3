//! Padding (layout reformatting) policy and workspace sizing.

pub mod policy;
pub mod workspace;
