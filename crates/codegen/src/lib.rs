//! rcl-codegen: source modules and output files from an RCL interchange
//! bundle.
//!
//! Works from interchange JSON only, so it can run on bundles produced by a
//! different compiler build.

pub mod bundle;
pub mod module;
pub mod output;

pub use bundle::{CodegenBundle, CodegenError, CodegenFlow};
pub use module::{generate_module, ModuleConfig, ModuleFormat};
pub use output::{write_outputs, OutputConfig, OutputFormat};
