#![warn(missing_docs)]

//! Cirrus boot configuration subsystem: tag-filtered fragments, template rendering,
//! transpilation to the machine init format and validation.

pub mod catalog;
pub mod compose;
pub mod error;
pub mod fragment;
pub mod peers;
pub mod render;
pub mod tags;
pub mod transpile;

pub use compose::{BootConfig, BootConfigComposer, NodeContext};
pub use error::{BootcfgError, Result};
pub use fragment::{Fragment, TagFilter};
pub use tags::{ClusterStateFlag, Iaas, TagSet};
pub use transpile::{Finding, InitTranspiler, InitValidator, Severity, Transpiler, Validator};
