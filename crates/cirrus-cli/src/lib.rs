#![warn(missing_docs)]

//! Cirrus command line: flag and environment parsing, configuration loading and
//! dispatch to the provisioning orchestrator.

pub mod cli;
