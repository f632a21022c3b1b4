use thiserror::Error;

use crate::transpile::Finding;

#[derive(Debug, Error)]
pub enum BootcfgError {
    #[error("unknown template variable '{name}' at offset {offset}")]
    UnknownVariable { name: String, offset: usize },

    #[error("unterminated placeholder starting at offset {offset}")]
    UnterminatedPlaceholder { offset: usize },

    #[error("transpile failed: {reason}")]
    Transpile { reason: String },

    #[error("boot config rejected with {} finding(s): {}", .findings.len(), summarize(.findings))]
    Rejected { findings: Vec<Finding> },

    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

fn summarize(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, BootcfgError>;
