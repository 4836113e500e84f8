use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid verb '{0}': {1}")]
    InvalidVerb(String, String),
}

/// Catalog errors are fatal: the catalog is authoritative, there is no partial load.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog has no header line (expected a line starting with NAME)")]
    MissingHeader,

    #[error("catalog header is missing the {0} column")]
    MissingColumn(&'static str),

    #[error("catalog header column {0} is out of order")]
    ColumnOutOfOrder(&'static str),

    #[error("line {line}: columns cannot be sliced from {content:?}")]
    MalformedLine { line: usize, content: String },

    #[error("line {line}: {column} column is empty")]
    EmptyColumn { line: usize, column: &'static str },

    #[error("line {line}: NAMESPACED must be true or false, got '{value}'")]
    InvalidNamespaced { line: usize, value: String },

    #[error("line {line}: {source}")]
    InvalidVerb { line: usize, source: ParseError },
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Policy errors never abort expansion; they are collected in the expansion report.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to decode policy document {document}: {message}")]
    Document { document: usize, message: String },

    #[error("failed to decode rule {rule} of policy document {document}: {message}")]
    Rule {
        document: usize,
        rule: usize,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid resource catalog {path}: {source}")]
    Catalog { path: PathBuf, source: CatalogError },
}
