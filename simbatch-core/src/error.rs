//! Error types.

use std::io;
use std::num::{ParseFloatError, ParseIntError};
use std::path::PathBuf;
use std::str::ParseBoolError;

pub type Result<T> = core::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Self::XmlError(e.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        Self::XmlError(e.to_string())
    }
}

/// Crate-wide error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(String),

    #[error(
        "filename '{argument}' exists in current directory ({}) and in the package exp directory ({})",
        current.display(),
        package.display()
    )]
    AmbiguousFile {
        argument: String,
        current: PathBuf,
        package: PathBuf,
    },
    #[error("filename '{0}' does not exist")]
    FileNotFound(String),

    /// No search directory yielded a loadable module. The message holds
    /// one line per directory tried, in search order.
    #[error("{0}")]
    PluginResolution(String),
    #[error("error when searching {symbol} function in plugin {plugin}{diagnostics}")]
    PluginExportNotFound {
        plugin: String,
        symbol: String,
        diagnostics: String,
    },
    #[error("error when calling {symbol} function in plugin {plugin}: instance construction failed{diagnostics}")]
    PluginConstruction {
        plugin: String,
        symbol: String,
        diagnostics: String,
    },

    #[error("simulation failed: {0}")]
    Simulation(String),

    #[error("invalid value kind: {0}")]
    InvalidValueKind(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("invalid experiment: {0}")]
    InvalidExperiment(String),
    #[error("xml error: {0}")]
    XmlError(String),

    #[error("failed parsing int: {0}")]
    ParseIntError(#[from] ParseIntError),
    #[error("failed parsing float: {0}")]
    ParseFloatError(#[from] ParseFloatError),
    #[error("failed parsing bool: {0}")]
    ParseBoolError(#[from] ParseBoolError),

    #[error("internal error: {0}")]
    InternalError(String),
    #[error("other error: {0}")]
    Other(String),
}

impl Error {
    /// Whether the error comes from turning a command-line argument into a
    /// job, as opposed to anything that happens once jobs run.
    pub fn is_resolution_error(&self) -> bool {
        matches!(self, Error::AmbiguousFile { .. } | Error::FileNotFound(_))
    }

    /// Whether the error comes from resolving an output plugin.
    pub fn is_plugin_error(&self) -> bool {
        matches!(
            self,
            Error::PluginResolution(_)
                | Error::PluginExportNotFound { .. }
                | Error::PluginConstruction { .. }
        )
    }
}
