//! Error types for the LV2 hosting core.

use crate::metadata::PortType;
use thiserror::Error;

/// Why `is_plugin_supported` said no. Verdicts are binary: any one of
/// these rejects the whole plugin, there is no degraded hosting.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Unsupported {
    #[error("plugin not available: {0}")]
    NotAvailable(String),

    #[error("required feature not supported: {0}")]
    MissingFeature(String),

    #[error("unsupported {ty} port at index {index}")]
    PortType { index: u32, ty: PortType },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("plugin not supported: {0}")]
    Unsupported(#[from] Unsupported),

    #[error("could not instantiate {uri}: {reason}")]
    Instantiation { uri: String, reason: String },

    #[error("module is not instantiated")]
    NotInstantiated,

    #[error("port index {index} out of range ({count} ports)")]
    PortIndex { index: u32, count: u32 },

    #[error("plugin library error: {0}")]
    Library(#[from] libloading::Error),

    #[error("library exports no descriptor for {0}")]
    MissingDescriptor(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_display() {
        let err = Unsupported::MissingFeature("urn:example:feat".into());
        assert!(err.to_string().contains("urn:example:feat"));

        let err = Unsupported::PortType {
            index: 3,
            ty: PortType::Cv,
        };
        assert!(err.to_string().contains("index 3"));
        assert!(err.to_string().contains("CV"));
    }

    #[test]
    fn test_error_display() {
        let err = Error::Instantiation {
            uri: "urn:example:plug".into(),
            reason: "constructor returned null".into(),
        };
        assert!(err.to_string().contains("urn:example:plug"));
        assert!(err.to_string().contains("null"));

        let err = Error::PortIndex { index: 9, count: 4 };
        assert!(err.to_string().contains('9'));
        assert!(err.to_string().contains('4'));
    }
}
