//! Error types shared across the crate.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for style-transfer operations.
pub type StyleResult<T> = Result<T, StyleError>;

/// Errors that can occur while building losses or running the optimizer.
#[derive(Debug, Error)]
pub enum StyleError {
    /// Input tensor does not have the three RGB channels the network expects.
    #[error("expected {expected} input channels, got {got}")]
    ChannelMismatch { expected: usize, got: usize },

    /// A layer name that is not part of the VGG19 catalog.
    #[error("unknown layer '{0}'")]
    UnknownLayer(String),

    /// A style or content layer list with nothing in it.
    #[error("{0} layer set is empty")]
    EmptyLayerSet(&'static str),

    /// The loss was evaluated before its reference statistics were set.
    #[error("{0} targets are not primed; call the matching prime method first")]
    NotPrimed(&'static str),

    /// The optimizer produced a NaN or infinite loss.
    #[error("non-finite loss {value} at iteration {iteration}")]
    NonFiniteLoss { iteration: usize, value: f32 },

    /// No weight file at any of the searched locations.
    #[error("VGG19 weights not found; searched {}", format_paths(.searched))]
    WeightsNotFound { searched: Vec<PathBuf> },

    /// A weight file that does not match the VGG19 layout.
    #[error("malformed weight file: {0}")]
    WeightsFormat(String),

    /// Remote image fetch failure.
    #[error("fetch error: {0}")]
    Fetch(#[from] reqwest::Error),

    /// Image decode or encode failure.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invariant violation inside the crate.
    #[error("internal error: {0}")]
    Internal(String),
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_layer_name() {
        let err = StyleError::UnknownLayer("relu9_9".into());
        assert!(err.to_string().contains("relu9_9"));
    }

    #[test]
    fn display_lists_searched_paths() {
        let err = StyleError::WeightsNotFound {
            searched: vec![PathBuf::from("/a/vgg19.bin"), PathBuf::from("/b/vgg19.bin")],
        };
        let text = err.to_string();
        assert!(text.contains("/a/vgg19.bin"));
        assert!(text.contains("/b/vgg19.bin"));
    }

    #[test]
    fn display_reports_iteration() {
        let err = StyleError::NonFiniteLoss {
            iteration: 7,
            value: f32::NAN,
        };
        assert!(err.to_string().contains("iteration 7"));
    }
}
