//! Perceptual measurement: VGG19 features, Gram statistics, and the
//! two-term loss that drives a transfer.
//!
//! # Public API
//!
//! ```ignore
//! use impasto::perceptual::{FeatureExtractor, PerceptualLoss};
//! let extractor = FeatureExtractor::new(stack, &[]);
//! let mut loss = PerceptualLoss::new(extractor);
//! loss.prime_style(style, 10.0, None)?;
//! loss.prime_content(content, None)?;
//! let value = loss.evaluate(candidate)?;
//! ```

pub mod gram;
pub mod layers;
pub mod loss;
pub mod vgg;

pub use gram::gram;
pub use layers::{default_content_layers, default_style_layers, LayerId, LayerKind};
pub use loss::PerceptualLoss;
pub use vgg::{FeatureExtractor, GradMode, Vgg19Stack};
