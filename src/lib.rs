pub mod canvas;
pub mod colors;
pub mod error;
pub mod gpu;
pub mod io;
pub mod lbfgs;
pub mod perceptual;
pub mod serve;
pub mod stylize;
pub mod weights;

// Re-exports: the surface embedding callers reach for first
pub use canvas::Canvas;
pub use error::{StyleError, StyleResult};
pub use lbfgs::{Lbfgs, LbfgsConfig};
pub use perceptual::{FeatureExtractor, GradMode, LayerId, PerceptualLoss, Vgg19Stack};
pub use serve::ServeConfig;
pub use stylize::{OptimizeReport, StylizeConfig, Stylizer};
