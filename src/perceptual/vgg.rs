//! VGG19 convolutional trunk and named-stage feature capture.
//!
//! The network is the 16-convolution VGG19 feature stack with its
//! classifier head removed. Pooling stages are 2x2 average pools:
//! max pooling leaves grid artifacts in gradient-optimised images.
//!
//! Weights are never trained here. The stack is frozen at
//! construction and acts purely as a measuring instrument; gradients
//! flow through it into whatever image tensor is being optimised.

use std::collections::{BTreeMap, BTreeSet};

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;
use burn::tensor::activation::relu;

use super::layers::{LayerId, LayerKind, CONV_CHANNELS};
use crate::error::{StyleError, StyleResult};

// ─── VGG19 stack ──────────────────────────────────────────────────

/// The convolutional trunk: 16 same-padded 3x3 convolutions in five
/// blocks, with one shared 2x2 average pool between blocks.
#[derive(Module, Debug)]
pub struct Vgg19Stack<B: Backend> {
    pub(crate) convs: Vec<Conv2d<B>>,
    pool: AvgPool2d,
}

impl<B: Backend> Vgg19Stack<B> {
    /// Build the stack with freshly initialised weights.
    ///
    /// Useful on its own only for shape tests; for actual transfer the
    /// pretrained weights are loaded over these parameters.
    pub fn init(device: &B::Device) -> Self {
        let convs = CONV_CHANNELS
            .iter()
            .map(|&(c_in, c_out)| {
                Conv2dConfig::new([c_in, c_out], [3, 3])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device)
            })
            .collect();

        Vgg19Stack {
            convs,
            pool: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }
}

// ─── Feature capture ──────────────────────────────────────────────

/// Whether captured activations stay connected to the autodiff graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradMode {
    /// Keep the graph; gradients can flow back to the input image.
    Track,
    /// Cut the graph; activations become reference constants.
    Detach,
}

/// Runs images through the stack and captures the activations of a
/// fixed set of named stages.
///
/// The keep-set is chosen at construction (or via [`set_keep`]); a
/// forward pass walks the catalog in depth order, records each kept
/// stage, and stops after the deepest one, so shallow keep-sets never
/// pay for the full network.
///
/// [`set_keep`]: FeatureExtractor::set_keep
pub struct FeatureExtractor<B: Backend> {
    stack: Vgg19Stack<B>,
    keep: BTreeSet<LayerId>,
}

impl<B: Backend> FeatureExtractor<B> {
    /// Wrap a stack, freezing its parameters.
    pub fn new(stack: Vgg19Stack<B>, keep: &[LayerId]) -> Self {
        FeatureExtractor {
            stack: stack.no_grad(),
            keep: keep.iter().copied().collect(),
        }
    }

    /// Extractor over freshly initialised (untrained) weights.
    pub fn with_random_weights(device: &B::Device, keep: &[LayerId]) -> Self {
        FeatureExtractor::new(Vgg19Stack::init(device), keep)
    }

    /// Replace the keep-set. Duplicates collapse; order is depth order.
    pub fn set_keep(&mut self, keep: &[LayerId]) {
        self.keep = keep.iter().copied().collect();
    }

    /// The kept stages, in depth order.
    pub fn keep(&self) -> impl Iterator<Item = LayerId> + '_ {
        self.keep.iter().copied()
    }

    pub fn device(&self) -> B::Device {
        self.stack.convs[0].weight.device()
    }

    /// Run one batch through the stack and capture the kept stages.
    ///
    /// - `image`: [b, 3, h, w] — normalised pixels
    ///
    /// Returns the captured activations keyed by stage, each [b, c, h', w'].
    /// An empty keep-set returns an empty map without touching the network.
    pub fn extract(
        &self,
        image: Tensor<B, 4>,
        grad: GradMode,
    ) -> StyleResult<BTreeMap<LayerId, Tensor<B, 4>>> {
        let [_, channels, _, _] = image.dims();
        if channels != 3 {
            return Err(StyleError::ChannelMismatch {
                expected: 3,
                got: channels,
            });
        }

        let deepest = match self.keep.iter().next_back() {
            Some(&id) => id,
            None => return Ok(BTreeMap::new()),
        };

        let mut captured = BTreeMap::new();
        let mut x = image;
        let mut conv_idx = 0;
        for id in LayerId::all() {
            x = match id.kind() {
                LayerKind::Conv => {
                    let y = self.stack.convs[conv_idx].forward(x);
                    conv_idx += 1;
                    y
                }
                LayerKind::Relu => relu(x),
                LayerKind::Pool => self.stack.pool.forward(x),
            };

            if self.keep.contains(&id) {
                let feature = match grad {
                    GradMode::Track => x.clone(),
                    GradMode::Detach => x.clone().detach(),
                };
                captured.insert(id, feature);
            }

            if id == deepest {
                break;
            }
        }

        Ok(captured)
    }
}
