//! The optimisable image.
//!
//! Pixels are never optimised directly. The canvas keeps an
//! unconstrained parameter grid and renders through a sigmoid, so
//! every parameter value maps to a legal pixel in (0, 1) and the
//! optimiser may take steps of any size without leaving the valid
//! color range.

use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::AutodiffBackend;

/// Pixel clamp applied before the logit, keeping parameters finite.
const EDGE: f32 = 1e-3;

/// A sigmoid-parameterised image under optimisation.
pub struct Canvas<B: AutodiffBackend> {
    params: Tensor<B, 4>,
}

impl<B: AutodiffBackend> Canvas<B> {
    /// Start at the content image: parameters are the logit of its
    /// pixels, so the first render reproduces the content.
    ///
    /// - `content`: [3, h, w] — pixels in `[0, 1]`
    pub fn from_content(content: Tensor<B, 3>) -> Self {
        let batch: Tensor<B, 4> = content.unsqueeze();
        let clamped = batch.clamp(EDGE, 1.0 - EDGE);
        let complement = clamped.ones_like() - clamped.clone();
        let params = (clamped / complement).log().detach().require_grad();
        Canvas { params }
    }

    /// [1, 3, h, w]
    pub fn dims(&self) -> [usize; 4] {
        self.params.dims()
    }

    /// Current parameters as a flat vector on the inner backend.
    pub fn flat_params(&self) -> Tensor<B::InnerBackend, 1> {
        let [b, c, h, w] = self.params.dims();
        self.params.clone().inner().reshape([b * c * h * w])
    }

    /// Install new parameter values and rejoin the autodiff graph.
    pub fn set_flat_params(&mut self, flat: Tensor<B::InnerBackend, 1>) {
        let dims = self.params.dims();
        self.params = Tensor::from_inner(flat.reshape(dims)).require_grad();
    }

    /// Render to pixels.
    ///
    /// Returns: [1, 3, h, w] in (0, 1), attached to the graph.
    pub fn render(&self) -> Tensor<B, 4> {
        sigmoid(self.params.clone())
    }

    /// Parameter gradient out of a backward pass over a render.
    pub fn grad(&self, grads: &B::Gradients) -> Option<Tensor<B::InnerBackend, 4>> {
        self.params.grad(grads)
    }

    /// Final rendered image, free of batch dimension and graph.
    ///
    /// Returns: [3, h, w] in (0, 1).
    pub fn into_image(self) -> Tensor<B::InnerBackend, 3> {
        let [_, c, h, w] = self.params.dims();
        sigmoid(self.params).inner().reshape([c, h, w])
    }
}
