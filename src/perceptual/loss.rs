//! The two-term perceptual loss.
//!
//! `loss = content + ratio * style`, where the style term compares
//! Gram matrices against a style reference and the content term
//! compares raw activations against a content reference. References
//! are primed once per run and live detached from any graph; only the
//! candidate image is tracked.

use std::collections::BTreeMap;

use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::*;

use super::gram::gram;
use super::layers::{default_content_layers, default_style_layers, LayerId};
use super::vgg::{FeatureExtractor, GradMode};
use crate::colors::normalize;
use crate::error::{StyleError, StyleResult};

/// Perceptual loss over a frozen feature extractor.
///
/// Holds the style Gram references, the content activation references
/// and the style/content ratio. Both references must be primed before
/// [`evaluate`] is called; priming again simply replaces the stored
/// statistics, so one instance can serve many runs.
///
/// [`evaluate`]: PerceptualLoss::evaluate
pub struct PerceptualLoss<B: Backend> {
    extractor: FeatureExtractor<B>,
    style_layers: Vec<LayerId>,
    content_layers: Vec<LayerId>,
    ratio: f64,
    style_grams: Option<BTreeMap<LayerId, Tensor<B, 3>>>,
    content_acts: Option<BTreeMap<LayerId, Tensor<B, 4>>>,
}

impl<B: Backend> PerceptualLoss<B> {
    /// Wrap an extractor with the stock layer choices: style on the
    /// first activation of each block, content on `relu3_2`.
    pub fn new(extractor: FeatureExtractor<B>) -> Self {
        let mut loss = PerceptualLoss {
            extractor,
            style_layers: default_style_layers(),
            content_layers: default_content_layers(),
            ratio: 1.0,
            style_grams: None,
            content_acts: None,
        };
        loss.sync_keep();
        loss
    }

    pub fn style_layers(&self) -> &[LayerId] {
        &self.style_layers
    }

    pub fn content_layers(&self) -> &[LayerId] {
        &self.content_layers
    }

    pub fn device(&self) -> B::Device {
        self.extractor.device()
    }

    /// Capture the style reference: Gram matrices of the style layers,
    /// plus the ratio applied to the style term.
    ///
    /// - `style`: [3, h, w] — style image pixels in `[0, 1]`
    /// - `layers`: replacement style layer set, if the caller wants one
    pub fn prime_style(
        &mut self,
        style: Tensor<B, 3>,
        ratio: f64,
        layers: Option<&[LayerId]>,
    ) -> StyleResult<()> {
        if let Some(chosen) = layers {
            if chosen.is_empty() {
                return Err(StyleError::EmptyLayerSet("style"));
            }
            self.style_layers = chosen.to_vec();
            self.sync_keep();
        }
        self.ratio = ratio;

        let acts = self.reference_acts(style)?;
        let mut grams = BTreeMap::new();
        for &layer in &self.style_layers {
            let act = take_act(&acts, layer)?;
            grams.insert(layer, gram(act));
        }
        self.style_grams = Some(grams);
        Ok(())
    }

    /// Capture the content reference: raw activations of the content
    /// layers.
    ///
    /// - `content`: [3, h, w] — content image pixels in `[0, 1]`
    /// - `layers`: replacement content layer set, if the caller wants one
    pub fn prime_content(
        &mut self,
        content: Tensor<B, 3>,
        layers: Option<&[LayerId]>,
    ) -> StyleResult<()> {
        if let Some(chosen) = layers {
            if chosen.is_empty() {
                return Err(StyleError::EmptyLayerSet("content"));
            }
            self.content_layers = chosen.to_vec();
            self.sync_keep();
        }

        let acts = self.reference_acts(content)?;
        let mut kept = BTreeMap::new();
        for &layer in &self.content_layers {
            kept.insert(layer, take_act(&acts, layer)?);
        }
        self.content_acts = Some(kept);
        Ok(())
    }

    /// Score a candidate image against the primed references.
    ///
    /// The style term is the sum-reduced MSE between Gram matrices,
    /// averaged over the style layers. The content term is the
    /// mean-reduced MSE on raw activations, summed over the content
    /// layers. The result keeps the candidate's autodiff graph, so
    /// callers can backpropagate straight into the image.
    ///
    /// - `candidate`: [1, 3, h, w] — pixels in `[0, 1]`
    pub fn evaluate(&self, candidate: Tensor<B, 4>) -> StyleResult<Tensor<B, 1>> {
        let grams = self
            .style_grams
            .as_ref()
            .ok_or(StyleError::NotPrimed("style"))?;
        let content_refs = self
            .content_acts
            .as_ref()
            .ok_or(StyleError::NotPrimed("content"))?;

        let acts = self
            .extractor
            .extract(normalize(candidate), GradMode::Track)?;
        let device = self.extractor.device();

        let mut style_term = Tensor::<B, 1>::zeros([1], &device);
        for &layer in &self.style_layers {
            let act = take_act(&acts, layer)?;
            let reference = grams
                .get(&layer)
                .ok_or_else(|| stale_reference(layer))?
                .clone();
            style_term = style_term + MseLoss::new().forward(gram(act), reference, Reduction::Sum);
        }
        style_term = style_term / self.style_layers.len() as f32;

        let mut content_term = Tensor::<B, 1>::zeros([1], &device);
        for &layer in &self.content_layers {
            let act = take_act(&acts, layer)?;
            let reference = content_refs
                .get(&layer)
                .ok_or_else(|| stale_reference(layer))?
                .clone();
            content_term = content_term + MseLoss::new().forward(act, reference, Reduction::Mean);
        }

        Ok(content_term + style_term * self.ratio)
    }

    /// The extractor captures the union of both layer sets.
    fn sync_keep(&mut self) {
        let mut keep = self.style_layers.clone();
        keep.extend_from_slice(&self.content_layers);
        self.extractor.set_keep(&keep);
    }

    /// Batch, normalise and extract reference activations, detached.
    fn reference_acts(
        &self,
        image: Tensor<B, 3>,
    ) -> StyleResult<BTreeMap<LayerId, Tensor<B, 4>>> {
        let batch: Tensor<B, 4> = image.unsqueeze();
        self.extractor.extract(normalize(batch), GradMode::Detach)
    }
}

fn take_act<B: Backend>(
    acts: &BTreeMap<LayerId, Tensor<B, 4>>,
    layer: LayerId,
) -> StyleResult<Tensor<B, 4>> {
    acts.get(&layer)
        .cloned()
        .ok_or_else(|| StyleError::Internal(format!("activation for {layer} was not captured")))
}

fn stale_reference(layer: LayerId) -> StyleError {
    StyleError::Internal(format!("reference for {layer} is missing; prime again"))
}
