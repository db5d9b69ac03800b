//! The transfer loop: drive a canvas down a primed perceptual loss.
//!
//! Each optimiser step re-renders the canvas, evaluates the loss,
//! backpropagates into the canvas parameters and hands the flat
//! gradient to L-BFGS. Nothing else in the system owns gradients;
//! the VGG weights stay frozen throughout.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;

use crate::canvas::Canvas;
use crate::error::{StyleError, StyleResult};
use crate::lbfgs::{Lbfgs, LbfgsConfig};
use crate::perceptual::{FeatureExtractor, LayerId, PerceptualLoss};

/// Loop configuration. Defaults: 15 outer iterations, step 0.3, ten
/// curvature pairs, a progress line every 10 iterations.
#[derive(Debug, Clone)]
pub struct StylizeConfig {
    pub iterations: usize,
    pub lr: f64,
    pub history: usize,
    /// Progress cadence in iterations; 0 disables progress entirely.
    pub report_every: usize,
    pub quiet: bool,
}

impl Default for StylizeConfig {
    fn default() -> Self {
        StylizeConfig {
            iterations: 15,
            lr: 0.3,
            history: 10,
            report_every: 10,
            quiet: false,
        }
    }
}

/// Measurements from one finished run.
pub struct OptimizeReport {
    /// Entry loss of each outer iteration.
    pub trace: Vec<f32>,
    /// Loss of the canvas the run settled on.
    pub final_loss: f32,
    /// Objective evaluations over the whole run, line search included.
    pub evaluations: usize,
}

impl OptimizeReport {
    pub fn initial_loss(&self) -> Option<f32> {
        self.trace.first().copied()
    }
}

/// Run the L-BFGS loop over `canvas` against `loss`.
///
/// The canvas is left at the best point found; the report carries the
/// loss trace. A non-finite loss anywhere aborts with the iteration
/// that produced it.
pub fn optimize<B: AutodiffBackend>(
    loss: &PerceptualLoss<B>,
    canvas: &mut Canvas<B>,
    config: &StylizeConfig,
) -> StyleResult<OptimizeReport> {
    let mut opt = Lbfgs::new(LbfgsConfig {
        lr: config.lr,
        history: config.history,
        ..LbfgsConfig::default()
    });

    let mut x = canvas.flat_params();
    let n = x.dims()[0];
    let mut trace = Vec::with_capacity(config.iterations);
    let mut evaluations = 0;

    for i in 0..config.iterations {
        // The objective renders the canvas at the trial point,
        // evaluates the loss and backpropagates into the parameters.
        // Gradients never accumulate across calls: every render starts
        // a fresh graph.
        let mut objective = |flat: Tensor<B::InnerBackend, 1>| {
            canvas.set_flat_params(flat);
            let value_t = loss.evaluate(canvas.render())?;
            let value: f32 = value_t.clone().into_scalar().elem();
            let grads = value_t.backward();
            let grad = canvas.grad(&grads).ok_or_else(|| {
                StyleError::Internal("canvas gradient missing after backward".into())
            })?;
            Ok((value, grad.reshape([n])))
        };

        let out = opt.step(i, x, &mut objective)?;
        x = out.x;
        evaluations += out.evaluations;
        trace.push(out.entry_loss);

        if !config.quiet && config.report_every > 0 && i % config.report_every == 0 {
            eprintln!("  [{}/{}] loss {:.5}", i, config.iterations, out.entry_loss);
        }
    }

    canvas.set_flat_params(x);
    let final_loss: f32 = loss.evaluate(canvas.render())?.into_scalar().elem();
    evaluations += 1;
    if !final_loss.is_finite() {
        return Err(StyleError::NonFiniteLoss {
            iteration: config.iterations,
            value: final_loss,
        });
    }

    Ok(OptimizeReport {
        trace,
        final_loss,
        evaluations,
    })
}

/// Owns a loss over a frozen extractor plus a loop configuration.
/// One instance serves many content/style pairs; each run re-primes
/// the references and starts a fresh canvas from the content image.
pub struct Stylizer<B: AutodiffBackend> {
    loss: PerceptualLoss<B>,
    config: StylizeConfig,
}

impl<B: AutodiffBackend> Stylizer<B> {
    pub fn new(extractor: FeatureExtractor<B>, config: StylizeConfig) -> Self {
        Stylizer {
            loss: PerceptualLoss::new(extractor),
            config,
        }
    }

    pub fn device(&self) -> B::Device {
        self.loss.device()
    }

    /// Transfer `style` onto `content` with the stock layer sets.
    ///
    /// - `content`: [3, h, w] pixels in `[0, 1]`; fixes the output size
    /// - `style`: [3, h, w] pixels in `[0, 1]`
    /// - `ratio`: weight of the style term relative to content
    ///
    /// Returns the stylized image ([3, h, w] on the inner backend)
    /// and the run report.
    pub fn run(
        &mut self,
        content: Tensor<B, 3>,
        style: Tensor<B, 3>,
        ratio: f64,
    ) -> StyleResult<(Tensor<B::InnerBackend, 3>, OptimizeReport)> {
        self.run_with_layers(content, style, ratio, None, None)
    }

    /// [`run`](Stylizer::run) with optional layer-set overrides.
    pub fn run_with_layers(
        &mut self,
        content: Tensor<B, 3>,
        style: Tensor<B, 3>,
        ratio: f64,
        style_layers: Option<&[LayerId]>,
        content_layers: Option<&[LayerId]>,
    ) -> StyleResult<(Tensor<B::InnerBackend, 3>, OptimizeReport)> {
        self.loss.prime_style(style, ratio, style_layers)?;
        self.loss.prime_content(content.clone(), content_layers)?;

        let mut canvas = Canvas::from_content(content);
        let report = optimize(&self.loss, &mut canvas, &self.config)?;
        Ok((canvas.into_image(), report))
    }
}
