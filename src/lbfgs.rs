//! Limited-memory BFGS with a backtracking line search.
//!
//! Operates on flat parameter vectors of a plain (non-autodiff)
//! backend. The caller supplies an objective closure returning the
//! loss and its gradient at a trial point; a single [`step`] may call
//! that closure several times while it searches along the descent
//! direction, exactly like the closure-taking optimisers in other
//! deep-learning stacks.
//!
//! [`step`]: Lbfgs::step

use std::collections::VecDeque;

use burn::prelude::*;
use burn::tensor::ElementConversion;

use crate::error::{StyleError, StyleResult};

/// Optimiser knobs. The defaults are the ones the transfer loop uses:
/// step length 0.3 and ten curvature pairs.
#[derive(Debug, Clone)]
pub struct LbfgsConfig {
    /// Initial step length of every line search.
    pub lr: f64,
    /// Curvature pairs retained for the two-loop recursion.
    pub history: usize,
    /// Halvings tried before a step is abandoned.
    pub max_backtracks: usize,
    /// Armijo sufficient-decrease constant.
    pub armijo_c1: f64,
    /// Minimum `s . y` for a pair to enter the history.
    pub curvature_eps: f64,
}

impl Default for LbfgsConfig {
    fn default() -> Self {
        LbfgsConfig {
            lr: 0.3,
            history: 10,
            max_backtracks: 8,
            armijo_c1: 1e-4,
            curvature_eps: 1e-10,
        }
    }
}

/// One (s, y) displacement/gradient-change pair.
struct CurvaturePair<I: Backend> {
    s: Tensor<I, 1>,
    y: Tensor<I, 1>,
    rho: f32,
}

/// The optimiser state: configuration plus bounded curvature history.
pub struct Lbfgs<I: Backend> {
    config: LbfgsConfig,
    pairs: VecDeque<CurvaturePair<I>>,
}

/// What one outer step produced.
pub struct StepOutcome<I: Backend> {
    /// The parameter vector after the step (unchanged if rejected).
    pub x: Tensor<I, 1>,
    /// Loss at the point the step started from.
    pub entry_loss: f32,
    /// Objective evaluations consumed by the step.
    pub evaluations: usize,
    /// Whether the line search accepted a new point.
    pub accepted: bool,
}

impl<I: Backend> Lbfgs<I> {
    pub fn new(config: LbfgsConfig) -> Self {
        Lbfgs {
            config,
            pairs: VecDeque::new(),
        }
    }

    /// Curvature pairs currently held.
    pub fn history_len(&self) -> usize {
        self.pairs.len()
    }

    /// One outer iteration: evaluate, pick a direction from history,
    /// backtrack until the Armijo test passes, update history.
    ///
    /// `iteration` only labels errors. A non-finite loss at the entry
    /// point is reported rather than silently stepped over.
    pub fn step<F>(
        &mut self,
        iteration: usize,
        x: Tensor<I, 1>,
        objective: &mut F,
    ) -> StyleResult<StepOutcome<I>>
    where
        F: FnMut(Tensor<I, 1>) -> StyleResult<(f32, Tensor<I, 1>)>,
    {
        let (f0, g0) = objective(x.clone())?;
        let mut evaluations = 1;
        if !f0.is_finite() {
            return Err(StyleError::NonFiniteLoss {
                iteration,
                value: f0,
            });
        }

        let mut direction = self.two_loop(g0.clone());
        let mut dd = dot(&g0, &direction);
        if dd >= 0.0 {
            // History contradicts the local geometry; fall back to
            // steepest descent.
            self.pairs.clear();
            direction = g0.clone().neg();
            dd = dot(&g0, &direction);
        }
        if dd >= 0.0 {
            // Gradient is zero (or numerically dead): nowhere to go.
            return Ok(StepOutcome {
                x,
                entry_loss: f0,
                evaluations,
                accepted: false,
            });
        }

        // With no curvature yet, damp the step by the gradient scale.
        let mut t = if self.pairs.is_empty() {
            let g_l1: f64 = g0.clone().abs().sum().into_scalar().elem();
            self.config.lr * (1.0 / g_l1).min(1.0)
        } else {
            self.config.lr
        };

        for _ in 0..=self.config.max_backtracks {
            let candidate = x.clone() + direction.clone() * t;
            let (f1, g1) = objective(candidate.clone())?;
            evaluations += 1;

            let bound = f0 as f64 + self.config.armijo_c1 * t * dd as f64;
            if f1.is_finite() && (f1 as f64) <= bound {
                let s = direction * t;
                let y = g1 - g0;
                let sy = dot(&s, &y);
                if self.config.history > 0 && sy as f64 > self.config.curvature_eps {
                    if self.pairs.len() == self.config.history {
                        self.pairs.pop_front();
                    }
                    self.pairs.push_back(CurvaturePair {
                        s,
                        y,
                        rho: 1.0 / sy,
                    });
                }
                return Ok(StepOutcome {
                    x: candidate,
                    entry_loss: f0,
                    evaluations,
                    accepted: true,
                });
            }
            t *= 0.5;
        }

        Ok(StepOutcome {
            x,
            entry_loss: f0,
            evaluations,
            accepted: false,
        })
    }

    /// Two-loop recursion: approximate `H^-1 g` from the history, then
    /// negate into a descent direction.
    fn two_loop(&self, g: Tensor<I, 1>) -> Tensor<I, 1> {
        let mut q = g;
        let mut alphas = Vec::with_capacity(self.pairs.len());
        for pair in self.pairs.iter().rev() {
            let alpha = pair.rho * dot(&pair.s, &q);
            q = q - pair.y.clone() * alpha;
            alphas.push(alpha);
        }

        // Scale by gamma = (s.y) / (y.y) of the newest pair.
        if let Some(newest) = self.pairs.back() {
            let yy = dot(&newest.y, &newest.y);
            if yy > 0.0 {
                q = q * (1.0 / (newest.rho * yy));
            }
        }

        for (pair, alpha) in self.pairs.iter().zip(alphas.into_iter().rev()) {
            let beta = pair.rho * dot(&pair.y, &q);
            q = q + pair.s.clone() * (alpha - beta);
        }
        q.neg()
    }
}

fn dot<I: Backend>(a: &Tensor<I, 1>, b: &Tensor<I, 1>) -> f32 {
    (a.clone() * b.clone()).sum().into_scalar().elem()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type I = NdArray;

    fn vector(vals: &[f32]) -> Tensor<I, 1> {
        let device = Default::default();
        Tensor::from_data(
            burn::tensor::TensorData::new(vals.to_vec(), [vals.len()]),
            &device,
        )
    }

    /// f(x) = 0.5 * ||x - target||^2, the identity-Hessian quadratic.
    fn quadratic(
        target: Tensor<I, 1>,
    ) -> impl FnMut(Tensor<I, 1>) -> StyleResult<(f32, Tensor<I, 1>)> {
        move |x: Tensor<I, 1>| {
            let diff = x - target.clone();
            let value: f32 = (diff.clone() * diff.clone() * 0.5).sum().into_scalar().elem();
            Ok((value, diff))
        }
    }

    #[test]
    fn converges_on_a_quadratic() {
        let target = vector(&[1.0, -2.0, 3.0]);
        let mut objective = quadratic(target);
        let mut opt = Lbfgs::new(LbfgsConfig::default());

        let mut x = vector(&[0.0, 0.0, 0.0]);
        let mut last = f32::INFINITY;
        for i in 0..30 {
            let out = opt.step(i, x, &mut objective).unwrap();
            x = out.x;
            last = out.entry_loss;
        }
        assert!(last < 1e-5, "loss after 30 steps: {last}");
    }

    #[test]
    fn entry_loss_is_the_loss_before_moving() {
        let target = vector(&[2.0, 2.0]);
        let mut objective = quadratic(target);
        let mut opt = Lbfgs::new(LbfgsConfig::default());

        let x = vector(&[0.0, 0.0]);
        let out = opt.step(0, x, &mut objective).unwrap();
        // f(0) = 0.5 * (4 + 4)
        assert!((out.entry_loss - 4.0).abs() < 1e-6);
        assert!(out.accepted);
        assert!(out.evaluations >= 2, "entry eval plus line search");
    }

    #[test]
    fn accepted_steps_strictly_descend() {
        let target = vector(&[-1.5, 0.5, 2.0, -3.0]);
        let mut objective = quadratic(target);
        let mut opt = Lbfgs::new(LbfgsConfig::default());

        let mut x = vector(&[1.0, 1.0, 1.0, 1.0]);
        let mut losses = Vec::new();
        for i in 0..10 {
            let out = opt.step(i, x, &mut objective).unwrap();
            assert!(out.accepted, "step {i} rejected");
            x = out.x;
            losses.push(out.entry_loss);
        }
        for pair in losses.windows(2) {
            assert!(pair[1] < pair[0], "no descent: {:?}", losses);
        }
    }

    #[test]
    fn history_respects_the_bound() {
        let target = vector(&[4.0, -4.0, 4.0, -4.0, 4.0]);
        let mut objective = quadratic(target);
        let mut opt = Lbfgs::new(LbfgsConfig {
            history: 3,
            ..LbfgsConfig::default()
        });

        let mut x = vector(&[0.0; 5]);
        for i in 0..10 {
            x = opt.step(i, x, &mut objective).unwrap().x;
            assert!(opt.history_len() <= 3);
        }
        assert!(opt.history_len() > 0, "quadratic should yield curvature");
    }

    #[test]
    fn non_finite_entry_loss_is_an_error() {
        let mut objective =
            |x: Tensor<I, 1>| -> StyleResult<(f32, Tensor<I, 1>)> { Ok((f32::NAN, x)) };
        let mut opt = Lbfgs::new(LbfgsConfig::default());

        match opt.step(4, vector(&[1.0]), &mut objective) {
            Err(StyleError::NonFiniteLoss { iteration, value }) => {
                assert_eq!(iteration, 4);
                assert!(value.is_nan());
            }
            other => panic!("expected NonFiniteLoss, got {:?}", other.map(|o| o.accepted)),
        }
    }

    #[test]
    fn zero_gradient_means_no_move() {
        let mut objective = |x: Tensor<I, 1>| -> StyleResult<(f32, Tensor<I, 1>)> {
            let zero = x.zeros_like();
            Ok((0.25, zero))
        };
        let mut opt = Lbfgs::new(LbfgsConfig::default());

        let out = opt.step(0, vector(&[1.0, 2.0]), &mut objective).unwrap();
        assert!(!out.accepted);
        assert_eq!(out.evaluations, 1);
        let data = out.x.to_data();
        assert_eq!(data.as_slice::<f32>().unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn negative_curvature_is_kept_out_of_history() {
        // f(x) = -0.5 * ||x||^2: every step descends but s.y < 0.
        let mut objective = |x: Tensor<I, 1>| -> StyleResult<(f32, Tensor<I, 1>)> {
            let value: f32 = (x.clone() * x.clone() * -0.5).sum().into_scalar().elem();
            Ok((value, x.neg()))
        };
        let mut opt = Lbfgs::new(LbfgsConfig::default());

        let mut x = vector(&[1.0]);
        let mut entry = 0.0;
        for i in 0..3 {
            let out = opt.step(i, x, &mut objective).unwrap();
            assert!(out.accepted);
            x = out.x;
            entry = out.entry_loss;
        }
        assert_eq!(opt.history_len(), 0);
        assert!(entry < -0.5, "loss should keep falling, got {entry}");
    }
}
