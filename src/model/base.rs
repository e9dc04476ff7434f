use crate::args::{Args, LossType, OptimizerType};
use crate::mat::dot_sparse;
use crate::model::liblinear::{solve_l2r_l2_svc, solve_l2r_lr_dual};
use crate::{DenseVec, Index, IndexValueVec};
use itertools::Itertools;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// Logistic link with the exponent clamped to [-8, 8]; scores beyond the
/// clamp saturate to 0 or 1 instead of overflowing.
pub(crate) fn sigmoid(score: f32) -> f32 {
    if score < -8. {
        0.
    } else if score > 8. {
        1.
    } else {
        1. / (1. + (-score).exp())
    }
}

/// Hyper-parameters for fitting node classifiers.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct TrainConfig {
    pub optimizer: OptimizerType,
    pub loss: LossType,
    pub cost: f32,
    pub eps: f32,
    pub max_iter: u32,
    pub weights_threshold: f32,
    pub eta: f32,
    pub epochs: u32,
    pub l2_penalty: f32,
    pub adagrad_eps: f32,
    pub fobos_penalty: f32,
}

impl TrainConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            optimizer: args.optimizer,
            loss: args.loss,
            cost: args.cost,
            eps: args.eps,
            max_iter: args.max_iter,
            weights_threshold: args.weights_threshold,
            eta: args.eta,
            epochs: args.epochs,
            l2_penalty: args.l2_penalty,
            adagrad_eps: args.adagrad_eps,
            fobos_penalty: args.fobos_penalty,
        }
    }
}

/// Binary probabilistic classifier attached to a single tree node.
///
/// Weights live in the same index space as the feature rows, bias slot
/// included, and are pruned to the configured threshold after fitting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Base {
    /// All training targets agreed, so no solver ran; scoring returns the
    /// observed positive rate.
    Constant { probability: f32 },
    Linear { weights: IndexValueVec },
}

impl Base {
    /// Fits a classifier on the given rows. `weights` are per-example
    /// instance weights; `None` means uniform.
    pub fn fit(
        rows: &[&[(Index, f32)]],
        targets: &[bool],
        weights: Option<&[f32]>,
        n_features: usize,
        config: &TrainConfig,
        seed: u64,
    ) -> Base {
        assert_eq!(rows.len(), targets.len());
        if let Some(w) = weights {
            assert_eq!(rows.len(), w.len());
        }

        let total: f32 = match weights {
            Some(w) => w.iter().sum(),
            None => rows.len() as f32,
        };
        let positive: f32 = match weights {
            Some(w) => targets
                .iter()
                .zip(w.iter())
                .filter(|(t, _)| **t)
                .map(|(_, &wi)| wi)
                .sum(),
            None => targets.iter().filter(|&&t| t).count() as f32,
        };

        // Degenerate node: nothing to separate.
        if rows.is_empty() || positive == 0. || positive == total {
            return Base::Constant {
                probability: if total > 0. { positive / total } else { 0. },
            };
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let dense = match config.optimizer {
            OptimizerType::Liblinear => {
                let c = match weights {
                    Some(w) => w.iter().map(|&wi| config.cost * wi).collect_vec(),
                    None => vec![config.cost; rows.len()],
                };
                match config.loss {
                    LossType::Hinge => solve_l2r_l2_svc(
                        rows,
                        targets,
                        &c,
                        config.eps,
                        config.max_iter,
                        n_features,
                        &mut rng,
                    ),
                    LossType::Log => solve_l2r_lr_dual(
                        rows,
                        targets,
                        &c,
                        config.eps,
                        config.max_iter,
                        n_features,
                        &mut rng,
                    ),
                }
            }
            optimizer => fit_online(rows, targets, weights, n_features, config, optimizer, &mut rng),
        };

        let mut sparse: IndexValueVec = dense
            .indexed_iter()
            .filter_map(|(index, &value)| {
                if value.abs() <= config.weights_threshold {
                    None
                } else {
                    Some((index as Index, value))
                }
            })
            .collect();
        sparse.shrink_to_fit();

        Base::Linear { weights: sparse }
    }

    /// Probability of the positive branch for a query row.
    pub fn probability(&self, x: &[(Index, f32)]) -> f32 {
        match self {
            Base::Constant { probability } => *probability,
            Base::Linear { weights } => sigmoid(dot_sparse(weights, x)),
        }
    }

    /// Drops weights at or below the given magnitude.
    pub fn prune(&mut self, threshold: f32) {
        if let Base::Linear { weights } = self {
            weights.retain(|&(_, v)| v.abs() > threshold);
            weights.shrink_to_fit();
        }
    }

    pub fn n_weights(&self) -> usize {
        match self {
            Base::Constant { .. } => 0,
            Base::Linear { weights } => weights.len(),
        }
    }
}

/// Online logistic regression with SGD / AdaGrad / FOBOS updates.
fn fit_online(
    rows: &[&[(Index, f32)]],
    targets: &[bool],
    weights: Option<&[f32]>,
    n_features: usize,
    config: &TrainConfig,
    optimizer: OptimizerType,
    rng: &mut StdRng,
) -> DenseVec {
    let mut w = DenseVec::zeros(n_features);
    let mut grad_squares = match optimizer {
        OptimizerType::Adagrad => DenseVec::zeros(n_features),
        _ => DenseVec::zeros(0),
    };

    let mut order = (0..rows.len()).collect_vec();
    let mut t = 0u64;
    for _ in 0..config.epochs {
        order.shuffle(rng);
        for &i in &order {
            t += 1;
            let row = rows[i];
            let score: f32 = row.iter().map(|&(j, v)| v * w[j as usize]).sum();
            let target = if targets[i] { 1. } else { 0. };
            let instance_weight = weights.map_or(1., |ws| ws[i]);
            let grad = (sigmoid(score) - target) * instance_weight;

            match optimizer {
                OptimizerType::Sgd => {
                    let lr = config.eta / (t as f32).sqrt();
                    for &(j, v) in row {
                        let j = j as usize;
                        w[j] -= lr * (grad * v + config.l2_penalty * w[j]);
                    }
                }
                OptimizerType::Adagrad => {
                    for &(j, v) in row {
                        let j = j as usize;
                        let g = grad * v;
                        grad_squares[j] += g * g;
                        w[j] -= config.eta * g / (config.adagrad_eps + grad_squares[j].sqrt());
                    }
                }
                OptimizerType::Fobos => {
                    let lr = config.eta / (t as f32).sqrt();
                    for &(j, v) in row {
                        let j = j as usize;
                        w[j] -= lr * (grad * v + config.l2_penalty * w[j]);
                        // L1 proximal step
                        w[j] = w[j].signum() * (w[j].abs() - lr * config.fobos_penalty).max(0.);
                    }
                }
                OptimizerType::Liblinear => unreachable!(),
            }
        }
    }

    w
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Args;

    fn toy_rows() -> (Vec<Vec<(Index, f32)>>, Vec<bool>) {
        (
            vec![
                vec![(1, 1.0)],
                vec![(1, 0.9), (2, 0.1)],
                vec![(1, 0.8)],
                vec![(2, 1.0)],
                vec![(1, 0.1), (2, 0.9)],
                vec![(2, 0.7)],
            ],
            vec![true, true, true, false, false, false],
        )
    }

    fn config() -> TrainConfig {
        let mut config = TrainConfig::from_args(&Args::default());
        config.cost = 4.;
        config.weights_threshold = 0.;
        config
    }

    #[test]
    fn test_fit_separates_classes() {
        let (rows, targets) = toy_rows();
        let refs = rows.iter().map(|r| r.as_slice()).collect_vec();
        let base = Base::fit(&refs, &targets, None, 3, &config(), 0);
        for (row, &target) in refs.iter().zip(&targets) {
            let p = base.probability(row);
            assert_eq!(target, p > 0.5, "probability {} for {:?}", p, row);
        }
    }

    #[test]
    fn test_degenerate_fit_returns_constant() {
        let (rows, _) = toy_rows();
        let refs = rows.iter().map(|r| r.as_slice()).collect_vec();
        let base = Base::fit(&refs, &[true; 6], None, 3, &config(), 0);
        assert_eq!(Base::Constant { probability: 1.0 }, base);
        assert_eq!(1.0, base.probability(&[(1, 1.)]));

        let base = Base::fit(&refs, &[false; 6], None, 3, &config(), 0);
        assert_eq!(Base::Constant { probability: 0.0 }, base);
    }

    #[test]
    fn test_empty_fit_returns_constant() {
        let base = Base::fit(&[], &[], None, 3, &config(), 0);
        assert_eq!(Base::Constant { probability: 0.0 }, base);
    }

    #[test]
    fn test_sigmoid_clamps_extreme_scores() {
        assert_eq!(0., sigmoid(-9.));
        assert_eq!(1., sigmoid(9.));
        assert_eq!(0.5, sigmoid(0.));
        let base = Base::Linear {
            weights: vec![(1, 100.)],
        };
        assert_eq!(1., base.probability(&[(1, 1.)]));
        assert_eq!(0., base.probability(&[(1, -1.)]));
    }

    #[test]
    fn test_prune_drops_small_weights() {
        let mut base = Base::Linear {
            weights: vec![(1, 0.05), (2, -0.5), (3, 0.2)],
        };
        base.prune(0.2);
        assert_eq!(
            Base::Linear {
                weights: vec![(2, -0.5)]
            },
            base
        );
    }

    #[test]
    fn test_online_optimizers_separate_classes() {
        let (rows, targets) = toy_rows();
        let refs = rows.iter().map(|r| r.as_slice()).collect_vec();
        for optimizer in [OptimizerType::Sgd, OptimizerType::Adagrad] {
            let mut config = config();
            config.optimizer = optimizer;
            config.epochs = 50;
            let base = Base::fit(&refs, &targets, None, 3, &config, 0);
            for (row, &target) in refs.iter().zip(&targets) {
                let p = base.probability(row);
                assert_eq!(target, p > 0.5, "{:?}: probability {} for {:?}", optimizer, p, row);
            }
        }
    }

    #[test]
    fn test_instance_weights_shift_constant_rate() {
        let rows: Vec<Vec<(Index, f32)>> = vec![vec![(1, 1.)], vec![(1, 1.)]];
        let refs = rows.iter().map(|r| r.as_slice()).collect_vec();
        let base = Base::fit(
            &refs,
            &[true, true],
            Some(&[3., 1.]),
            2,
            &config(),
            0,
        );
        assert_eq!(Base::Constant { probability: 1.0 }, base);
    }

    #[test]
    fn test_fit_deterministic_for_fixed_seed() {
        let (rows, targets) = toy_rows();
        let refs = rows.iter().map(|r| r.as_slice()).collect_vec();
        let a = Base::fit(&refs, &targets, None, 3, &config(), 42);
        let b = Base::fit(&refs, &targets, None, 3, &config(), 42);
        assert_eq!(a, b);
    }
}
