use crate::args::Args;
use crate::model::plt::Plt;
use crate::util::derive_seed;
use crate::{FeatureMat, Index, IndexValueVec, LabelMat, Result};
use hashbrown::HashMap;
use itertools::Itertools;
use log::info;
use ordered_float::NotNan;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

fn member_dir(dir: &Path, member_no: usize) -> PathBuf {
    dir.join(format!("member_{}", member_no))
}

/// Running per-label score while members contribute their predictions.
struct EnsemblePrediction {
    value: f64,
    members: Vec<usize>,
}

/// A set of independently trained PLTs whose per-label scores are averaged.
///
/// Members share the label space but nothing else; trees and classifiers are
/// trained from per-member derived seeds. In on-the-trot mode members are not
/// kept resident and get reloaded from the model directory one at a time.
pub struct Ensemble {
    members: Vec<Plt>,
    n_members: usize,
    dir: PathBuf,
}

impl Ensemble {
    pub(crate) fn from_members(members: Vec<Plt>) -> Ensemble {
        let n_members = members.len();
        Ensemble {
            members,
            n_members,
            dir: PathBuf::new(),
        }
    }

    pub fn n_members(&self) -> usize {
        self.n_members
    }

    pub fn n_labels(&self) -> Result<usize> {
        if let Some(member) = self.members.first() {
            Ok(member.n_labels())
        } else {
            Ok(self.load_member(0)?.n_labels())
        }
    }

    /// Trains `args.ensemble` members into `member_i/` subdirectories, each
    /// from its own derived seed. Members are dropped as soon as they are
    /// saved; prediction reloads what it needs.
    pub fn train(
        labels: &LabelMat,
        features: &FeatureMat,
        args: &Args,
        output: &Path,
    ) -> Result<Ensemble> {
        info!("Training ensemble of {} models", args.ensemble);
        for member_no in 0..args.ensemble {
            let dir = member_dir(output, member_no);
            fs::create_dir_all(&dir)?;
            let mut member_args = args.clone();
            member_args.seed = derive_seed(args.seed, member_no as u64);
            Plt::train(labels, features, &member_args, &dir)?;
        }
        Ok(Ensemble {
            members: Vec::new(),
            n_members: args.ensemble,
            dir: output.to_path_buf(),
        })
    }

    /// Loads the ensemble; with `onTheTrotPrediction` only the directory is
    /// remembered and members are loaded lazily.
    pub fn load(dir: &Path, args: &Args) -> Result<Ensemble> {
        let members = if args.on_the_trot_prediction {
            Vec::new()
        } else {
            info!("Loading ensemble of {} models", args.ensemble);
            (0..args.ensemble)
                .map(|member_no| Plt::load(&member_dir(dir, member_no)))
                .collect::<Result<Vec<_>>>()?
        };
        Ok(Ensemble {
            members,
            n_members: args.ensemble,
            dir: dir.to_path_buf(),
        })
    }

    fn load_member(&self, member_no: usize) -> Result<Plt> {
        info!("Loading ensemble member {}", member_no);
        Plt::load(&member_dir(&self.dir, member_no))
    }

    /// Runs `f` against a member, resident or transiently loaded.
    fn with_member<R>(&self, member_no: usize, f: impl FnOnce(&Plt) -> R) -> Result<R> {
        match self.members.get(member_no) {
            Some(member) => Ok(f(member)),
            None => Ok(f(&self.load_member(member_no)?)),
        }
    }

    fn accumulate(
        accumulated: &mut HashMap<Index, EnsemblePrediction>,
        prediction: &IndexValueVec,
        member_no: usize,
    ) {
        for &(label, value) in prediction {
            accumulated
                .entry(label)
                .and_modify(|p| {
                    p.value += value as f64;
                    p.members.push(member_no);
                })
                .or_insert_with(|| EnsemblePrediction {
                    value: value as f64,
                    members: vec![member_no],
                });
        }
    }

    fn finalize(
        accumulated: HashMap<Index, EnsemblePrediction>,
        n_members: usize,
        top_k: usize,
    ) -> IndexValueVec {
        let mut predictions = accumulated
            .into_iter()
            .map(|(label, p)| (label, (p.value / n_members as f64) as f32))
            .collect_vec();
        predictions.sort_unstable_by(|&(ll, lv), &(rl, rv)| {
            NotNan::new(rv)
                .expect("ensemble scores are finite")
                .cmp(&NotNan::new(lv).expect("ensemble scores are finite"))
                .then(ll.cmp(&rl))
        });
        if top_k > 0 {
            predictions.truncate(top_k);
        }
        predictions
    }

    pub fn predict(&self, x: &[(Index, f32)], args: &Args) -> Result<IndexValueVec> {
        let mut accumulated = HashMap::new();
        for member_no in 0..self.n_members {
            self.with_member(member_no, |member| {
                let prediction = member.predict(x, args.top_k, args.threshold);
                Self::accumulate(&mut accumulated, &prediction, member_no);
            })?;
        }

        // Averaging is only unbiased if every member scores every surfaced
        // label, so fill in the scores the top-k cut dropped.
        if args.ens_missing_scores {
            for member_no in 0..self.n_members {
                self.with_member(member_no, |member| {
                    for (&label, p) in accumulated.iter_mut() {
                        if !p.members.contains(&member_no) {
                            p.value += member.predict_for_label(label, x) as f64;
                        }
                    }
                })?;
            }
        }

        Ok(Self::finalize(accumulated, self.n_members, args.top_k))
    }

    /// Batch prediction that keeps at most one member resident at a time.
    pub fn predict_batch(&self, features: &FeatureMat, args: &Args) -> Result<Vec<IndexValueVec>> {
        if !args.on_the_trot_prediction && !self.members.is_empty() {
            return (0..features.rows())
                .into_par_iter()
                .map(|r| self.predict(features.row(r), args))
                .collect();
        }

        let n_rows = features.rows();
        let mut accumulated: Vec<HashMap<Index, EnsemblePrediction>> =
            (0..n_rows).map(|_| HashMap::new()).collect();

        for member_no in 0..self.n_members {
            let member = self.load_member(member_no)?;
            let member_predictions: Vec<IndexValueVec> = (0..n_rows)
                .into_par_iter()
                .map(|r| member.predict(features.row(r), args.top_k, args.threshold))
                .collect();
            for (acc, prediction) in accumulated.iter_mut().zip(&member_predictions) {
                Self::accumulate(acc, prediction, member_no);
            }
        }

        if args.ens_missing_scores {
            for member_no in 0..self.n_members {
                let member = self.load_member(member_no)?;
                accumulated
                    .par_iter_mut()
                    .enumerate()
                    .for_each(|(r, acc)| {
                        for (&label, p) in acc.iter_mut() {
                            if !p.members.contains(&member_no) {
                                p.value +=
                                    member.predict_for_label(label, features.row(r)) as f64;
                            }
                        }
                    });
            }
        }

        Ok(accumulated
            .into_iter()
            .map(|acc| Self::finalize(acc, self.n_members, args.top_k))
            .collect())
    }

    pub fn predict_for_label(&self, label: Index, x: &[(Index, f32)]) -> Result<f32> {
        let mut sum = 0f64;
        for member_no in 0..self.n_members {
            sum += self.with_member(member_no, |member| member.predict_for_label(label, x))? as f64;
        }
        Ok((sum / self.n_members as f64) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::TreeType;
    use crate::model::base::Base;
    use crate::model::tree::Tree;
    use crate::LabelMat;

    /// Two-label PLT with constant leaf probabilities.
    fn member(p0: f32, p1: f32) -> Plt {
        let mut args = Args::default();
        args.tree_type = TreeType::CompleteInOrder;
        let mut labels = LabelMat::new();
        labels.append_row(vec![0]);
        labels.append_row(vec![1]);
        let mut features = FeatureMat::new();
        features.append_row(vec![(2, 1.)]);
        features.append_row(vec![(2, 1.)]);
        let tree = Tree::build(&labels, &features, &args).unwrap();
        let bases = vec![
            Base::Constant { probability: 1.0 },
            Base::Constant { probability: p0 },
            Base::Constant { probability: p1 },
        ];
        Plt::from_parts(tree, bases)
    }

    #[test]
    fn test_missing_score_backfill() {
        // Member A surfaces only label 0, member B only label 1
        let ensemble = Ensemble::from_members(vec![member(0.9, 0.2), member(0.3, 0.7)]);
        let mut args = Args::default();
        args.top_k = 1;
        args.ens_missing_scores = true;
        args.ensemble = 2;

        let x = [(2, 1.)];
        let mut args_all = args.clone();
        args_all.top_k = 2;
        let predictions = ensemble.predict(&x, &args_all).unwrap();
        assert_eq!(2, predictions.len());
        assert_eq!(0, predictions[0].0);
        assert!((predictions[0].1 - (0.9 + 0.3) / 2.).abs() < 1e-6);
        assert_eq!(1, predictions[1].0);
        assert!((predictions[1].1 - (0.2 + 0.7) / 2.).abs() < 1e-6);
    }

    #[test]
    fn test_no_backfill_averages_over_all_members_anyway() {
        let ensemble = Ensemble::from_members(vec![member(0.9, 0.2), member(0.3, 0.7)]);
        let mut args = Args::default();
        args.top_k = 1;
        args.ens_missing_scores = false;
        args.ensemble = 2;

        // Each member contributes one label; sums still divide by 2
        let predictions = ensemble.predict(&[(2, 1.)], &args).unwrap();
        assert_eq!(1, predictions.len());
        assert_eq!(0, predictions[0].0);
        assert!((predictions[0].1 - 0.45).abs() < 1e-6);
    }

    #[test]
    fn test_singleton_ensemble_matches_bare_plt() {
        let plt = member(0.8, 0.4);
        let expected = plt.predict(&[(2, 1.)], 2, 0.);

        let ensemble = Ensemble::from_members(vec![member(0.8, 0.4)]);
        let mut args = Args::default();
        args.top_k = 2;
        args.ensemble = 1;
        let predictions = ensemble.predict(&[(2, 1.)], &args).unwrap();

        assert_eq!(expected.len(), predictions.len());
        for ((el, ev), (pl, pv)) in expected.iter().zip(&predictions) {
            assert_eq!(el, pl);
            assert!((ev - pv).abs() < 1e-6);
        }
    }

    #[test]
    fn test_predict_for_label_averages_members() {
        let ensemble = Ensemble::from_members(vec![member(0.9, 0.2), member(0.3, 0.7)]);
        let p = ensemble.predict_for_label(0, &[(2, 1.)]).unwrap();
        assert!((p - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_train_and_on_the_trot_batch() {
        let mut labels = LabelMat::new();
        let mut features = FeatureMat::new();
        for round in 0..5u32 {
            for l in 0..3u32 {
                labels.append_row(vec![l]);
                features.append_row(vec![(1, 1.), (2 + l, 1.), (5, 0.1 * round as f32)]);
            }
        }

        let mut args = Args::default();
        args.ensemble = 2;
        args.tree_type = TreeType::CompleteInOrder;
        args.top_k = 1;

        let dir = tempfile::tempdir().unwrap();
        Ensemble::train(&labels, &features, &args, dir.path()).unwrap();

        args.on_the_trot_prediction = true;
        let ensemble = Ensemble::load(dir.path(), &args).unwrap();
        let predictions = ensemble.predict_batch(&features, &args).unwrap();
        assert_eq!(features.rows(), predictions.len());
        for (r, prediction) in predictions.iter().enumerate() {
            assert_eq!(1, prediction.len());
            assert_eq!(labels.row(r)[0], prediction[0].0);
        }
    }
}
