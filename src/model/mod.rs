use crate::args::Args;
use crate::{DataSet, Error, FeatureMat, Index, IndexValueVec, LabelMat, Result};
use log::info;
use rayon::prelude::*;
use std::path::Path;
use std::sync::Mutex;

pub mod base;
pub(crate) mod cluster;
pub mod ensemble;
pub mod eval;
pub(crate) mod liblinear;
pub mod plt;
pub mod tree;

pub use self::ensemble::Ensemble;
pub use self::plt::Plt;

/// Model directory layout.
pub const ARGS_FILE: &str = "args.bin";
pub const READER_FILE: &str = "data_reader.bin";
pub const TREE_FILE: &str = "tree.bin";
pub const TREE_TEXT_FILE: &str = "tree.txt";
pub const WEIGHTS_FILE: &str = "weights.bin";

/// Top-level estimator: a bare PLT, or an ensemble of them.
pub enum Model {
    Plt(Plt),
    Ensemble(Ensemble),
}

impl Model {
    /// Trains a model and writes it into the `output` directory.
    pub fn train(dataset: &DataSet, args: &Args, output: &Path) -> Result<Model> {
        args.validate()?;
        if args.ensemble > 1 {
            Ensemble::train(&dataset.labels, &dataset.features, args, output).map(Model::Ensemble)
        } else {
            Plt::train(&dataset.labels, &dataset.features, args, output).map(Model::Plt)
        }
    }

    pub fn load(dir: &Path, args: &Args) -> Result<Model> {
        if args.ensemble > 1 {
            Ensemble::load(dir, args).map(Model::Ensemble)
        } else {
            Plt::load(dir).map(Model::Plt)
        }
    }

    pub fn n_labels(&self) -> Result<usize> {
        match self {
            Model::Plt(plt) => Ok(plt.n_labels()),
            Model::Ensemble(ensemble) => ensemble.n_labels(),
        }
    }

    pub fn predict(&self, x: &[(Index, f32)], args: &Args) -> Result<IndexValueVec> {
        match self {
            Model::Plt(plt) => Ok(plt.predict(x, args.top_k, args.threshold)),
            Model::Ensemble(ensemble) => ensemble.predict(x, args),
        }
    }

    pub fn predict_with_thresholds(&self, x: &[(Index, f32)]) -> Result<IndexValueVec> {
        match self {
            Model::Plt(plt) => Ok(plt.predict_with_thresholds(x)),
            Model::Ensemble(_) => Err(Error::Config(
                "threshold prediction is not available for ensembles".to_string(),
            )),
        }
    }

    pub fn predict_batch(&self, features: &FeatureMat, args: &Args) -> Result<Vec<IndexValueVec>> {
        match self {
            Model::Plt(plt) => Ok(Self::batch_over_rows(features, |x| {
                plt.predict(x, args.top_k, args.threshold)
            })),
            Model::Ensemble(ensemble) => ensemble.predict_batch(features, args),
        }
    }

    pub fn predict_batch_with_thresholds(
        &self,
        features: &FeatureMat,
    ) -> Result<Vec<IndexValueVec>> {
        match self {
            Model::Plt(plt) => Ok(Self::batch_over_rows(features, |x| {
                plt.predict_with_thresholds(x)
            })),
            Model::Ensemble(_) => Err(Error::Config(
                "threshold prediction is not available for ensembles".to_string(),
            )),
        }
    }

    fn batch_over_rows<F>(features: &FeatureMat, predict: F) -> Vec<IndexValueVec>
    where
        F: Fn(&[(Index, f32)]) -> IndexValueVec + Sync,
    {
        let n_rows = features.rows();
        let pb = Mutex::new(crate::util::create_progress_bar(n_rows as u64));
        let start_t = time::precise_time_s();
        let predictions = (0..n_rows)
            .into_par_iter()
            .map(|r| {
                let prediction = predict(features.row(r));
                pb.lock().expect("progress bar poisoned").inc();
                prediction
            })
            .collect();
        pb.lock().expect("progress bar poisoned").finish();
        info!(
            "Predicted {} examples; it took {:.2}s",
            n_rows,
            time::precise_time_s() - start_t
        );
        predictions
    }

    pub fn predict_for_label(&self, label: Index, x: &[(Index, f32)]) -> Result<f32> {
        match self {
            Model::Plt(plt) => Ok(plt.predict_for_label(label, x)),
            Model::Ensemble(ensemble) => ensemble.predict_for_label(label, x),
        }
    }

    pub fn set_thresholds(&mut self, thresholds: &[f32]) -> Result<()> {
        match self {
            Model::Plt(plt) => plt.set_thresholds(thresholds),
            Model::Ensemble(_) => Err(Error::Config(
                "thresholds are not available for ensembles".to_string(),
            )),
        }
    }

    pub fn ofo(&mut self, labels: &LabelMat, features: &FeatureMat, args: &Args) -> Result<Vec<f32>> {
        match self {
            Model::Plt(plt) => Ok(plt.ofo(labels, features, args)),
            Model::Ensemble(_) => Err(Error::Config(
                "F-measure optimization is not available for ensembles".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::TreeType;
    use crate::data::DataReader;

    fn dataset() -> DataSet {
        let text = "\
8 5 4
0 1:1 5:0.1
0 1:0.9
1 2:1
1 2:0.8 5:0.1
2 3:1
2 3:0.9
3 4:1
3 4:0.7 5:0.2
";
        let mut args = Args::default();
        args.norm = false;
        DataReader::from_args(&args).read_from(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_train_save_load_predict_round_trip() {
        let dataset = dataset();
        let mut args = Args::default();
        args.norm = false;
        args.tree_type = TreeType::CompleteInOrder;
        args.top_k = 2;

        let dir = tempfile::tempdir().unwrap();
        let model = Model::train(&dataset, &args, dir.path()).unwrap();
        let reloaded = Model::load(dir.path(), &args).unwrap();

        for r in 0..dataset.features.rows() {
            let x = dataset.features.row(r);
            assert_eq!(
                model.predict(x, &args).unwrap(),
                reloaded.predict(x, &args).unwrap()
            );
        }
    }

    #[test]
    fn test_batch_predictions_match_single() {
        let dataset = dataset();
        let mut args = Args::default();
        args.norm = false;
        args.top_k = 3;

        let dir = tempfile::tempdir().unwrap();
        let model = Model::train(&dataset, &args, dir.path()).unwrap();

        let batch = model.predict_batch(&dataset.features, &args).unwrap();
        assert_eq!(dataset.features.rows(), batch.len());
        for (r, prediction) in batch.iter().enumerate() {
            assert_eq!(
                &model.predict(dataset.features.row(r), &args).unwrap(),
                prediction
            );
        }
    }

    #[test]
    fn test_ensemble_round_trip() {
        let dataset = dataset();
        let mut args = Args::default();
        args.norm = false;
        args.ensemble = 2;
        args.top_k = 1;

        let dir = tempfile::tempdir().unwrap();
        Model::train(&dataset, &args, dir.path()).unwrap();
        let model = Model::load(dir.path(), &args).unwrap();
        assert_eq!(4, model.n_labels().unwrap());

        let prediction = model.predict(dataset.features.row(0), &args).unwrap();
        assert_eq!(1, prediction.len());
    }
}
