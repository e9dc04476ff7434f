use clap::{value_t, App, Arg, ArgMatches, SubCommand};
use log::info;
use quercus::args::{Args, LossType, ModelType, OfoType, OptimizerType, TreeType};
use quercus::data::DataReader;
use quercus::model::{self, Model};
use quercus::{Error, Result};
use rand::prelude::*;
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;

macro_rules! set_arg {
    ($args:expr, $matches:ident, $field:ident, $name:expr, $ty:ty) => {
        if $matches.is_present($name) {
            $args.$field = value_t!($matches, $name, $ty).unwrap_or_else(|e| e.exit());
        }
    };
}

fn set_num_threads(args: &Args) {
    rayon::ThreadPoolBuilder::new()
        .num_threads(args.resolved_threads())
        .stack_size(32 * 1024 * 1024)
        .build_global()
        .unwrap_or_else(|e| panic!("Failed to build thread pool: {}", e));
}

fn io_args<'a, 'b>(cmd: App<'a, 'b>) -> App<'a, 'b> {
    cmd.arg(
        Arg::with_name("input")
            .short("i")
            .long("input")
            .help("Path to the dataset in libsvm format; '-' reads stdin")
            .takes_value(true)
            .value_name("PATH")
            .required(true),
    )
    .arg(
        Arg::with_name("output")
            .short("o")
            .long("output")
            .help("Path of the model directory")
            .takes_value(true)
            .value_name("PATH")
            .required(true),
    )
    .arg(
        Arg::with_name("threads")
            .long("threads")
            .help("Number of worker threads; 0 uses all cores, -1 all cores but one")
            .takes_value(true)
            .allow_hyphen_values(true)
            .value_name("T"),
    )
    .arg(
        Arg::with_name("seed")
            .long("seed")
            .help("Seed for every stochastic step")
            .takes_value(true)
            .value_name("SEED"),
    )
}

fn prediction_args<'a, 'b>(cmd: App<'a, 'b>) -> App<'a, 'b> {
    cmd.arg(
        Arg::with_name("topK")
            .long("topK")
            .help("Number of top labels to predict per example")
            .takes_value(true)
            .value_name("K"),
    )
    .arg(
        Arg::with_name("threshold")
            .long("threshold")
            .help("Minimum score for a label to be predicted; implies topK = 0 unless set")
            .takes_value(true)
            .value_name("P"),
    )
    .arg(
        Arg::with_name("thresholds")
            .long("thresholds")
            .help("Path to a per-label thresholds file, one float per line")
            .takes_value(true)
            .value_name("PATH"),
    )
    .arg(
        Arg::with_name("onTheTrotPrediction")
            .long("onTheTrotPrediction")
            .help("Keep at most one ensemble member in memory during batch prediction")
            .takes_value(true)
            .value_name("0|1"),
    )
    .arg(
        Arg::with_name("ensMissingScores")
            .long("ensMissingScores")
            .help("Backfill scores of labels an ensemble member did not surface in its top-k")
            .takes_value(true)
            .value_name("0|1"),
    )
}

fn train_args<'a, 'b>(cmd: App<'a, 'b>) -> App<'a, 'b> {
    cmd.arg(
        Arg::with_name("model")
            .short("m")
            .long("model")
            .help("Top-level estimator")
            .takes_value(true)
            .possible_values(&["plt", "hsm"]),
    )
    .arg(
        Arg::with_name("header")
            .long("header")
            .help("Whether the input starts with a 'rows features labels' header line")
            .takes_value(true)
            .value_name("0|1"),
    )
    .arg(
        Arg::with_name("bias")
            .long("bias")
            .help("Add a bias feature to every example")
            .takes_value(true)
            .value_name("0|1"),
    )
    .arg(
        Arg::with_name("biasValue")
            .long("biasValue")
            .help("Value of the bias feature")
            .takes_value(true)
            .value_name("B"),
    )
    .arg(
        Arg::with_name("norm")
            .long("norm")
            .help("Unit-norm feature vectors while reading")
            .takes_value(true)
            .value_name("0|1"),
    )
    .arg(
        Arg::with_name("hash")
            .long("hash")
            .help("Hash features into this many buckets; 0 disables hashing")
            .takes_value(true)
            .value_name("SIZE"),
    )
    .arg(
        Arg::with_name("featuresThreshold")
            .long("featuresThreshold")
            .help("Drop features with absolute values at or below this threshold")
            .takes_value(true)
            .value_name("T"),
    )
    .arg(
        Arg::with_name("optimizer")
            .long("optimizer")
            .help("Base classifier optimizer")
            .takes_value(true)
            .possible_values(&["liblinear", "sgd", "adagrad", "fobos"]),
    )
    .arg(
        Arg::with_name("solver")
            .long("solver")
            .help("Loss solved by the liblinear optimizer")
            .takes_value(true)
            .possible_values(&["log", "hinge"]),
    )
    .arg(
        Arg::with_name("cost")
            .short("C")
            .long("cost")
            .help("Cost co-efficient for regularizing base classifiers")
            .takes_value(true)
            .value_name("C"),
    )
    .arg(
        Arg::with_name("eps")
            .long("eps")
            .help("Epsilon for determining base classifier convergence")
            .takes_value(true)
            .value_name("EPS"),
    )
    .arg(
        Arg::with_name("maxIter")
            .long("maxIter")
            .help("Max iterations for training each base classifier")
            .takes_value(true)
            .value_name("M"),
    )
    .arg(
        Arg::with_name("weightsThreshold")
            .long("weightsThreshold")
            .help("Drop classifier weights with absolute values at or below this threshold")
            .takes_value(true)
            .value_name("T"),
    )
    .arg(
        Arg::with_name("inbalanceLabelsWeighting")
            .long("inbalanceLabelsWeighting")
            .help("Reweight node examples inversely to class frequency")
            .takes_value(true)
            .value_name("0|1"),
    )
    .arg(
        Arg::with_name("pickOneLabelWeighting")
            .long("pickOneLabelWeighting")
            .help("Scale positive updates of multi-label examples by 1/|labels|")
            .takes_value(true)
            .value_name("0|1"),
    )
    .arg(
        Arg::with_name("eta")
            .long("eta")
            .help("Learning rate for online optimizers")
            .takes_value(true)
            .value_name("ETA"),
    )
    .arg(
        Arg::with_name("epochs")
            .long("epochs")
            .help("Number of passes for online optimizers and OFO")
            .takes_value(true)
            .value_name("N"),
    )
    .arg(
        Arg::with_name("l2Penalty")
            .long("l2Penalty")
            .help("L2 regularization for online optimizers")
            .takes_value(true)
            .value_name("L"),
    )
    .arg(
        Arg::with_name("fobosPenalty")
            .long("fobosPenalty")
            .help("L1 proximal penalty for the FOBOS optimizer")
            .takes_value(true)
            .value_name("L"),
    )
    .arg(
        Arg::with_name("adagradEps")
            .long("adagradEps")
            .help("Epsilon added to AdaGrad's accumulated gradient norms")
            .takes_value(true)
            .value_name("EPS"),
    )
    .arg(
        Arg::with_name("treeStructure")
            .long("treeStructure")
            .help("Load the tree from this edge-list file instead of building one")
            .takes_value(true)
            .value_name("PATH"),
    )
    .arg(
        Arg::with_name("treeType")
            .long("treeType")
            .help("Tree construction strategy")
            .takes_value(true)
            .possible_values(&[
                "hierarchicalKMeans",
                "completeInOrder",
                "completeRandom",
                "balancedInOrder",
                "balancedRandom",
                "huffman",
            ]),
    )
    .arg(
        Arg::with_name("arity")
            .long("arity")
            .help("Children per internal tree node")
            .takes_value(true)
            .value_name("A"),
    )
    .arg(
        Arg::with_name("maxLeaves")
            .long("maxLeaves")
            .help("Stop splitting label partitions at this size")
            .takes_value(true)
            .value_name("SIZE"),
    )
    .arg(
        Arg::with_name("kMeansEps")
            .long("kMeansEps")
            .help("Epsilon for determining k-means convergence")
            .takes_value(true)
            .value_name("EPS"),
    )
    .arg(
        Arg::with_name("kMeansBalanced")
            .long("kMeansBalanced")
            .help("Balance k-means cluster sizes")
            .takes_value(true)
            .value_name("0|1"),
    )
    .arg(
        Arg::with_name("kMeansWeightedFeatures")
            .long("kMeansWeightedFeatures")
            .help("Divide each example's centroid contribution by its label count")
            .takes_value(true)
            .value_name("0|1"),
    )
    .arg(
        Arg::with_name("ensemble")
            .long("ensemble")
            .help("Number of independently trained models to average")
            .takes_value(true)
            .value_name("N"),
    )
    .arg(
        Arg::with_name("memLimit")
            .long("memLimit")
            .help("Memory budget in bytes for training buckets; 0 uses system RAM")
            .takes_value(true)
            .value_name("BYTES"),
    )
}

fn parse_bool(matches: &ArgMatches, name: &str) -> Option<bool> {
    if matches.is_present(name) {
        Some(value_t!(matches, name, i32).unwrap_or_else(|e| e.exit()) != 0)
    } else {
        None
    }
}

fn training_overrides(args: &mut Args, matches: &ArgMatches) {
    if let Some(model) = matches.value_of("model") {
        args.model = match model {
            "plt" => ModelType::Plt,
            "hsm" => ModelType::Hsm,
            _ => unreachable!(),
        };
    }
    if let Some(header) = parse_bool(matches, "header") {
        args.header = header;
    }
    if let Some(bias) = parse_bool(matches, "bias") {
        args.bias = bias;
    }
    set_arg!(args, matches, bias_value, "biasValue", f32);
    if let Some(norm) = parse_bool(matches, "norm") {
        args.norm = norm;
    }
    set_arg!(args, matches, hash, "hash", usize);
    set_arg!(args, matches, features_threshold, "featuresThreshold", f32);

    if let Some(optimizer) = matches.value_of("optimizer") {
        args.optimizer = match optimizer {
            "liblinear" => OptimizerType::Liblinear,
            "sgd" => OptimizerType::Sgd,
            "adagrad" => OptimizerType::Adagrad,
            "fobos" => OptimizerType::Fobos,
            _ => unreachable!(),
        };
    }
    if let Some(solver) = matches.value_of("solver") {
        args.loss = match solver {
            "log" => LossType::Log,
            "hinge" => LossType::Hinge,
            _ => unreachable!(),
        };
    }
    set_arg!(args, matches, cost, "cost", f32);
    set_arg!(args, matches, eps, "eps", f32);
    set_arg!(args, matches, max_iter, "maxIter", u32);
    set_arg!(args, matches, weights_threshold, "weightsThreshold", f32);
    if let Some(weighting) = parse_bool(matches, "inbalanceLabelsWeighting") {
        args.inbalance_labels_weighting = weighting;
    }
    if let Some(weighting) = parse_bool(matches, "pickOneLabelWeighting") {
        args.pick_one_label_weighting = weighting;
    }
    set_arg!(args, matches, eta, "eta", f32);
    set_arg!(args, matches, epochs, "epochs", u32);
    set_arg!(args, matches, l2_penalty, "l2Penalty", f32);
    set_arg!(args, matches, fobos_penalty, "fobosPenalty", f32);
    set_arg!(args, matches, adagrad_eps, "adagradEps", f32);

    if let Some(path) = matches.value_of("treeStructure") {
        args.tree_structure = path.to_string();
    }
    if let Some(tree_type) = matches.value_of("treeType") {
        args.tree_type = match tree_type {
            "hierarchicalKMeans" => TreeType::HierarchicalKMeans,
            "completeInOrder" => TreeType::CompleteInOrder,
            "completeRandom" => TreeType::CompleteRandom,
            "balancedInOrder" => TreeType::BalancedInOrder,
            "balancedRandom" => TreeType::BalancedRandom,
            "huffman" => TreeType::Huffman,
            _ => unreachable!(),
        };
    }
    set_arg!(args, matches, arity, "arity", usize);
    set_arg!(args, matches, max_leaves, "maxLeaves", usize);
    set_arg!(args, matches, k_means_eps, "kMeansEps", f32);
    if let Some(balanced) = parse_bool(matches, "kMeansBalanced") {
        args.k_means_balanced = balanced;
    }
    if let Some(weighted) = parse_bool(matches, "kMeansWeightedFeatures") {
        args.k_means_weighted_features = weighted;
    }
    set_arg!(args, matches, ensemble, "ensemble", usize);
    set_arg!(args, matches, mem_limit, "memLimit", u64);
}

fn runtime_overrides(args: &mut Args, matches: &ArgMatches) {
    if let Some(input) = matches.value_of("input") {
        args.input = input.to_string();
    }
    if let Some(output) = matches.value_of("output") {
        args.output = output.to_string();
    }
    set_arg!(args, matches, threads, "threads", i32);
    set_arg!(args, matches, seed, "seed", u64);
    set_arg!(args, matches, top_k, "topK", usize);
    set_arg!(args, matches, threshold, "threshold", f32);
    if let Some(path) = matches.value_of("thresholds") {
        args.thresholds = path.to_string();
    }
    if let Some(on_the_trot) = parse_bool(matches, "onTheTrotPrediction") {
        args.on_the_trot_prediction = on_the_trot;
    }
    if let Some(missing) = parse_bool(matches, "ensMissingScores") {
        args.ens_missing_scores = missing;
    }
    if let Some(measures) = matches.value_of("measures") {
        args.measures = measures.to_string();
    }
    set_arg!(args, matches, batches, "batches", u32);
    if let Some(batch_sizes) = matches.value_of("batchSizes") {
        args.batch_sizes = batch_sizes.to_string();
    }

    // A scalar threshold means "all labels above it" unless topK is explicit
    if matches.is_present("threshold") && !matches.is_present("topK") {
        args.top_k = 0;
    }
}

fn load_model_args(matches: &ArgMatches) -> Result<Args> {
    let output = matches.value_of("output").expect("output is required");
    let mut args = Args::load(&Path::new(output).join(model::ARGS_FILE))?;
    runtime_overrides(&mut args, matches);
    args.output = output.to_string();
    Ok(args)
}

fn load_thresholds(path: &str) -> Result<Vec<f32>> {
    let mut thresholds = Vec::new();
    for line in BufReader::new(File::open(path)?).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        thresholds.push(
            line.trim()
                .parse::<f32>()
                .map_err(|_| Error::Data(format!("bad threshold '{}'", line)))?,
        );
    }
    Ok(thresholds)
}

fn save_thresholds(thresholds: &[f32], path: &str) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for threshold in thresholds {
        writeln!(out, "{}", threshold)?;
    }
    Ok(())
}

fn print_predictions<W: Write>(writer: &mut W, predictions: &[(u32, f32)]) -> Result<()> {
    for (i, &(label, score)) in predictions.iter().enumerate() {
        if i > 0 {
            write!(writer, " ")?;
        }
        write!(writer, "{}:{:.5}", label, score)?;
    }
    writeln!(writer)?;
    Ok(())
}

fn train(matches: &ArgMatches) -> Result<()> {
    let mut args = Args::default();
    training_overrides(&mut args, matches);
    runtime_overrides(&mut args, matches);
    args.validate()?;
    set_num_threads(&args);

    std::fs::create_dir_all(&args.output)?;
    let output = Path::new(&args.output);
    args.save(&output.join(model::ARGS_FILE))?;

    let reader = DataReader::from_args(&args);
    let dataset = reader.read_data(&args.input)?;
    reader.save(&output.join(model::READER_FILE))?;
    info!(
        "Train data: {} examples, {} features, {} labels, {:.2} labels/example",
        dataset.n_examples(),
        dataset.features.cols().saturating_sub(2),
        dataset.n_labels(),
        dataset.labels.cells() as f64 / dataset.n_examples() as f64,
    );

    let start_t = time::precise_time_s();
    Model::train(&dataset, &args, output)?;
    info!(
        "Trained model in {:.2}s ({:.2}ms per example)",
        time::precise_time_s() - start_t,
        (time::precise_time_s() - start_t) * 1000. / dataset.n_examples() as f64
    );
    Ok(())
}

fn test(matches: &ArgMatches) -> Result<()> {
    let args = load_model_args(matches)?;
    set_num_threads(&args);
    let output = Path::new(&args.output);

    let reader = DataReader::load(&output.join(model::READER_FILE))?;
    let dataset = reader.read_data(&args.input)?;
    let mut model = Model::load(output, &args)?;

    let predictions = if !args.thresholds.is_empty() {
        let thresholds = load_thresholds(&args.thresholds)?;
        model.set_thresholds(&thresholds)?;
        model.predict_batch_with_thresholds(&dataset.features)?
    } else {
        model.predict_batch(&dataset.features, &args)?
    };

    let mut measures = quercus::model::eval::Measure::parse_list(&args.measures, model.n_labels()?)?;
    println!("Results:");
    for measure in &mut measures {
        measure.accumulate_batch(&dataset.labels, &predictions);
        println!("  {}: {:.5}", measure.name(), measure.value());
    }
    Ok(())
}

fn predict(matches: &ArgMatches) -> Result<()> {
    let args = load_model_args(matches)?;
    set_num_threads(&args);
    let output = Path::new(&args.output);

    let reader = DataReader::load(&output.join(model::READER_FILE))?;
    let mut model = Model::load(output, &args)?;

    let use_thresholds = !args.thresholds.is_empty();
    if use_thresholds {
        let thresholds = load_thresholds(&args.thresholds)?;
        model.set_thresholds(&thresholds)?;
    }

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    if args.input == "-" {
        // Score stdin line by line
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let (_, features) = reader.parse_example(&line)?;
            let prediction = if use_thresholds {
                model.predict_with_thresholds(&features)?
            } else {
                model.predict(&features, &args)?
            };
            print_predictions(&mut out, &prediction)?;
        }
    } else {
        let dataset = reader.read_data(&args.input)?;
        let predictions = if use_thresholds {
            model.predict_batch_with_thresholds(&dataset.features)?
        } else {
            model.predict_batch(&dataset.features, &args)?
        };
        for prediction in &predictions {
            print_predictions(&mut out, prediction)?;
        }
    }
    Ok(())
}

fn ofo(matches: &ArgMatches) -> Result<()> {
    let mut args = load_model_args(matches)?;
    if args.thresholds.is_empty() {
        return Err(Error::Config(
            "ofo needs --thresholds to know where to write".to_string(),
        ));
    }
    set_num_threads(&args);
    set_arg!(args, matches, ofo_top_labels, "ofoTopLabels", usize);
    set_arg!(args, matches, ofo_a, "ofoA", f32);
    set_arg!(args, matches, ofo_b, "ofoB", f32);
    set_arg!(args, matches, epochs, "epochs", u32);
    if let Some(ofo_type) = matches.value_of("ofoType") {
        args.ofo_type = match ofo_type {
            "micro" => OfoType::Micro,
            "macro" => OfoType::Macro,
            "mixed" => OfoType::Mixed,
            _ => unreachable!(),
        };
    }

    let output = Path::new(&args.output);
    let reader = DataReader::load(&output.join(model::READER_FILE))?;
    let dataset = reader.read_data(&args.input)?;
    let mut model = Model::load(output, &args)?;

    let start_t = time::precise_time_s();
    let thresholds = model.ofo(&dataset.labels, &dataset.features, &args)?;
    info!(
        "Optimized thresholds in {:.2}s",
        time::precise_time_s() - start_t
    );
    save_thresholds(&thresholds, &args.thresholds)?;
    Ok(())
}

fn test_prediction_time(matches: &ArgMatches) -> Result<()> {
    let args = load_model_args(matches)?;
    set_num_threads(&args);
    let output = Path::new(&args.output);

    let reader = DataReader::load(&output.join(model::READER_FILE))?;
    let dataset = reader.read_data(&args.input)?;
    let model = Model::load(output, &args)?;

    let batch_sizes = args
        .batch_sizes
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| Error::Config(format!("bad batch size '{}'", s)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    println!("Results:");
    for batch_size in batch_sizes {
        let mut time_sum = 0f64;
        let mut time_sq_sum = 0f64;
        let mut per_point_sum = 0f64;
        let mut per_point_sq_sum = 0f64;

        for _ in 0..args.batches {
            let batch: Vec<usize> = (0..batch_size)
                .map(|_| rng.gen_range(0..dataset.features.rows()))
                .collect();

            let start_t = time::precise_time_s();
            for &r in &batch {
                let _ = model.predict(dataset.features.row(r), &args)?;
            }
            let elapsed = time::precise_time_s() - start_t;

            time_sum += elapsed;
            time_sq_sum += elapsed * elapsed;
            let per_point = elapsed * 1000. / batch_size as f64;
            per_point_sum += per_point;
            per_point_sq_sum += per_point * per_point;
        }

        let n = args.batches as f64;
        let mean_time = time_sum / n;
        let mean_per_point = per_point_sum / n;
        println!(
            "  Batch {} time/batch (s): {:.5} +- {:.5}",
            batch_size,
            mean_time,
            (time_sq_sum / n - mean_time * mean_time).max(0.).sqrt()
        );
        println!(
            "  Batch {} time/example (ms): {:.5} +- {:.5}",
            batch_size,
            mean_per_point,
            (per_point_sq_sum / n - mean_per_point * mean_per_point)
                .max(0.)
                .sqrt()
        );
    }
    Ok(())
}

fn main() {
    simple_logger::init().unwrap();

    let app = App::new("quercus")
        .about("Probabilistic label trees for extreme multi-label classification")
        .subcommand(train_args(prediction_args(io_args(
            SubCommand::with_name("train").about("Train a new model"),
        ))))
        .subcommand(
            prediction_args(io_args(
                SubCommand::with_name("test").about("Evaluate a trained model"),
            ))
            .arg(
                Arg::with_name("measures")
                    .long("measures")
                    .help("Comma-separated measures to report, e.g. p@1,r@3,c@5,f1,acc,s")
                    .takes_value(true)
                    .value_name("LIST"),
            ),
        )
        .subcommand(prediction_args(io_args(
            SubCommand::with_name("predict")
                .about("Print label:score predictions for each input line"),
        )))
        .subcommand(
            prediction_args(io_args(
                SubCommand::with_name("ofo")
                    .about("Fit per-label thresholds by online F-measure optimization"),
            ))
            .arg(
                Arg::with_name("ofoType")
                    .long("ofoType")
                    .help("Thresholds shared (micro), per-label (macro), or mixed")
                    .takes_value(true)
                    .possible_values(&["micro", "macro", "mixed"]),
            )
            .arg(
                Arg::with_name("ofoTopLabels")
                    .long("ofoTopLabels")
                    .help("In mixed mode, tune only this many most frequent labels individually")
                    .takes_value(true)
                    .value_name("N"),
            )
            .arg(
                Arg::with_name("ofoA")
                    .long("ofoA")
                    .help("Initial numerator of the threshold estimate")
                    .takes_value(true)
                    .value_name("A"),
            )
            .arg(
                Arg::with_name("ofoB")
                    .long("ofoB")
                    .help("Initial denominator of the threshold estimate")
                    .takes_value(true)
                    .value_name("B"),
            )
            .arg(
                Arg::with_name("epochs")
                    .long("epochs")
                    .help("Number of passes over the data")
                    .takes_value(true)
                    .value_name("N"),
            ),
        )
        .subcommand(
            prediction_args(io_args(
                SubCommand::with_name("testPredictionTime")
                    .about("Benchmark prediction latency across batch sizes"),
            ))
            .arg(
                Arg::with_name("batchSizes")
                    .long("batchSizes")
                    .help("Comma-separated batch sizes to benchmark")
                    .takes_value(true)
                    .value_name("LIST"),
            )
            .arg(
                Arg::with_name("batches")
                    .long("batches")
                    .help("Number of sampled batches per size")
                    .takes_value(true)
                    .value_name("N"),
            ),
        );

    let matches = app.get_matches();
    let result = match matches.subcommand() {
        ("train", Some(matches)) => train(matches),
        ("test", Some(matches)) => test(matches),
        ("predict", Some(matches)) => predict(matches),
        ("ofo", Some(matches)) => ofo(matches),
        ("testPredictionTime", Some(matches)) => test_prediction_time(matches),
        _ => {
            eprintln!("{}", matches.usage());
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
