use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    module::AutodiffModule,
    optim::{momentum::MomentumConfig, GradientsParams, Optimizer, SgdConfig},
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use serde::{Deserialize, Serialize};

use crate::{
    data::{DigitBatch, DigitBatcher, DigitItem, FolderDigits, MnistDigits},
    error::Error,
    logger::install_file_logger,
    metric_log::MetricHistory,
    model::{
        feature_map_size, DigitClassifier, LeNet5Config, LeNet5FcnConfig, Variant, INPUT_SIZE,
    },
    port::{port_into, PortMapping, PortStrategy},
    state_dict::{StateDict, StateDictModule},
};

/// Recorder used for checkpoints: named MessagePack, full precision.
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// How dense-checkpoint weights are ported into a freshly built network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum PortStrategyKind {
    Positional,
    ByName,
    Explicit,
}

impl PortStrategyKind {
    pub fn resolve(self, source: &StateDict, target: &StateDict) -> crate::Result<PortStrategy> {
        let strategy = match self {
            Self::Positional => PortStrategy::Positional,
            Self::ByName => PortStrategy::ByName,
            Self::Explicit => PortStrategy::Explicit(PortMapping::dense_to_fcn(source, target)?),
        };

        Ok(strategy)
    }
}

#[derive(Config)]
pub struct TrainingConfig {
    pub optimizer: SgdConfig,
    /// Run name; artifacts go to `{root}/{num_epochs}_{name}/`.
    pub name: String,
    #[config(default = "Variant::Fcn")]
    pub variant: Variant,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 16)]
    pub batch_size: usize,
    #[config(default = 8)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 2e-3)]
    pub learning_rate: f64,
    /// Side length images are resized to.
    #[config(default = 32)]
    pub image_size: usize,
    /// Digit folder root with `train/` and `test/` sub-folders. MNIST is used when unset.
    pub data_dir: Option<String>,
    /// Dense checkpoint (without extension) to port weights from before training.
    pub port_from: Option<String>,
    #[config(default = "PortStrategyKind::Positional")]
    pub port_strategy: PortStrategyKind,
}

impl TrainingConfig {
    /// Plain SGD with momentum and no dampening.
    pub fn sgd(momentum: f64) -> SgdConfig {
        SgdConfig::new().with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(momentum)
                .with_dampening(0.0),
        ))
    }

    pub fn run_name(&self) -> String {
        format!("{}_{}", self.num_epochs, self.name)
    }

    pub fn run_dir<P: AsRef<Path>>(&self, root: P) -> PathBuf {
        root.as_ref().join(self.run_name())
    }

    /// Checkpoint path without the recorder extension.
    pub fn checkpoint_path<P: AsRef<Path>>(&self, root: P) -> PathBuf {
        self.run_dir(root).join(self.run_name())
    }

    fn validate(&self) -> crate::Result<()> {
        match self.variant {
            Variant::Dense if self.image_size != INPUT_SIZE => Err(Error::InvalidConfig(format!(
                "the dense head needs {INPUT_SIZE}x{INPUT_SIZE} inputs, got {0}x{0}",
                self.image_size
            ))),
            Variant::Fcn if feature_map_size(self.image_size).is_none() => {
                Err(Error::InvalidConfig(format!(
                    "{0}x{0} inputs are too small for the feature extractor",
                    self.image_size
                )))
            }
            _ if self.batch_size == 0 => {
                Err(Error::InvalidConfig("batch size must be positive".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Loss and accuracy of one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    pub loss: f64,
    /// Fraction of correct predictions, in `[0, 1]`.
    pub accuracy: f64,
}

/// Averages over a whole evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalOutput {
    pub avg_loss: f64,
    pub accuracy: f64,
    pub num_items: usize,
}

/// Where a finished run left its artifacts.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_dir: PathBuf,
    /// Path of the checkpoint, without the recorder extension.
    pub checkpoint: PathBuf,
    pub history: MetricHistory,
}

/// Fraction of rows of `output` whose arg-max equals the target.
pub fn accuracy<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> f64 {
    let num_predictions = targets.dims()[0];
    if num_predictions == 0 {
        return 0.0;
    }

    let predictions = output.argmax(1).squeeze::<1>(1);
    let num_corrects = predictions.equal(targets).int().sum().into_scalar();

    num_corrects.elem::<f64>() / num_predictions as f64
}

/// One optimizer step on `batch`.
pub fn train_step<B, M, O>(
    model: M,
    optim: &mut O,
    batch: DigitBatch<B>,
    learning_rate: f64,
) -> (M, StepOutput)
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + DigitClassifier<B>,
    O: Optimizer<M, B>,
{
    let item = model.forward_classification(batch.images, batch.targets);
    let step = StepOutput {
        loss: item.loss.clone().into_scalar().elem::<f64>(),
        accuracy: accuracy(item.output.clone(), item.targets.clone()),
    };

    // Gradients for the current backward pass
    let grads = item.loss.backward();
    // Gradients linked to each parameter of the model.
    let grads = GradientsParams::from_grads(grads, &model);
    let model = optim.step(learning_rate, model, grads);

    (model, step)
}

/// One pass over `batches`, recording every step loss in `history`.
pub fn train_epoch<B, M, O, I>(
    mut model: M,
    optim: &mut O,
    batches: I,
    learning_rate: f64,
    epoch: usize,
    history: &mut MetricHistory,
) -> M
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + DigitClassifier<B>,
    O: Optimizer<M, B>,
    I: IntoIterator<Item = DigitBatch<B>>,
{
    for (iteration, batch) in batches.into_iter().enumerate() {
        let (next, step) = train_step(model, optim, batch, learning_rate);
        model = next;

        log::info!(
            "Train - Epoch {epoch}, Batch: {iteration}, Loss: {:.6}",
            step.loss
        );
        history.push_loss(step.loss);
    }

    model
}

/// Average loss and accuracy of `model` over `batches`.
pub fn evaluate<B, M, I>(model: &M, batches: I) -> EvalOutput
where
    B: Backend,
    M: DigitClassifier<B>,
    I: IntoIterator<Item = DigitBatch<B>>,
{
    let mut total_loss = 0.0;
    let mut total_correct = 0.0;
    let mut num_items = 0;

    for batch in batches {
        let batch_size = batch.targets.dims()[0];
        let item = model.forward_classification(batch.images, batch.targets);

        total_loss += item.loss.into_scalar().elem::<f64>() * batch_size as f64;
        total_correct += accuracy(item.output, item.targets) * batch_size as f64;
        num_items += batch_size;
    }

    if num_items == 0 {
        return EvalOutput {
            avg_loss: 0.0,
            accuracy: 0.0,
            num_items,
        };
    }

    EvalOutput {
        avg_loss: total_loss / num_items as f64,
        accuracy: total_correct / num_items as f64,
        num_items,
    }
}

/// Load a dense checkpoint and port its weights into `model`.
pub fn port_checkpoint<B, M>(
    model: M,
    checkpoint: &Path,
    strategy: PortStrategyKind,
    device: &B::Device,
) -> crate::Result<M>
where
    B: Backend,
    M: StateDictModule<B>,
{
    let dense = LeNet5Config::new()
        .init::<B>(device)
        .load_file(checkpoint, &CheckpointRecorder::new(), device)?;
    let source = dense.state_dict();
    let strategy = strategy.resolve(&source, &model.state_dict())?;

    let (model, report) = port_into(model, &source, &strategy)?;
    for (from, to) in report.copied.iter() {
        log::info!("Ported {from} -> {to}");
    }
    for name in report.skipped.iter() {
        log::warn!("Skipped {name}: no matching parameter");
    }

    Ok(model)
}

type BoxedDataset = Box<dyn Dataset<DigitItem>>;

fn datasets(config: &TrainingConfig) -> crate::Result<(BoxedDataset, BoxedDataset)> {
    match &config.data_dir {
        Some(root) => {
            let root = Path::new(root);
            let train = FolderDigits::new(root.join("train"), config.image_size)?;
            let test = FolderDigits::new(root.join("test"), config.image_size)?;
            Ok((Box::new(train), Box::new(test)))
        }
        None => Ok((
            Box::new(MnistDigits::train(config.image_size)),
            Box::new(MnistDigits::test(config.image_size)),
        )),
    }
}

/// Train the configured variant and write its artifacts under `{root}/{num_epochs}_{name}/`.
pub fn run<B: AutodiffBackend>(
    config: &TrainingConfig,
    root: &Path,
    device: B::Device,
) -> crate::Result<RunSummary> {
    config.validate()?;

    let run_dir = config.run_dir(root);
    std::fs::create_dir_all(&run_dir).map_err(Error::io(&run_dir))?;
    install_file_logger(run_dir.join("experiment.log"));

    let config_path = run_dir.join("config.json");
    config.save(&config_path).map_err(Error::io(&config_path))?;

    B::seed(config.seed);

    match config.variant {
        Variant::Dense => {
            let model = LeNet5Config::new().init::<B>(&device);
            train_model(model, config, root, device)
        }
        Variant::Fcn => {
            let model = LeNet5FcnConfig::new().init::<B>(&device);
            train_model(model, config, root, device)
        }
    }
}

fn train_model<B, M>(
    model: M,
    config: &TrainingConfig,
    root: &Path,
    device: B::Device,
) -> crate::Result<RunSummary>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + DigitClassifier<B> + StateDictModule<B> + Display,
    M::InnerModule: DigitClassifier<B::InnerBackend>,
{
    let model = match &config.port_from {
        Some(checkpoint) => {
            port_checkpoint::<B, M>(model, Path::new(checkpoint), config.port_strategy, &device)?
        }
        None => model,
    };
    log::info!(
        "Training {:?} network with {} parameters",
        config.variant,
        model.num_params()
    );
    log::info!("Model summary for {0}x{0} inputs:\n{model}", config.image_size);

    let (train_set, test_set) = datasets(config)?;
    log::info!(
        "{} training items, {} test items",
        train_set.len(),
        test_set.len()
    );

    let mut builder_train = DataLoaderBuilder::new(DigitBatcher::<B>::new(device.clone()))
        .batch_size(config.batch_size)
        .shuffle(config.seed);
    let mut builder_test =
        DataLoaderBuilder::new(DigitBatcher::<B::InnerBackend>::new(device.clone()))
            .batch_size(config.batch_size);
    // Without workers the batches are loaded on the training thread.
    if config.num_workers > 0 {
        builder_train = builder_train.num_workers(config.num_workers);
        builder_test = builder_test.num_workers(config.num_workers);
    }
    let dataloader_train = builder_train.build(train_set);
    let dataloader_test = builder_test.build(test_set);

    let mut optim = config.optimizer.init::<B, M>();
    let mut history = MetricHistory::new();
    let mut model = model;

    for epoch in 1..config.num_epochs + 1 {
        model = train_epoch(
            model,
            &mut optim,
            dataloader_train.iter(),
            config.learning_rate,
            epoch,
            &mut history,
        );

        let eval = evaluate(&model.valid(), dataloader_test.iter());
        log::info!(
            "Test Avg. Loss: {:.6}, Accuracy: {:.6}",
            eval.avg_loss,
            eval.accuracy
        );
        history.push_accuracy(eval.accuracy);
    }

    let run_dir = config.run_dir(root);
    let checkpoint = config.checkpoint_path(root);
    model.save_file(checkpoint.clone(), &CheckpointRecorder::new())?;
    history.save(&run_dir)?;
    log::info!("Artifacts written to {}", run_dir.display());

    Ok(RunSummary {
        run_dir,
        checkpoint,
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TrainingConfig {
        TrainingConfig::new(TrainingConfig::sgd(0.9), "epochs_LeNet5_FC_32x32".to_string())
    }

    #[test]
    fn run_paths_follow_epochs_and_name() {
        let config = config();

        assert_eq!(
            config.checkpoint_path("checkpoints"),
            PathBuf::from("checkpoints")
                .join("10_epochs_LeNet5_FC_32x32")
                .join("10_epochs_LeNet5_FC_32x32")
        );
    }

    #[test]
    fn dense_variant_requires_32x32() {
        let config = config().with_variant(Variant::Dense).with_image_size(56);

        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn fcn_variant_accepts_larger_inputs() {
        let config = config().with_image_size(56);

        assert!(config.validate().is_ok());
        assert!(config.with_image_size(16).validate().is_err());
    }
}
