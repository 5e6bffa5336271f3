//! Mini-batch SGD training and evaluation of [`MobileNetV3`] on in-memory
//! image datasets.

use crate::error::{ConfigurationError, TrainingError};
use crate::model::mobilenetv3::{MobileNetV3, MobileNetV3Config};
use burn::{
    config::Config,
    data::{
        dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::{AutodiffModule, Module},
    optim::{momentum::MomentumConfig, GradientsParams, Optimizer, SgdConfig},
    record::CompactRecorder,
    tensor::{
        backend::{AutodiffBackend, Backend},
        Device, ElementConversion, Int, Tensor, TensorData,
    },
};
use log::info;
use serde::Serialize;
use std::{
    fs::create_dir_all,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Probabilities are clipped away from 0 and 1 before taking the log.
const EPSILON: f32 = 1e-7;

/// A single labelled image, pixels in channel-first order.
#[derive(Clone, Debug)]
pub struct ImageItem {
    pub pixels: Vec<f32>,
    pub label: usize,
}

#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
pub struct ImageBatcher<B: Backend> {
    device: Device<B>,
    /// `[channels, height, width]` of every item.
    shape: [usize; 3],
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: Device<B>, shape: [usize; 3]) -> Self {
        return Self { device, shape };
    }
}

impl<B: Backend> Batcher<ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>) -> ImageBatch<B> {
        let [channels, height, width] = self.shape;
        let batch_size = items.len();

        let mut pixels = Vec::with_capacity(batch_size * channels * height * width);
        let mut labels = Vec::with_capacity(batch_size);
        for item in items {
            pixels.extend(item.pixels);
            labels.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [batch_size, channels, height, width])
                .convert::<B::FloatElem>(),
            &self.device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(labels, [batch_size]).convert::<B::IntElem>(),
            &self.device,
        );

        return ImageBatch { images, targets };
    }
}

#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub model: MobileNetV3Config,

    #[config(default = "16")]
    pub batch_size: usize,

    #[config(default = "6")]
    pub num_epochs: usize,

    #[config(default = "0.01")]
    pub learning_rate: f64,

    #[config(default = "0.8")]
    pub momentum: f64,

    #[config(default = "42")]
    pub seed: u64,

    #[config(default = "2")]
    pub num_workers: usize,

    /// Log running metrics every this many iterations.
    #[config(default = "20")]
    pub log_interval: usize,
}

impl TrainingConfig {
    /// `[channels, height, width]` expected by the model.
    pub fn item_shape(&self) -> Result<[usize; 3], ConfigurationError> {
        match self.model.input_shape[..] {
            [height, width, channels] => Ok([channels, height, width]),
            _ => Err(ConfigurationError::InputShape(self.model.input_shape.len())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub validation: Option<EvaluationReport>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrainingReport {
    pub epochs: Vec<EpochReport>,
}

/// Running averages of loss and accuracy, weighted by batch size.
#[derive(Default)]
struct RunningMetrics {
    loss_sum: f64,
    correct: usize,
    samples: usize,
}

impl RunningMetrics {
    fn update(&mut self, loss: f64, correct: usize, batch_size: usize) {
        self.loss_sum += loss * batch_size as f64;
        self.correct += correct;
        self.samples += batch_size;
    }

    fn loss(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        return self.loss_sum / self.samples as f64;
    }

    fn accuracy(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        return self.correct as f64 / self.samples as f64;
    }

    fn report(&self) -> EvaluationReport {
        return EvaluationReport {
            loss: self.loss(),
            accuracy: self.accuracy(),
            samples: self.samples,
        };
    }
}

/// Cross-entropy of integer labels against predicted probabilities (not
/// logits), averaged over the batch.
pub fn sparse_categorical_crossentropy<B: Backend>(
    probabilities: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> Tensor<B, 1> {
    let [batch_size, _] = probabilities.dims();
    let picked = probabilities
        .clamp(EPSILON, 1.0 - EPSILON)
        .log()
        .gather(1, targets.reshape([batch_size, 1]));
    return picked.mean().neg();
}

/// Number of rows whose arg-max matches the target label.
pub fn correct_predictions<B: Backend>(
    probabilities: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> usize {
    let [batch_size, _] = probabilities.dims();
    let predicted = probabilities.argmax(1).reshape([batch_size]);
    let correct = predicted.equal(targets).int().sum().into_scalar();
    return correct.elem::<i64>() as usize;
}

pub fn checkpoint_path(artifact_dir: &Path, epoch: usize) -> PathBuf {
    return artifact_dir.join(format!("epoch-{epoch}"));
}

fn config_path(artifact_dir: &Path) -> PathBuf {
    return artifact_dir.join("config.json");
}

/// Rejects items the batcher could not stack into an `item_shape` tensor.
fn check_items<D: Dataset<ImageItem>>(
    dataset: &D,
    item_shape: [usize; 3],
    num_classes: Option<usize>,
) -> Result<(), TrainingError> {
    let expected = item_shape.iter().product::<usize>();

    for (index, item) in dataset.iter().enumerate() {
        if item.pixels.len() != expected {
            return Err(TrainingError::ItemSize {
                index,
                expected,
                actual: item.pixels.len(),
            });
        }
        if let Some(num_classes) = num_classes {
            if item.label >= num_classes {
                return Err(TrainingError::ItemLabel {
                    index,
                    label: item.label,
                    num_classes,
                });
            }
        }
    }

    return Ok(());
}

fn evaluate_loader<B: Backend>(
    model: &MobileNetV3<B>,
    loader: &Arc<dyn DataLoader<ImageBatch<B>>>,
) -> Result<EvaluationReport, TrainingError> {
    let mut metrics = RunningMetrics::default();

    for batch in loader.iter() {
        let [batch_size, _, _, _] = batch.images.dims();
        let probabilities = model.forward(batch.images)?;
        let loss = sparse_categorical_crossentropy(
            probabilities.clone(),
            batch.targets.clone(),
        );
        let correct = correct_predictions(probabilities, batch.targets);

        metrics.update(loss.into_scalar().elem::<f64>(), correct, batch_size);
    }

    return Ok(metrics.report());
}

/// Loss and accuracy of `model` over `dataset`; the L2 penalty is a training
/// concern and is left out.
pub fn evaluate<B: Backend, D>(
    model: &MobileNetV3<B>,
    dataset: D,
    item_shape: [usize; 3],
    batch_size: usize,
    device: &Device<B>,
) -> Result<EvaluationReport, TrainingError>
where
    D: Dataset<ImageItem> + 'static,
{
    check_items(&dataset, item_shape, None)?;

    let loader = DataLoaderBuilder::new(ImageBatcher::<B>::new(
        device.clone(),
        item_shape,
    ))
    .batch_size(batch_size)
    .build(dataset);

    return evaluate_loader(model, &loader);
}

/// Trains a freshly initialized network, saving `config.json` and one
/// checkpoint per epoch into `artifact_dir`.
pub fn train<B: AutodiffBackend, D, V>(
    config: &TrainingConfig,
    train_set: D,
    valid_set: Option<V>,
    artifact_dir: &Path,
    device: &Device<B>,
) -> Result<(MobileNetV3<B>, TrainingReport), TrainingError>
where
    D: Dataset<ImageItem> + 'static,
    V: Dataset<ImageItem> + 'static,
{
    if train_set.is_empty() {
        return Err(TrainingError::EmptyDataset);
    }

    let item_shape = config.item_shape()?;
    let num_classes = Some(config.model.num_classes);
    check_items(&train_set, item_shape, num_classes)?;
    if let Some(ref dataset) = valid_set {
        check_items(dataset, item_shape, num_classes)?;
    }

    create_dir_all(artifact_dir)?;
    config.save(config_path(artifact_dir))?;

    B::seed(config.seed);

    let mut model = config.model.init::<B>(device)?;
    let mut optim = SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(config.momentum)
                .with_dampening(0.0),
        ))
        .init();

    info!(
        "training on {} images for {} epochs, batch size {}",
        train_set.len(),
        config.num_epochs,
        config.batch_size
    );

    let train_loader = DataLoaderBuilder::new(ImageBatcher::<B>::new(
        device.clone(),
        item_shape,
    ))
    .batch_size(config.batch_size)
    .shuffle(config.seed)
    .num_workers(config.num_workers)
    .build(train_set);

    let valid_loader = valid_set.map(|dataset| {
        DataLoaderBuilder::new(ImageBatcher::<B::InnerBackend>::new(
            device.clone(),
            item_shape,
        ))
        .batch_size(config.batch_size)
        .build(dataset)
    });

    let mut report = TrainingReport::default();

    for epoch in 1..=config.num_epochs {
        let mut metrics = RunningMetrics::default();

        for (iteration, batch) in train_loader.iter().enumerate() {
            let [batch_size, _, _, _] = batch.images.dims();

            let probabilities = model.forward(batch.images)?;
            let loss = sparse_categorical_crossentropy(
                probabilities.clone(),
                batch.targets.clone(),
            ) + model.l2_penalty();

            let correct = correct_predictions(probabilities, batch.targets);
            metrics.update(
                loss.clone().into_scalar().elem::<f64>(),
                correct,
                batch_size,
            );

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(config.learning_rate, model, grads);

            if config.log_interval > 0 && iteration % config.log_interval == 0 {
                info!(
                    "epoch {epoch} iteration {iteration}: loss {:.4}, accuracy {:.4}",
                    metrics.loss(),
                    metrics.accuracy()
                );
            }
        }

        let validation = match valid_loader {
            Some(ref loader) => Some(evaluate_loader(&model.valid(), loader)?),
            None => None,
        };

        info!(
            "epoch {epoch}: loss {:.4}, accuracy {:.2}%",
            metrics.loss(),
            metrics.accuracy() * 100.0
        );
        if let Some(ref valid) = validation {
            info!(
                "epoch {epoch}: validation loss {:.4}, accuracy {:.2}%",
                valid.loss,
                valid.accuracy * 100.0
            );
        }

        model
            .clone()
            .save_file(
                checkpoint_path(artifact_dir, epoch),
                &CompactRecorder::new(),
            )
            .map_err(|err| TrainingError::Recorder(err.to_string()))?;

        report.epochs.push(EpochReport {
            epoch,
            loss: metrics.loss(),
            accuracy: metrics.accuracy(),
            validation,
        });
    }

    return Ok((model, report));
}

/// Restores the configuration and the weights saved after `epoch`.
pub fn load_checkpoint<B: Backend>(
    artifact_dir: &Path,
    epoch: usize,
    device: &Device<B>,
) -> Result<(MobileNetV3<B>, TrainingConfig), TrainingError> {
    let config = TrainingConfig::load(config_path(artifact_dir))
        .map_err(|err| TrainingError::ConfigFile(err.to_string()))?;

    let model = config
        .model
        .init::<B>(device)?
        .load_file(
            checkpoint_path(artifact_dir, epoch),
            &CompactRecorder::new(),
            device,
        )
        .map_err(|err| TrainingError::Recorder(err.to_string()))?;

    return Ok((model, config));
}
