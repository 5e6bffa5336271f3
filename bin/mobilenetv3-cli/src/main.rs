mod dataset;

use anyhow::{bail, Context, Result};
use argh::FromArgs;
use burn::backend::Autodiff;
use burn::config::Config;
use burn::data::dataset::InMemDataset;
use burn::prelude::*;
use burn::tensor::ElementConversion;
use dataset::ImageFolder;
use log::info;
use mobilenetv3_classifier::training::{self, TrainingConfig};
use mobilenetv3_classifier::{MobileNetV3, MobileNetV3Config};
use std::fs;
use std::path::{Path, PathBuf};

#[cfg(not(feature = "wgpu"))]
type MyBackend = burn::backend::NdArray<f32>;

#[cfg(feature = "wgpu")]
type MyBackend = burn::backend::Wgpu<f32, i32>;

type MyAutodiffBackend = Autodiff<MyBackend>;

const CLASSES_FILE: &str = "classes.json";

#[derive(FromArgs)]
/// mobilenetv3-cli command line arguments
struct Arguments {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Summary(SummaryArgs),
    Train(TrainArgs),
    Predict(PredictArgs),
}

#[derive(FromArgs)]
/// print the resolved layer layout of the network
#[argh(subcommand, name = "summary")]
struct SummaryArgs {
    /// width multiplier (default 1.0)
    #[argh(option, default = "1.0")]
    width: f64,

    /// number of output classes (default 11)
    #[argh(option, default = "11")]
    classes: usize,

    /// input shape as height,width,channels (default 64,64,3)
    #[argh(option, default = "String::from(\"64,64,3\")")]
    input: String,
}

#[derive(FromArgs)]
/// train on a directory holding one sub-directory of images per class
#[argh(subcommand, name = "train")]
struct TrainArgs {
    /// training images, one sub-directory per class
    #[argh(positional)]
    data_dir: PathBuf,

    /// validation images, laid out like the training directory
    #[argh(option)]
    valid_dir: Option<PathBuf>,

    /// where configuration, class names and checkpoints are written
    #[argh(option, default = "PathBuf::from(\"artifacts\")")]
    artifact_dir: PathBuf,

    /// training configuration JSON to start from
    #[argh(option)]
    config: Option<PathBuf>,

    /// number of epochs
    #[argh(option)]
    epochs: Option<usize>,

    /// mini-batch size
    #[argh(option)]
    batch_size: Option<usize>,

    /// SGD learning rate
    #[argh(option)]
    learning_rate: Option<f64>,

    /// width multiplier
    #[argh(option)]
    width: Option<f64>,

    /// images are padded and resized to this square size
    #[argh(option)]
    image_size: Option<usize>,

    /// number of channels: 1 for grayscale, 3 for RGB
    #[argh(option)]
    channels: Option<usize>,
}

#[derive(FromArgs)]
/// classify a single image with a trained checkpoint
#[argh(subcommand, name = "predict")]
struct PredictArgs {
    /// file name of the image for inference
    #[argh(positional)]
    image_path: PathBuf,

    /// directory written by the train command
    #[argh(option, default = "PathBuf::from(\"artifacts\")")]
    artifact_dir: PathBuf,

    /// checkpoint epoch (default: last trained epoch)
    #[argh(option)]
    epoch: Option<usize>,
}

fn parse_shape(value: &str) -> Result<Vec<usize>> {
    return value
        .split(',')
        .map(|dim| {
            dim.trim()
                .parse::<usize>()
                .with_context(|| format!("invalid dimension `{dim}`"))
        })
        .collect();
}

fn init_device() -> Device<MyBackend> {
    let device: Device<MyBackend> = Default::default();
    info!("using device {:?}", device);
    return device;
}

fn summary(args: SummaryArgs) -> Result<()> {
    let config = MobileNetV3Config::new()
        .with_input_shape(parse_shape(&args.input)?)
        .with_num_classes(args.classes)
        .with_width_multiplier(args.width);
    let plan = config.plan()?;

    println!(
        "first layer: 3x3 conv s2, {} -> {}",
        plan.input_channels, plan.first_layer_channels
    );
    println!(
        "{:>3} {:>2} {:>5} {:>5} {:>5} {:>3} {:>6} {:>2} {:>8}",
        "#", "k", "in", "exp", "out", "SE", "NL", "s", "residual"
    );
    for (idx, block) in plan.blocks.iter().enumerate() {
        println!(
            "{:>3} {:>2} {:>5} {:>5} {:>5} {:>3} {:>6} {:>2} {:>8}",
            idx,
            block.kernel_size,
            block.in_channels,
            block.expanded_channels,
            block.out_channels,
            if block.use_se { "yes" } else { "no" },
            block.activation.to_string(),
            block.stride,
            block.use_residual
        );
    }
    println!(
        "last stage: {} -> {} -> {} classes",
        plan.penultimate_channels, plan.last_channels, plan.num_classes
    );

    return Ok(());
}

fn train(args: TrainArgs) -> Result<()> {
    let mut config = match args.config {
        Some(ref path) => TrainingConfig::load(path).map_err(|err| {
            anyhow::anyhow!("cannot load {}: {}", path.display(), err)
        })?,
        None => TrainingConfig::new(MobileNetV3Config::new()),
    };

    if let Some(epochs) = args.epochs {
        config.num_epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(learning_rate) = args.learning_rate {
        config.learning_rate = learning_rate;
    }
    if let Some(width) = args.width {
        config.model.width_multiplier = width;
    }
    if args.image_size.is_some() || args.channels.is_some() {
        let mut shape = config.model.input_shape.clone();
        shape.resize(3, 0);
        if let Some(size) = args.image_size {
            shape[0] = size;
            shape[1] = size;
        }
        if let Some(channels) = args.channels {
            shape[2] = channels;
        }
        config.model.input_shape = shape;
    }

    let shape = config.model.input_shape.clone();
    if shape.len() != 3 || shape[0] != shape[1] {
        bail!("images are padded to a square, got input shape {shape:?}");
    }
    let (image_size, channels) = (shape[0] as u32, shape[2]);

    let train_folder = ImageFolder::load(&args.data_dir, image_size, channels)?;
    config.model.num_classes = train_folder.classes.len();

    let valid_set = match args.valid_dir {
        Some(ref dir) => Some(InMemDataset::new(
            ImageFolder::load_with_classes(
                dir,
                &train_folder.classes,
                image_size,
                channels,
            )?
            .items,
        )),
        None => None,
    };

    fs::create_dir_all(&args.artifact_dir)?;
    fs::write(
        args.artifact_dir.join(CLASSES_FILE),
        serde_json::to_string_pretty(&train_folder.classes)?,
    )?;

    let device = init_device();
    let (_, report) = training::train::<MyAutodiffBackend, _, _>(
        &config,
        InMemDataset::new(train_folder.items),
        valid_set,
        &args.artifact_dir,
        &device,
    )?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    return Ok(());
}

fn load_classes(artifact_dir: &Path) -> Result<Vec<String>> {
    let path = artifact_dir.join(CLASSES_FILE);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    return Ok(serde_json::from_str(&raw)?);
}

fn print_top_prediction<B: Backend>(probabilities: Tensor<B, 2>, classes: &[String]) {
    let (score, idx) = probabilities.max_dim_with_indices(1);
    let idx = idx.into_scalar().elem::<i64>() as usize;
    let score = score.into_scalar().elem::<f32>();

    println!("Category ID: {}", idx);
    println!(
        "Predicted Class: {}",
        classes.get(idx).map(String::as_str).unwrap_or("<unknown>")
    );
    println!("Confidence Score: {}", score);
}

fn predict(args: PredictArgs) -> Result<()> {
    let epoch = match args.epoch {
        Some(epoch) => epoch,
        None => {
            let path = args.artifact_dir.join("config.json");
            TrainingConfig::load(&path)
                .map_err(|err| anyhow::anyhow!("cannot load {}: {}", path.display(), err))?
                .num_epochs
        }
    };

    let device = init_device();
    let (model, config): (MobileNetV3<MyBackend>, TrainingConfig) =
        training::load_checkpoint(&args.artifact_dir, epoch, &device)?;
    let classes = load_classes(&args.artifact_dir)?;

    let shape = &config.model.input_shape;
    let img = image::open(&args.image_path).with_context(|| {
        format!("failed to load image {}", args.image_path.display())
    })?;
    let padded = transforms::img_resize_with_pad(&img, shape[0] as u32)?;
    let input = transforms::img_to_tensor::<MyBackend>(&padded, shape[2], &device)?
        .unsqueeze::<4>();

    let probabilities = model.forward(input)?;
    print_top_prediction(probabilities, &classes);
    return Ok(());
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    let args: Arguments = argh::from_env();

    match args.command {
        Command::Summary(args) => summary(args),
        Command::Train(args) => train(args),
        Command::Predict(args) => predict(args),
    }
}
