use super::activation::ActivationKind;
use super::conv_norm_activation::{
    ConvNormActivation, ConvNormActivationConfig, NormKind,
};
use super::inverted_residual::{
    BlockSpec, BottleneckActivationType, InvertedResidual,
    InvertedResidualConfig, ResolvedInvertedResidual,
};
use super::last_stage::{LastStage, LastStageConfig};
use super::util::adjust_channels;
use crate::error::{ConfigurationError, ModelError};
use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Device, Tensor},
};
use log::info;
use serde::Serialize;

const RE: BottleneckActivationType = BottleneckActivationType::Relu;
const HS: BottleneckActivationType = BottleneckActivationType::Hardswish;

/// Bottleneck layout of MobileNetV3-Large.
pub const MOBILENET_V3_LARGE: [BlockSpec; 15] = [
    //            k  exp  out   SE     NL  s
    BlockSpec::new(3, 16, 16, false, RE, 1),
    BlockSpec::new(3, 64, 24, false, RE, 2),
    BlockSpec::new(3, 72, 24, false, RE, 1),
    BlockSpec::new(5, 72, 40, true, RE, 2),
    BlockSpec::new(5, 120, 40, true, RE, 1),
    BlockSpec::new(5, 120, 40, true, RE, 1),
    BlockSpec::new(3, 240, 80, false, HS, 2),
    BlockSpec::new(3, 200, 80, false, HS, 1),
    BlockSpec::new(3, 184, 80, false, HS, 1),
    BlockSpec::new(3, 184, 80, false, HS, 1),
    BlockSpec::new(3, 480, 112, true, HS, 1),
    BlockSpec::new(3, 672, 112, true, HS, 1),
    BlockSpec::new(5, 672, 160, true, HS, 2),
    BlockSpec::new(5, 960, 160, true, HS, 1),
    BlockSpec::new(5, 960, 160, true, HS, 1),
];

const FIRST_LAYER_CHANNELS: usize = 16;
const PENULTIMATE_CHANNELS: usize = 960;
const LAST_CHANNELS: usize = 1280;

/// Upper bound for any scaled channel count and for the divisor.
const MAX_CHANNELS: usize = 1 << 20;

#[derive(Config, Debug)]
pub struct MobileNetV3Config {
    /// `(height, width, channels)` of a single input image.
    #[config(default = "vec![64, 64, 3]")]
    pub input_shape: Vec<usize>,

    #[config(default = "11")]
    pub num_classes: usize,

    #[config(default = "1.0")]
    pub width_multiplier: f64,

    /// Every scaled channel count is rounded to a multiple of this.
    #[config(default = "8")]
    pub divisor: usize,

    #[config(default = "1e-5")]
    pub l2_reg: f64,

    #[config(default = "0.2")]
    pub dropout: f64,

    #[config(default = "4")]
    pub se_reduction: usize,
}

/// Fully resolved topology: every channel count and skip decision.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NetworkPlan {
    pub input_channels: usize,
    pub first_layer_channels: usize,
    pub blocks: Vec<ResolvedInvertedResidual>,
    pub penultimate_channels: usize,
    pub last_channels: usize,
    pub num_classes: usize,
}

impl MobileNetV3Config {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.input_shape.len() != 3 {
            return Err(ConfigurationError::InputShape(self.input_shape.len()));
        }
        if self.input_shape.iter().any(|dim| *dim == 0) {
            return Err(ConfigurationError::invalid(
                "input_shape",
                format!("dimensions must be positive, got {:?}", self.input_shape),
            ));
        }
        if self.num_classes == 0 {
            return Err(ConfigurationError::invalid(
                "num_classes",
                "must be positive",
            ));
        }
        if !self.width_multiplier.is_finite() || self.width_multiplier <= 0.0 {
            return Err(ConfigurationError::invalid(
                "width_multiplier",
                format!("must be positive, got {}", self.width_multiplier),
            ));
        }
        if LAST_CHANNELS as f64 * self.width_multiplier > MAX_CHANNELS as f64 {
            return Err(ConfigurationError::invalid(
                "width_multiplier",
                format!(
                    "{} scales {} channels beyond {}",
                    self.width_multiplier, LAST_CHANNELS, MAX_CHANNELS
                ),
            ));
        }
        if self.divisor == 0 || self.divisor > MAX_CHANNELS {
            return Err(ConfigurationError::invalid(
                "divisor",
                format!("must be in 1..={}, got {}", MAX_CHANNELS, self.divisor),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ConfigurationError::invalid(
                "dropout",
                format!("must be in [0, 1), got {}", self.dropout),
            ));
        }
        if self.se_reduction == 0 {
            return Err(ConfigurationError::invalid(
                "se_reduction",
                "must be positive",
            ));
        }
        if !(self.l2_reg >= 0.0) {
            return Err(ConfigurationError::invalid(
                "l2_reg",
                format!("must be non-negative, got {}", self.l2_reg),
            ));
        }

        return Ok(());
    }

    fn adjust(&self, channels: usize) -> usize {
        return adjust_channels(channels, self.width_multiplier, self.divisor);
    }

    /// Resolves the whole network without allocating any weights.
    pub fn plan(&self) -> Result<NetworkPlan, ConfigurationError> {
        self.validate()?;

        let first_layer_channels = self.adjust(FIRST_LAYER_CHANNELS);

        let mut in_channels = first_layer_channels;
        let mut blocks = Vec::with_capacity(MOBILENET_V3_LARGE.len());
        for spec in MOBILENET_V3_LARGE.iter() {
            let block = InvertedResidualConfig::from_spec(
                spec,
                self.width_multiplier,
                self.divisor,
            )
            .with_l2_reg(self.l2_reg)
            .with_se_reduction(self.se_reduction)
            .configure(in_channels)?;

            in_channels = block.out_channels;
            blocks.push(block);
        }

        return Ok(NetworkPlan {
            input_channels: self.input_shape[2],
            first_layer_channels,
            blocks,
            penultimate_channels: self.adjust(PENULTIMATE_CHANNELS),
            last_channels: self.adjust(LAST_CHANNELS),
            num_classes: self.num_classes,
        });
    }

    pub fn init<B: Backend>(
        &self,
        device: &Device<B>,
    ) -> Result<MobileNetV3<B>, ConfigurationError> {
        let plan = self.plan()?;

        let first_layer = ConvNormActivationConfig::new(
            plan.input_channels,
            plan.first_layer_channels,
        )
        .with_kernel_size(3)
        .with_stride(2)
        .with_padding(1)
        .with_norm(NormKind::BatchNorm)
        .with_activation(ActivationKind::Hardswish)
        .with_bias(false)
        .with_l2_reg(self.l2_reg)
        .init(device);

        let blocks = plan
            .blocks
            .iter()
            .map(|block| block.init(device))
            .collect::<Vec<_>>();

        let last_stage_input = plan
            .blocks
            .last()
            .map_or(plan.first_layer_channels, |block| block.out_channels);
        let last_stage = LastStageConfig::new(
            last_stage_input,
            plan.penultimate_channels,
            plan.last_channels,
            plan.num_classes,
        )
        .with_dropout(self.dropout)
        .with_l2_reg(self.l2_reg)
        .init(device);

        info!(
            "built MobileNetV3 for input {:?}: width x{}, {} blocks, {} classes",
            self.input_shape,
            self.width_multiplier,
            blocks.len(),
            plan.num_classes
        );

        return Ok(MobileNetV3 {
            first_layer,
            blocks,
            last_stage,
            input_channels: plan.input_channels,
        });
    }
}

/// Builds a MobileNetV3-Large classifier for images of
/// `input_shape = (height, width, channels)`.
pub fn build_network<B: Backend>(
    input_shape: &[usize],
    num_classes: usize,
    width_multiplier: f64,
    l2_reg: f64,
    device: &Device<B>,
) -> Result<MobileNetV3<B>, ConfigurationError> {
    if input_shape.len() != 3 {
        return Err(ConfigurationError::InputShape(input_shape.len()));
    }

    return MobileNetV3Config::new()
        .with_input_shape(input_shape.to_vec())
        .with_num_classes(num_classes)
        .with_width_multiplier(width_multiplier)
        .with_l2_reg(l2_reg)
        .init(device);
}

#[derive(Module, Debug)]
pub struct MobileNetV3<B: Backend> {
    first_layer: ConvNormActivation<B>,
    blocks: Vec<InvertedResidual<B>>,
    last_stage: LastStage<B>,
    input_channels: usize,
}

impl<B: Backend> MobileNetV3<B> {
    /// Maps `[N, C, H, W]` images to `[N, num_classes]` probabilities.
    pub fn forward(&self, input: Tensor<B, 4>) -> Result<Tensor<B, 2>, ModelError> {
        let [_, channels, _, _] = input.dims();
        if channels != self.input_channels {
            return Err(ModelError::ShapeMismatch {
                expected: self.input_channels,
                actual: channels,
            });
        }

        let mut x = self.first_layer.forward(input);
        for block in &self.blocks {
            x = block.try_forward(x)?;
        }

        return Ok(self.last_stage.forward(x));
    }

    pub fn input_channels(&self) -> usize {
        return self.input_channels;
    }

    /// Sum of the L2 penalties of every convolution kernel in the network.
    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        let mut penalty =
            self.first_layer.l2_penalty() + self.last_stage.l2_penalty();
        for block in &self.blocks {
            penalty = penalty + block.l2_penalty();
        }
        return penalty;
    }
}
