use super::activation::{Activation, ActivationKind};
use super::conv_norm_activation::{
    ConvNormActivation, ConvNormActivationConfig, NormKind,
};
use super::squeeze_excitation::{SqueezeExcitation, SqueezeExcitationConfig};
use super::util::adjust_channels;
use crate::error::{ConfigurationError, ModelError};
use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Tensor},
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum BottleneckActivationType {
    Hardswish,
    Relu,
}

impl BottleneckActivationType {
    pub fn kind(&self) -> ActivationKind {
        match self {
            BottleneckActivationType::Hardswish => ActivationKind::Hardswish,
            BottleneckActivationType::Relu => ActivationKind::Relu,
        }
    }
}

impl FromStr for BottleneckActivationType {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.parse::<ActivationKind>()? {
            ActivationKind::Relu => Ok(BottleneckActivationType::Relu),
            ActivationKind::Hardswish => Ok(BottleneckActivationType::Hardswish),
            _ => Err(ConfigurationError::UnknownActivation(value.to_string())),
        }
    }
}

impl fmt::Display for BottleneckActivationType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        return fmt::Display::fmt(&self.kind(), f);
    }
}

impl TryFrom<String> for BottleneckActivationType {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        return value.parse();
    }
}

impl From<BottleneckActivationType> for String {
    fn from(kind: BottleneckActivationType) -> Self {
        return kind.to_string();
    }
}

/// One row of the bottleneck table, channel counts before width scaling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlockSpec {
    pub kernel_size: usize,
    pub expand_channels: usize,
    pub out_channels: usize,
    pub use_se: bool,
    pub activation: BottleneckActivationType,
    pub stride: usize,
}

impl BlockSpec {
    pub const fn new(
        kernel_size: usize,
        expand_channels: usize,
        out_channels: usize,
        use_se: bool,
        activation: BottleneckActivationType,
        stride: usize,
    ) -> Self {
        return Self {
            kernel_size,
            expand_channels,
            out_channels,
            use_se,
            activation,
            stride,
        };
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoundedChannels {
    pub expanded: usize,
    pub output: usize,
}

#[derive(Config, Debug)]
pub struct InvertedResidualConfig {
    pub kernel_size: usize,
    pub channels: RoundedChannels,
    pub use_se: bool,
    pub activation: BottleneckActivationType,
    pub stride: usize,

    #[config(default = "1e-5")]
    pub l2_reg: f64,

    #[config(default = "4")]
    pub se_reduction: usize,
}

impl InvertedResidualConfig {
    /// Scales the table row by `width_mult`, rounding each channel count
    /// to a multiple of `divisor`.
    pub fn from_spec(spec: &BlockSpec, width_mult: f64, divisor: usize) -> Self {
        let channels = RoundedChannels {
            expanded: adjust_channels(spec.expand_channels, width_mult, divisor),
            output: adjust_channels(spec.out_channels, width_mult, divisor),
        };

        return Self::new(
            spec.kernel_size,
            channels,
            spec.use_se,
            spec.activation,
            spec.stride,
        );
    }

    /// Fixes the input width and with it the skip-connection decision.
    pub fn configure(
        &self,
        in_channels: usize,
    ) -> Result<ResolvedInvertedResidual, ConfigurationError> {
        if self.stride < 1 || self.stride > 2 {
            return Err(ConfigurationError::invalid(
                "stride",
                format!("expected 1 or 2, got {}", self.stride),
            ));
        }
        if self.kernel_size % 2 == 0 {
            return Err(ConfigurationError::invalid(
                "kernel_size",
                format!("expected an odd size, got {}", self.kernel_size),
            ));
        }
        if in_channels == 0 {
            return Err(ConfigurationError::invalid(
                "in_channels",
                "must be positive",
            ));
        }

        return Ok(ResolvedInvertedResidual {
            in_channels,
            expanded_channels: self.channels.expanded,
            out_channels: self.channels.output,
            kernel_size: self.kernel_size,
            padding: (self.kernel_size - 1) / 2,
            stride: self.stride,
            use_se: self.use_se,
            activation: self.activation,
            use_residual: self.stride == 1 && in_channels == self.channels.output,
            l2_reg: self.l2_reg,
            se_reduction: self.se_reduction,
        });
    }
}

/// A block whose input width is known; everything needed to build it or to
/// inspect its topology without running a forward pass.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResolvedInvertedResidual {
    pub in_channels: usize,
    pub expanded_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub padding: usize,
    pub stride: usize,
    pub use_se: bool,
    pub activation: BottleneckActivationType,
    pub use_residual: bool,
    pub l2_reg: f64,
    pub se_reduction: usize,
}

impl ResolvedInvertedResidual {
    pub fn init<B: Backend>(&self, device: &B::Device) -> InvertedResidual<B> {
        debug!(
            "inverted residual {} -> {} -> {}, k{} s{} se={} act={} residual={}",
            self.in_channels,
            self.expanded_channels,
            self.out_channels,
            self.kernel_size,
            self.stride,
            self.use_se,
            self.activation,
            self.use_residual
        );

        let activation = self.activation.kind();

        let expand =
            ConvNormActivationConfig::new(self.in_channels, self.expanded_channels)
                .with_kernel_size(1)
                .with_norm(NormKind::BatchNorm)
                .with_activation(activation)
                .with_bias(false)
                .with_l2_reg(self.l2_reg)
                .init(device);

        // The activation runs after the optional squeeze-excite gate, so the
        // depthwise layer itself stops at the normalization.
        let depthwise = ConvNormActivationConfig::new(
            self.expanded_channels,
            self.expanded_channels,
        )
        .with_kernel_size(self.kernel_size)
        .with_stride(self.stride)
        .with_padding(self.padding)
        .with_groups(self.expanded_channels)
        .with_norm(NormKind::BatchNorm)
        .with_activation(ActivationKind::None)
        .with_bias(false)
        .with_l2_reg(self.l2_reg)
        .init(device);

        let se_layer = if self.use_se {
            Some(
                SqueezeExcitationConfig::new(self.expanded_channels)
                    .with_reduction(self.se_reduction)
                    .with_l2_reg(self.l2_reg)
                    .init(device),
            )
        } else {
            None
        };

        let project =
            ConvNormActivationConfig::new(self.expanded_channels, self.out_channels)
                .with_kernel_size(1)
                .with_norm(NormKind::BatchNorm)
                .with_activation(ActivationKind::None)
                .with_bias(false)
                .with_l2_reg(self.l2_reg)
                .init(device);

        return InvertedResidual {
            expand,
            depthwise,
            se_layer,
            activation: activation.init(),
            project,
            in_channels: self.in_channels,
            use_residual: self.use_residual,
        };
    }
}

#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: ConvNormActivation<B>,
    depthwise: ConvNormActivation<B>,
    se_layer: Option<SqueezeExcitation<B>>,
    activation: Activation,
    project: ConvNormActivation<B>,
    in_channels: usize,
    use_residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    /// expand -> depthwise -> (squeeze-excite) -> activation -> project,
    /// without the skip connection.
    pub fn transform(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.expand.forward(input);
        let mut x = self.depthwise.forward(x);

        if let Some(ref se) = self.se_layer {
            x = se.forward(x);
        }

        let x = self.activation.forward(x);
        return self.project.forward(x);
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        if self.use_residual {
            let x = self.transform(input.clone());
            return input + x;
        }

        return self.transform(input);
    }

    pub fn try_forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Result<Tensor<B, 4>, ModelError> {
        let [_, channels, _, _] = input.dims();
        if channels != self.in_channels {
            return Err(ModelError::ShapeMismatch {
                expected: self.in_channels,
                actual: channels,
            });
        }

        return Ok(self.forward(input));
    }

    pub fn use_residual(&self) -> bool {
        return self.use_residual;
    }

    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        let mut penalty = self.expand.l2_penalty()
            + self.depthwise.l2_penalty()
            + self.project.l2_penalty();

        if let Some(ref se) = self.se_layer {
            penalty = penalty + se.l2_penalty();
        }

        return penalty;
    }
}
