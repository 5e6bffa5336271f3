use super::activation::{Activation, ActivationKind};
use super::identity::Identity;
use crate::error::ConfigurationError;
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Serializable selector for the normalization slot of a conv layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NormKind {
    None,
    BatchNorm,
}

impl NormKind {
    pub fn init<B: Backend>(
        &self,
        channels: usize,
        device: &B::Device,
    ) -> Normalization<B> {
        match self {
            NormKind::None => Normalization::Identity(Identity::new()),
            // Keras decay of 0.99 for the running averages, i.e. 0.01 in the
            // burn/PyTorch momentum convention.
            NormKind::BatchNorm => Normalization::BatchNorm(
                BatchNormConfig::new(channels)
                    .with_epsilon(0.001)
                    .with_momentum(0.01)
                    .init(device),
            ),
        }
    }
}

impl FromStr for NormKind {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Ok(NormKind::None),
            "bn" | "batchnorm" => Ok(NormKind::BatchNorm),
            _ => Err(ConfigurationError::UnknownNormalization(
                value.to_string(),
            )),
        }
    }
}

impl fmt::Display for NormKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NormKind::None => f.write_str("none"),
            NormKind::BatchNorm => f.write_str("bn"),
        }
    }
}

impl TryFrom<String> for NormKind {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        return value.parse();
    }
}

impl From<NormKind> for String {
    fn from(kind: NormKind) -> Self {
        return kind.to_string();
    }
}

#[derive(Module, Debug)]
pub enum Normalization<B: Backend> {
    BatchNorm(BatchNorm<B, 2>),
    Identity(Identity),
}

impl<B: Backend> Normalization<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Normalization::BatchNorm(layer) => layer.forward(input),
            Normalization::Identity(layer) => layer.forward(input),
        }
    }
}

#[derive(Config, Debug)]
pub struct ConvNormActivationConfig {
    in_channels: usize,
    out_channels: usize,

    #[config(default = "3")]
    kernel_size: usize,

    #[config(default = "1")]
    stride: usize,

    /// Zero padding added to both edges of each spatial axis.
    #[config(default = "0")]
    padding: usize,

    #[config(default = "1")]
    groups: usize,

    #[config(default = "NormKind::None")]
    norm: NormKind,

    #[config(default = "ActivationKind::Relu")]
    activation: ActivationKind,

    #[config(default = "true")]
    bias: bool,

    #[config(default = "1e-5")]
    l2_reg: f64,
}

impl ConvNormActivationConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvNormActivation<B> {
        return ConvNormActivation {
            conv: Conv2dConfig::new(
                [self.in_channels, self.out_channels],
                [self.kernel_size, self.kernel_size],
            )
            .with_stride([self.stride, self.stride])
            .with_padding(PaddingConfig2d::Explicit(self.padding, self.padding))
            .with_groups(self.groups)
            .with_bias(self.bias)
            .init(device),
            norm: self.norm.init(self.out_channels, device),
            activation: self.activation.init(),
            l2_reg: self.l2_reg,
        };
    }
}

#[derive(Module, Debug)]
pub struct ConvNormActivation<B: Backend> {
    conv: Conv2d<B>,
    norm: Normalization<B>,
    activation: Activation,
    l2_reg: f64,
}

impl<B: Backend> ConvNormActivation<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);
        return self.activation.forward(x);
    }

    /// `l2_reg * sum(w^2)` over the convolution kernel. Bias and
    /// normalization parameters are not regularized.
    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        return self
            .conv
            .weight
            .val()
            .powf_scalar(2.0)
            .sum()
            .mul_scalar(self.l2_reg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, ElementConversion};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_padded_stride_two_halves_spatial_dims() {
        let device = Default::default();
        let layer = ConvNormActivationConfig::new(3, 16)
            .with_kernel_size(3)
            .with_stride(2)
            .with_padding(1)
            .with_norm(NormKind::BatchNorm)
            .with_activation(ActivationKind::Hardswish)
            .with_bias(false)
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::random(
            [2, 3, 64, 64],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        assert_eq!(layer.forward(input).dims(), [2, 16, 32, 32]);
    }

    #[test]
    fn test_unpadded_kernel_shrinks_input() {
        let device = Default::default();
        let layer = ConvNormActivationConfig::new(4, 8)
            .with_kernel_size(3)
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::ones([1, 4, 10, 10], &device);

        assert_eq!(layer.forward(input).dims(), [1, 8, 8, 8]);
    }

    #[test]
    fn test_depthwise_groups_keep_channels() {
        let device = Default::default();
        let layer = ConvNormActivationConfig::new(24, 24)
            .with_kernel_size(5)
            .with_padding(2)
            .with_groups(24)
            .with_bias(false)
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::ones([1, 24, 9, 9], &device);

        assert_eq!(layer.forward(input).dims(), [1, 24, 9, 9]);
    }

    #[test]
    fn test_relu_output_is_non_negative() {
        let device = Default::default();
        let layer = ConvNormActivationConfig::new(3, 8)
            .with_kernel_size(1)
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::random(
            [1, 3, 4, 4],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let min = layer.forward(input).min().into_scalar().elem::<f32>();

        assert!(min >= 0.0);
    }

    #[test]
    fn test_l2_penalty_matches_weights() {
        let device = Default::default();
        let layer = ConvNormActivationConfig::new(3, 4)
            .with_kernel_size(1)
            .with_l2_reg(0.5)
            .init::<TestBackend>(&device);

        let weights: Vec<f32> =
            layer.conv.weight.val().into_data().to_vec().unwrap();
        let expected: f32 = 0.5 * weights.iter().map(|w| w * w).sum::<f32>();
        let penalty = layer.l2_penalty().into_scalar().elem::<f32>();

        assert!((penalty - expected).abs() < 1e-5);
    }

    #[test]
    fn test_parse_normalization_names() {
        assert_eq!("bn".parse::<NormKind>(), Ok(NormKind::BatchNorm));
        assert_eq!("none".parse::<NormKind>(), Ok(NormKind::None));
        assert_eq!(
            "groupnorm".parse::<NormKind>(),
            Err(ConfigurationError::UnknownNormalization(
                "groupnorm".to_string()
            ))
        );
    }

    #[test]
    fn test_config_file_names_go_through_parser() {
        let config = ConvNormActivationConfig::new(3, 16)
            .with_norm(NormKind::BatchNorm)
            .with_activation(ActivationKind::Hardswish);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"norm\":\"bn\""), "{json}");
        assert!(json.contains("\"activation\":\"hswish\""), "{json}");

        let restored: ConvNormActivationConfig =
            serde_json::from_str(&json).unwrap();
        assert_eq!(restored.norm, NormKind::BatchNorm);
        assert_eq!(restored.activation, ActivationKind::Hardswish);

        let bad_activation = json.replace("hswish", "gelu");
        let err = serde_json::from_str::<ConvNormActivationConfig>(&bad_activation)
            .unwrap_err();
        assert!(err.to_string().contains("unknown activation `gelu`"), "{err}");

        let bad_norm = json.replace("\"bn\"", "\"groupnorm\"");
        let err =
            serde_json::from_str::<ConvNormActivationConfig>(&bad_norm).unwrap_err();
        assert!(
            err.to_string().contains("unknown normalization `groupnorm`"),
            "{err}"
        );
    }
}
