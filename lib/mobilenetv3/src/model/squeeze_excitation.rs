use super::activation::ActivationKind;
use super::conv_norm_activation::{ConvNormActivation, ConvNormActivationConfig};
use burn::{
    config::Config,
    module::Module,
    nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    tensor::{backend::Backend, Tensor},
};

#[derive(Config, Debug)]
pub struct SqueezeExcitationConfig {
    input_channels: usize,

    #[config(default = "4")]
    reduction: usize,

    #[config(default = "1e-5")]
    l2_reg: f64,
}

impl SqueezeExcitationConfig {
    /// Width of the bottleneck between squeeze and excite. Plain floor
    /// division, as in the reference weights; a zero width is bumped to one.
    pub fn squeeze_channels(&self) -> usize {
        return (self.input_channels / self.reduction.max(1)).max(1);
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SqueezeExcitation<B> {
        let squeeze_channels = self.squeeze_channels();

        return SqueezeExcitation {
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            squeeze: ConvNormActivationConfig::new(
                self.input_channels,
                squeeze_channels,
            )
            .with_kernel_size(1)
            .with_activation(ActivationKind::Relu)
            .with_bias(false)
            .with_l2_reg(self.l2_reg)
            .init(device),
            excite: ConvNormActivationConfig::new(
                squeeze_channels,
                self.input_channels,
            )
            .with_kernel_size(1)
            .with_activation(ActivationKind::HardSigmoid)
            .with_bias(false)
            .with_l2_reg(self.l2_reg)
            .init(device),
        };
    }
}

#[derive(Module, Debug)]
pub struct SqueezeExcitation<B: Backend> {
    avgpool: AdaptiveAvgPool2d,
    squeeze: ConvNormActivation<B>,
    excite: ConvNormActivation<B>,
}

impl<B: Backend> SqueezeExcitation<B> {
    /// Per-channel gate in `[0, 1]`, shaped `[N, C, 1, 1]`.
    pub fn scale(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = self.avgpool.forward(input);
        let scale = self.squeeze.forward(scale);
        return self.excite.forward(scale);
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = self.scale(input.clone());
        return input * scale;
    }

    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        return self.squeeze.l2_penalty() + self.excite.l2_penalty();
    }
}
