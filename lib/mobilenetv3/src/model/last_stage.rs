use super::activation::ActivationKind;
use super::conv_norm_activation::{
    ConvNormActivation, ConvNormActivationConfig, NormKind,
};
use burn::{
    config::Config,
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig,
    },
    tensor::{backend::Backend, Tensor},
};

#[derive(Config, Debug)]
pub struct LastStageConfig {
    in_channels: usize,
    penultimate_channels: usize,
    last_channels: usize,
    num_classes: usize,

    #[config(default = "0.2")]
    dropout: f64,

    #[config(default = "1e-5")]
    l2_reg: f64,
}

impl LastStageConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LastStage<B> {
        return LastStage {
            conv1: ConvNormActivationConfig::new(
                self.in_channels,
                self.penultimate_channels,
            )
            .with_kernel_size(1)
            .with_norm(NormKind::BatchNorm)
            .with_activation(ActivationKind::Hardswish)
            .with_bias(false)
            .with_l2_reg(self.l2_reg)
            .init(device),
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            conv2: ConvNormActivationConfig::new(
                self.penultimate_channels,
                self.last_channels,
            )
            .with_kernel_size(1)
            .with_activation(ActivationKind::Hardswish)
            .with_l2_reg(self.l2_reg)
            .init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            conv3: ConvNormActivationConfig::new(
                self.last_channels,
                self.num_classes,
            )
            .with_kernel_size(1)
            .with_activation(ActivationKind::Softmax)
            .with_l2_reg(self.l2_reg)
            .init(device),
        };
    }
}

/// Classification head: 1x1 conv, global pooling, two 1x1 "dense" convs and
/// a softmax over the classes.
#[derive(Module, Debug)]
pub struct LastStage<B: Backend> {
    conv1: ConvNormActivation<B>,
    avgpool: AdaptiveAvgPool2d,
    conv2: ConvNormActivation<B>,
    dropout: Dropout,
    conv3: ConvNormActivation<B>,
}

impl<B: Backend> LastStage<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(input);
        let x = self.avgpool.forward(x);
        let x = self.conv2.forward(x);
        let x = self.dropout.forward(x);
        let x = self.conv3.forward(x);

        // [N, classes, 1, 1] -> [N, classes]
        let [batch_size, num_classes, _, _] = x.dims();
        return x.reshape([batch_size, num_classes]);
    }

    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        return self.conv1.l2_penalty()
            + self.conv2.l2_penalty()
            + self.conv3.l2_penalty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_head_emits_probabilities() {
        let device = Default::default();
        let head = LastStageConfig::new(40, 96, 128, 5)
            .init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 4>::random(
            [3, 40, 2, 2],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let output = head.forward(input);
        assert_eq!(output.dims(), [3, 5]);

        let sums: Vec<f32> = output.clone().sum_dim(1).into_data().to_vec().unwrap();
        for sum in sums {
            assert!((sum - 1.0).abs() < 1e-5);
        }
        let values: Vec<f32> = output.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_dropout_is_identity_without_autodiff() {
        let device = Default::default();
        let head = LastStageConfig::new(8, 16, 16, 3)
            .with_dropout(0.9)
            .init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 4>::random(
            [1, 8, 3, 3],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let first: Vec<f32> =
            head.forward(input.clone()).into_data().to_vec().unwrap();
        let second: Vec<f32> = head.forward(input).into_data().to_vec().unwrap();
        assert_eq!(first, second);
    }
}
