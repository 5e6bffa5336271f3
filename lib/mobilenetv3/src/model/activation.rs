use super::identity::Identity;
use crate::error::ConfigurationError;
use burn::{
    module::Module,
    nn::Relu,
    tensor::{activation::softmax, backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Module, Debug, Clone, Default)]
pub struct Relu6 {
    relu: Relu,
}

impl Relu6 {
    pub fn new() -> Self {
        return Self { relu: Relu::new() };
    }

    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let x = self.relu.forward(input);
        return x.clamp_max(6.0);
    }
}

/// Piecewise linear sigmoid approximation, `ReLU6(x + 3) / 6`.
///
/// Not to be confused with `burn::nn::HardSigmoid`, which defaults to the
/// ONNX slope of 0.2.
#[derive(Module, Debug, Clone, Default)]
pub struct HardSigmoid {
    relu6: Relu6,
}

impl HardSigmoid {
    pub fn new() -> Self {
        return Self {
            relu6: Relu6::new(),
        };
    }

    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        return self.relu6.forward(input.add_scalar(3.0)).div_scalar(6.0);
    }
}

#[derive(Module, Debug, Clone, Default)]
pub struct Hardswish {
    hard_sigmoid: HardSigmoid,
}

impl Hardswish {
    pub fn new() -> Self {
        return Self {
            hard_sigmoid: HardSigmoid::new(),
        };
    }

    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        // Hardswish: x * ReLU6(x + 3) / 6
        let gate = self.hard_sigmoid.forward(input.clone());
        return input.mul(gate);
    }
}

/// Softmax across the channel axis (dim 1 for both `[N, C]` and
/// `[N, C, H, W]` tensors).
#[derive(Module, Debug, Clone, Default)]
pub struct Softmax {}

impl Softmax {
    pub fn new() -> Self {
        return Self {};
    }

    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        return softmax(input, 1);
    }
}

#[derive(Module, Clone, Debug)]
pub enum Activation {
    Relu(Relu),
    Identity(Identity),
    Relu6(Relu6),
    Hardswish(Hardswish),
    HardSigmoid(HardSigmoid),
    Softmax(Softmax),
}

impl Activation {
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Activation::Relu(layer) => layer.forward(input),
            Activation::Identity(layer) => layer.forward(input),
            Activation::Relu6(layer) => layer.forward(input),
            Activation::Hardswish(layer) => layer.forward(input),
            Activation::HardSigmoid(layer) => layer.forward(input),
            Activation::Softmax(layer) => layer.forward(input),
        }
    }
}

/// Serializable selector for [`Activation`], used by layer configs. Stored
/// in configuration files under its [`fmt::Display`] name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActivationKind {
    None,
    Relu,
    Relu6,
    Hardswish,
    HardSigmoid,
    Softmax,
}

impl ActivationKind {
    pub fn init(&self) -> Activation {
        match self {
            ActivationKind::None => Activation::Identity(Identity::new()),
            ActivationKind::Relu => Activation::Relu(Relu::new()),
            ActivationKind::Relu6 => Activation::Relu6(Relu6::new()),
            ActivationKind::Hardswish => Activation::Hardswish(Hardswish::new()),
            ActivationKind::HardSigmoid => {
                Activation::HardSigmoid(HardSigmoid::new())
            }
            ActivationKind::Softmax => Activation::Softmax(Softmax::new()),
        }
    }
}

impl FromStr for ActivationKind {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "none" | "identity" => Ok(ActivationKind::None),
            "relu" => Ok(ActivationKind::Relu),
            "relu6" => Ok(ActivationKind::Relu6),
            "hswish" | "hardswish" => Ok(ActivationKind::Hardswish),
            "hsigmoid" | "hardsigmoid" => Ok(ActivationKind::HardSigmoid),
            "softmax" => Ok(ActivationKind::Softmax),
            _ => Err(ConfigurationError::UnknownActivation(value.to_string())),
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ActivationKind::None => "none",
            ActivationKind::Relu => "relu",
            ActivationKind::Relu6 => "relu6",
            ActivationKind::Hardswish => "hswish",
            ActivationKind::HardSigmoid => "hsigmoid",
            ActivationKind::Softmax => "softmax",
        };
        return f.write_str(name);
    }
}

impl TryFrom<String> for ActivationKind {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        return value.parse();
    }
}

impl From<ActivationKind> for String {
    fn from(kind: ActivationKind) -> Self {
        return kind.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    fn apply(activation: &Activation, values: &[f32]) -> Vec<f32> {
        let device = Default::default();
        let input = Tensor::<TestBackend, 1>::from_data(
            TensorData::new(values.to_vec(), [values.len()]),
            &device,
        );
        return activation.forward(input).into_data().to_vec().unwrap();
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-6, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn test_relu6_clips() {
        let out = apply(&ActivationKind::Relu6.init(), &[-2.0, 0.5, 6.0, 9.0]);
        assert_close(&out, &[0.0, 0.5, 6.0, 6.0]);
    }

    #[test]
    fn test_hard_sigmoid_bounds() {
        let out = apply(
            &ActivationKind::HardSigmoid.init(),
            &[-100.0, -3.0, 0.0, 3.0, 100.0],
        );
        assert_close(&out, &[0.0, 0.0, 0.5, 1.0, 1.0]);

        let sweep: Vec<f32> = (-80..80).map(|i| i as f32 * 0.1).collect();
        for v in apply(&ActivationKind::HardSigmoid.init(), &sweep) {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_hardswish() {
        let out = apply(
            &ActivationKind::Hardswish.init(),
            &[-4.0, -3.0, 0.0, 1.0, 3.0, 7.5],
        );
        assert_close(&out, &[0.0, 0.0, 0.0, 4.0 / 6.0, 3.0, 7.5]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 2>::from_floats(
            [[1.0, 2.0, 3.0], [-1.0, 0.0, 10.0]],
            &device,
        );
        let out = ActivationKind::Softmax.init().forward(input).sum_dim(1);
        let sums: Vec<f32> = out.into_data().to_vec().unwrap();
        assert_close(&sums, &[1.0, 1.0]);
    }

    #[test]
    fn test_parse_activation_names() {
        assert_eq!("relu".parse::<ActivationKind>(), Ok(ActivationKind::Relu));
        assert_eq!("relu6".parse::<ActivationKind>(), Ok(ActivationKind::Relu6));
        assert_eq!("hswish".parse::<ActivationKind>(), Ok(ActivationKind::Hardswish));
        assert_eq!("hsigmoid".parse::<ActivationKind>(), Ok(ActivationKind::HardSigmoid));
        assert_eq!("softmax".parse::<ActivationKind>(), Ok(ActivationKind::Softmax));
        assert_eq!("none".parse::<ActivationKind>(), Ok(ActivationKind::None));
        assert_eq!(
            "gelu".parse::<ActivationKind>(),
            Err(ConfigurationError::UnknownActivation("gelu".to_string()))
        );
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for kind in [
            ActivationKind::None,
            ActivationKind::Relu,
            ActivationKind::Relu6,
            ActivationKind::Hardswish,
            ActivationKind::HardSigmoid,
            ActivationKind::Softmax,
        ] {
            assert_eq!(kind.to_string().parse::<ActivationKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_config_files_use_activation_names() {
        let json = serde_json::to_string(&ActivationKind::Hardswish).unwrap();
        assert_eq!(json, "\"hswish\"");

        let kind: ActivationKind = serde_json::from_str("\"hswish\"").unwrap();
        assert_eq!(kind, ActivationKind::Hardswish);
        let kind: ActivationKind = serde_json::from_str("\"Hardswish\"").unwrap();
        assert_eq!(kind, ActivationKind::Hardswish);

        let err = serde_json::from_str::<ActivationKind>("\"gelu\"").unwrap_err();
        assert!(
            err.to_string().contains("unknown activation `gelu`"),
            "{err}"
        );
    }
}
