mod activation;
mod conv_norm_activation;
mod identity;
mod inverted_residual;
mod last_stage;
mod squeeze_excitation;
mod util;

pub mod mobilenetv3;

pub use activation::{
    Activation, ActivationKind, HardSigmoid, Hardswish, Relu6, Softmax,
};
pub use conv_norm_activation::{
    ConvNormActivation, ConvNormActivationConfig, NormKind, Normalization,
};
pub use identity::Identity;
pub use inverted_residual::{
    BlockSpec, BottleneckActivationType, InvertedResidual,
    InvertedResidualConfig, ResolvedInvertedResidual, RoundedChannels,
};
pub use last_stage::{LastStage, LastStageConfig};
pub use squeeze_excitation::{SqueezeExcitation, SqueezeExcitationConfig};
pub use util::{adjust_channels, make_divisible};
