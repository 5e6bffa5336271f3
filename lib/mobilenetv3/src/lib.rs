pub mod error;
pub mod model;
pub mod training;

pub use error::{ConfigurationError, ModelError, TrainingError};
pub use model::mobilenetv3::{
    build_network, MobileNetV3, MobileNetV3Config, NetworkPlan,
    MOBILENET_V3_LARGE,
};
