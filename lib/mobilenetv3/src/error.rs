use thiserror::Error;

/// Problems detected while turning a configuration into a network.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("unknown activation `{0}`")]
    UnknownActivation(String),

    #[error("unknown normalization `{0}`")]
    UnknownNormalization(String),

    #[error(
        "input shape must be (height, width, channels), got {0} dimension(s)"
    )]
    InputShape(usize),

    #[error("invalid value for `{name}`: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

impl ConfigurationError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        return Self::InvalidValue {
            name,
            reason: reason.into(),
        };
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The caller handed over a tensor whose channel count differs from the
    /// one the network (or block) was built for.
    #[error("expected {expected} input channels, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("the training set is empty")]
    EmptyDataset,

    #[error("item {index} holds {actual} pixel values, expected {expected}")]
    ItemSize {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("item {index} is labelled {label}, but there are only {num_classes} classes")]
    ItemLabel {
        index: usize,
        label: usize,
        num_classes: usize,
    },

    #[error("could not read configuration: {0}")]
    ConfigFile(String),

    #[error("could not save or load model weights: {0}")]
    Recorder(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ConfigurationError> for TrainingError {
    fn from(err: ConfigurationError) -> Self {
        return Self::Model(ModelError::Configuration(err));
    }
}
