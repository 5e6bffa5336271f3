use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor},
};

/// Pass-through used wherever a layer slot is configured as "none".
#[derive(Module, Clone, Debug, Default)]
pub struct Identity {}

impl Identity {
    pub fn new() -> Self {
        return Self {};
    }

    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        return input;
    }
}
