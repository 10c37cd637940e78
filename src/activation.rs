use burn::tensor::{activation, backend::Backend, Tensor};

/// Activation applied to the final projection outside of training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FinalActivation {
    /// Element-wise sigmoid, for binary or multi-label targets.
    Sigmoid,
    /// Softmax across the channel axis, for mutually exclusive classes.
    Softmax,
}

impl FinalActivation {
    pub fn forward<B: Backend>(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        match self {
            Self::Sigmoid => activation::sigmoid(x),
            Self::Softmax => activation::softmax(x, 1),
        }
    }
}

/// Whether a forward pass feeds a loss (raw logits) or produces predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Mode {
    Train,
    Eval,
}

impl Mode {
    /// Training when the backend tracks gradients, evaluation otherwise.
    pub fn infer<B: Backend>() -> Self {
        if B::ad_enabled() {
            Self::Train
        } else {
            Self::Eval
        }
    }

    pub fn is_train(&self) -> bool {
        matches!(self, Self::Train)
    }
}
