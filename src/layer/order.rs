use std::{fmt, str::FromStr};

use crate::error::ConfigurationError;

/// A primitive operation inside a [`SingleConv`](super::SingleConv).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LayerKind {
    Conv,
    Relu,
    GroupNorm,
    BatchNorm,
}

impl LayerKind {
    pub fn token(&self) -> char {
        match self {
            Self::Conv => 'c',
            Self::Relu => 'r',
            Self::GroupNorm => 'g',
            Self::BatchNorm => 'b',
        }
    }

    fn from_token(token: char) -> Option<Self> {
        match token {
            'c' => Some(Self::Conv),
            'r' => Some(Self::Relu),
            'g' => Some(Self::GroupNorm),
            'b' => Some(Self::BatchNorm),
            _ => None,
        }
    }
}

/// Validated order of the operations in a convolutional sub-layer, e.g. `crg`
/// for Conv3d + ReLU + GroupNorm or `bcr` for a pre-activation BatchNorm.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LayerOrder {
    layers: Vec<LayerKind>,
}

impl LayerOrder {
    pub fn layers(&self) -> &[LayerKind] {
        &self.layers
    }

    /// Position of the convolution within the order.
    pub fn conv_index(&self) -> usize {
        self.layers
            .iter()
            .position(|kind| *kind == LayerKind::Conv)
            .unwrap_or_default()
    }

    /// True when a normalization placed at `index` sees the convolution's input.
    pub fn is_before_conv(&self, index: usize) -> bool {
        index < self.conv_index()
    }

    /// Number of channels the normalization at `index` normalizes.
    pub fn norm_channels(&self, index: usize, in_channels: usize, out_channels: usize) -> usize {
        if self.is_before_conv(index) {
            in_channels
        } else {
            out_channels
        }
    }

    pub fn group_norm(&self) -> bool {
        self.layers.contains(&LayerKind::GroupNorm)
    }
}

impl Default for LayerOrder {
    fn default() -> Self {
        Self {
            layers: vec![LayerKind::Conv, LayerKind::Relu, LayerKind::GroupNorm],
        }
    }
}

impl FromStr for LayerOrder {
    type Err = ConfigurationError;

    fn from_str(order: &str) -> Result<Self, Self::Err> {
        let mut layers = Vec::with_capacity(order.len());
        for token in order.chars() {
            let kind = LayerKind::from_token(token).ok_or_else(|| {
                ConfigurationError::UnsupportedToken {
                    token,
                    order: order.to_string(),
                }
            })?;
            if layers.contains(&kind) {
                return Err(ConfigurationError::DuplicateToken {
                    token,
                    order: order.to_string(),
                });
            }
            layers.push(kind);
        }

        let Some(conv) = layers.iter().position(|kind| *kind == LayerKind::Conv) else {
            return Err(ConfigurationError::MissingConvolution {
                order: order.to_string(),
            });
        };
        if !layers.contains(&LayerKind::Relu) {
            return Err(ConfigurationError::MissingActivation {
                order: order.to_string(),
            });
        }
        if layers.first() == Some(&LayerKind::Relu) {
            return Err(ConfigurationError::LeadingActivation {
                order: order.to_string(),
            });
        }
        let group_norm = layers.iter().position(|kind| *kind == LayerKind::GroupNorm);
        if group_norm.is_some_and(|index| index < conv) {
            return Err(ConfigurationError::GroupNormBeforeConvolution {
                order: order.to_string(),
            });
        }

        Ok(Self { layers })
    }
}

impl fmt::Display for LayerOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for kind in &self.layers {
            write!(f, "{}", kind.token())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_orders() {
        for order in ["cr", "crg", "cgr", "cbr", "bcr", "crb"] {
            let parsed: LayerOrder = order.parse().unwrap();
            assert_eq!(parsed.to_string(), order);
        }
    }

    #[test]
    fn default_is_conv_relu_groupnorm() {
        assert_eq!(LayerOrder::default(), "crg".parse().unwrap());
    }

    #[test]
    fn rejects_missing_conv() {
        assert_eq!(
            "rg".parse::<LayerOrder>(),
            Err(ConfigurationError::MissingConvolution { order: "rg".into() })
        );
        assert!(matches!(
            "".parse::<LayerOrder>(),
            Err(ConfigurationError::MissingConvolution { .. })
        ));
    }

    #[test]
    fn rejects_missing_activation() {
        assert_eq!(
            "cg".parse::<LayerOrder>(),
            Err(ConfigurationError::MissingActivation { order: "cg".into() })
        );
    }

    #[test]
    fn rejects_leading_activation() {
        for order in ["rc", "rcg", "rbc"] {
            assert!(matches!(
                order.parse::<LayerOrder>(),
                Err(ConfigurationError::LeadingActivation { .. })
            ));
        }
    }

    #[test]
    fn rejects_unsupported_token() {
        assert_eq!(
            "crx".parse::<LayerOrder>(),
            Err(ConfigurationError::UnsupportedToken {
                token: 'x',
                order: "crx".into()
            })
        );
    }

    #[test]
    fn rejects_group_norm_before_conv() {
        assert!(matches!(
            "gcr".parse::<LayerOrder>(),
            Err(ConfigurationError::GroupNormBeforeConvolution { .. })
        ));
    }

    #[test]
    fn rejects_duplicates() {
        assert!(matches!(
            "crcr".parse::<LayerOrder>(),
            Err(ConfigurationError::DuplicateToken { token: 'c', .. })
        ));
    }

    #[test]
    fn batch_norm_channels_follow_position() {
        let pre: LayerOrder = "bcr".parse().unwrap();
        assert_eq!(pre.norm_channels(0, 4, 8), 4);

        let post: LayerOrder = "cbr".parse().unwrap();
        assert_eq!(post.norm_channels(1, 4, 8), 8);
    }
}
