//! DenseNet with a single-logit sigmoid head.
//!
//! Tensor names follow the Keras DenseNet121 layer names (`conv1/conv`
//! becomes `conv1.conv`), with the classifier stored under `predictions`.
//! Inputs are NCHW, `f32`, already scaled to [0, 1].

use candle_core::{Module, Result, Tensor};
use candle_nn::{
    BatchNorm, Conv2d, Conv2dConfig, Linear, VarBuilder, batch_norm, conv2d_no_bias, linear,
};

const BN_EPS: f64 = 1.001e-5;

#[derive(Debug, Clone)]
pub struct DenseNetConfig {
    pub block_sizes: Vec<usize>,
    pub growth_rate: usize,
    pub stem_features: usize,
    pub bottleneck_width: usize,
}

impl DenseNetConfig {
    pub fn densenet121() -> Self {
        Self {
            block_sizes: vec![6, 12, 24, 16],
            growth_rate: 32,
            stem_features: 64,
            bottleneck_width: 4,
        }
    }

    /// Channel count entering the classifier head.
    pub fn output_features(&self) -> usize {
        let mut channels = self.stem_features;
        for (stage, &layers) in self.block_sizes.iter().enumerate() {
            channels += layers * self.growth_rate;
            if stage + 1 < self.block_sizes.len() {
                channels /= 2;
            }
        }
        channels
    }
}

fn bn(channels: usize, vb: VarBuilder) -> Result<BatchNorm> {
    batch_norm(channels, BN_EPS, vb)
}

/// BN-ReLU-Conv1x1-BN-ReLU-Conv3x3, concatenated onto its input.
#[derive(Debug)]
struct ConvBlock {
    bn0: BatchNorm,
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
}

impl ConvBlock {
    fn load(
        in_channels: usize,
        config: &DenseNetConfig,
        vb: VarBuilder,
        name: &str,
    ) -> Result<Self> {
        let width = config.bottleneck_width * config.growth_rate;
        let same = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        Ok(Self {
            bn0: bn(in_channels, vb.pp(format!("{name}_0_bn")))?,
            conv1: conv2d_no_bias(
                in_channels,
                width,
                1,
                Default::default(),
                vb.pp(format!("{name}_1_conv")),
            )?,
            bn1: bn(width, vb.pp(format!("{name}_1_bn")))?,
            conv2: conv2d_no_bias(
                width,
                config.growth_rate,
                3,
                same,
                vb.pp(format!("{name}_2_conv")),
            )?,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let ys = xs
            .apply_t(&self.bn0, false)?
            .relu()?
            .apply(&self.conv1)?
            .apply_t(&self.bn1, false)?
            .relu()?
            .apply(&self.conv2)?;
        Tensor::cat(&[xs, &ys], 1)
    }
}

/// BN-ReLU-Conv1x1 halving the channels, then 2x2 average pooling.
#[derive(Debug)]
struct Transition {
    bn: BatchNorm,
    conv: Conv2d,
}

impl Transition {
    fn load(in_channels: usize, vb: VarBuilder, name: &str) -> Result<Self> {
        Ok(Self {
            bn: bn(in_channels, vb.pp(format!("{name}_bn")))?,
            conv: conv2d_no_bias(
                in_channels,
                in_channels / 2,
                1,
                Default::default(),
                vb.pp(format!("{name}_conv")),
            )?,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        xs.apply_t(&self.bn, false)?
            .relu()?
            .apply(&self.conv)?
            .avg_pool2d(2)
    }
}

#[derive(Debug)]
struct DenseStage {
    blocks: Vec<ConvBlock>,
    transition: Option<Transition>,
}

#[derive(Debug)]
pub struct DenseNet {
    stem_conv: Conv2d,
    stem_bn: BatchNorm,
    stages: Vec<DenseStage>,
    final_bn: BatchNorm,
    head: Linear,
}

impl DenseNet {
    pub fn load(vb: VarBuilder, config: &DenseNetConfig) -> Result<Self> {
        let stem = Conv2dConfig {
            padding: 3,
            stride: 2,
            ..Default::default()
        };
        let stem_conv =
            conv2d_no_bias(3, config.stem_features, 7, stem, vb.pp("conv1").pp("conv"))?;
        let stem_bn = bn(config.stem_features, vb.pp("conv1").pp("bn"))?;

        let mut channels = config.stem_features;
        let mut stages = Vec::with_capacity(config.block_sizes.len());
        for (index, &layers) in config.block_sizes.iter().enumerate() {
            // Keras numbers the dense stages from 2, after the stem.
            let stage = index + 2;
            let mut blocks = Vec::with_capacity(layers);
            for block in 1..=layers {
                let name = format!("conv{stage}_block{block}");
                blocks.push(ConvBlock::load(channels, config, vb.clone(), &name)?);
                channels += config.growth_rate;
            }
            let transition = if index + 1 < config.block_sizes.len() {
                let transition = Transition::load(channels, vb.clone(), &format!("pool{stage}"))?;
                channels /= 2;
                Some(transition)
            } else {
                None
            };
            stages.push(DenseStage { blocks, transition });
        }

        debug_assert_eq!(channels, config.output_features());
        let final_bn = bn(channels, vb.pp("bn"))?;
        let head = linear(channels, 1, vb.pp("predictions"))?;

        Ok(Self {
            stem_conv,
            stem_bn,
            stages,
            final_bn,
            head,
        })
    }
}

impl Module for DenseNet {
    /// Returns the sigmoid score per image, shape `(batch, 1)`.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs
            .apply(&self.stem_conv)?
            .apply_t(&self.stem_bn, false)?
            .relu()?
            .pad_with_zeros(2, 1, 1)?
            .pad_with_zeros(3, 1, 1)?
            .max_pool2d_with_stride(3, 2)?;

        for stage in &self.stages {
            for block in &stage.blocks {
                xs = block.forward(&xs)?;
            }
            if let Some(transition) = &stage.transition {
                xs = transition.forward(&xs)?;
            }
        }

        let pooled = xs.apply_t(&self.final_bn, false)?.relu()?.mean((2, 3))?;
        candle_nn::ops::sigmoid(&pooled.apply(&self.head)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use std::collections::HashMap;

    #[test]
    fn densenet121_ends_with_1024_features() {
        assert_eq!(DenseNetConfig::densenet121().output_features(), 1024);
    }

    #[test]
    fn zero_weights_score_one_half() -> Result<()> {
        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        let model = DenseNet::load(vb, &DenseNetConfig::densenet121())?;

        let input = Tensor::rand(0f32, 1f32, (2, 3, 32, 32), &device)?;
        let scores = model.forward(&input)?;
        assert_eq!(scores.dims(), &[2, 1]);
        for score in scores.flatten_all()?.to_vec1::<f32>()? {
            assert!((score - 0.5).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn missing_weights_fail_to_load() {
        let vb = VarBuilder::from_tensors(HashMap::new(), DType::F32, &Device::Cpu);
        assert!(DenseNet::load(vb, &DenseNetConfig::densenet121()).is_err());
    }

    fn zeros(tensors: &mut HashMap<String, Tensor>, name: &str, shape: &[usize]) {
        let tensor = Tensor::zeros(shape, DType::F32, &Device::Cpu).unwrap();
        tensors.insert(name.to_string(), tensor);
    }

    fn batch_norm_params(tensors: &mut HashMap<String, Tensor>, name: &str, channels: usize) {
        for param in ["weight", "bias", "running_mean", "running_var"] {
            zeros(tensors, &format!("{name}.{param}"), &[channels]);
        }
    }

    #[test]
    fn reads_keras_layer_names() -> Result<()> {
        let config = DenseNetConfig {
            block_sizes: vec![1, 1],
            growth_rate: 2,
            stem_features: 4,
            bottleneck_width: 2,
        };
        assert_eq!(config.output_features(), 5);

        let mut tensors = HashMap::new();
        zeros(&mut tensors, "conv1.conv.weight", &[4, 3, 7, 7]);
        batch_norm_params(&mut tensors, "conv1.bn", 4);
        batch_norm_params(&mut tensors, "conv2_block1_0_bn", 4);
        zeros(&mut tensors, "conv2_block1_1_conv.weight", &[4, 4, 1, 1]);
        batch_norm_params(&mut tensors, "conv2_block1_1_bn", 4);
        zeros(&mut tensors, "conv2_block1_2_conv.weight", &[2, 4, 3, 3]);
        batch_norm_params(&mut tensors, "pool2_bn", 6);
        zeros(&mut tensors, "pool2_conv.weight", &[3, 6, 1, 1]);
        batch_norm_params(&mut tensors, "conv3_block1_0_bn", 3);
        zeros(&mut tensors, "conv3_block1_1_conv.weight", &[4, 3, 1, 1]);
        batch_norm_params(&mut tensors, "conv3_block1_1_bn", 4);
        zeros(&mut tensors, "conv3_block1_2_conv.weight", &[2, 4, 3, 3]);
        batch_norm_params(&mut tensors, "bn", 5);
        zeros(&mut tensors, "predictions.weight", &[1, 5]);
        zeros(&mut tensors, "predictions.bias", &[1]);

        let device = Device::Cpu;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let model = DenseNet::load(vb, &config)?;
        let scores = model.forward(&Tensor::ones((1, 3, 16, 16), DType::F32, &device)?)?;
        assert_eq!(scores.dims(), &[1, 1]);
        Ok(())
    }
}
