use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{log_softmax, tanh},
    train::ClassificationOutput,
};
use serde::{Deserialize, Serialize};

use crate::{
    port::PortError,
    state_dict::{export_conv, export_linear, load_conv, load_linear, StateDict, StateDictModule},
};

const KERNEL: usize = 5;
const POOL_STRIDE: usize = 2;
const C1_CHANNELS: usize = 6;
const C3_CHANNELS: usize = 16;
const C5_CHANNELS: usize = 120;
const F6_FEATURES: usize = 84;

/// Input side length the dense head is built for.
pub const INPUT_SIZE: usize = 32;

/// Which classification head to train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Variant {
    /// Flatten followed by two dense layers.
    Dense,
    /// Two 1×1 convolutions followed by a global max pool.
    Fcn,
}

/// A network that maps a batch of digit images to class log-probabilities.
pub trait DigitClassifier<B: Backend> {
    /// # Shapes
    ///
    /// - images: `[batch_size, channels, height, width]`
    /// - output: `[batch_size, num_classes]`
    fn classify(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Classify and compute the cross-entropy loss against `targets`.
    fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.classify(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

/// Spatial side length produced by [`FeatureExtractor`] for a square input of side `input`.
///
/// Returns `None` when the input is too small for one of the 5×5 convolutions.
pub fn feature_map_size(input: usize) -> Option<usize> {
    let conv = |size: usize| size.checked_sub(KERNEL - 1).filter(|size| *size > 0);
    let pool = |size: usize| (size - 1) / POOL_STRIDE + 1;

    let size = pool(conv(input)?);
    let size = pool(conv(size)?);
    conv(size)
}

#[derive(Config, Debug)]
pub struct FeatureExtractorConfig {
    #[config(default = 1)]
    pub channels: usize,
}

/// Convolutional trunk shared by both heads: `c1 → s2 → c3 → s4 → c5`, tanh after each conv.
#[derive(Module, Debug)]
pub struct FeatureExtractor<B: Backend> {
    c1: Conv2d<B>,
    s2: MaxPool2d,
    c3: Conv2d<B>,
    s4: MaxPool2d,
    c5: Conv2d<B>,
}

impl FeatureExtractorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FeatureExtractor<B> {
        let conv = |channels: [usize; 2]| {
            Conv2dConfig::new(channels, [KERNEL, KERNEL])
                .with_stride([1, 1])
                .init(device)
        };
        // A 1×1 window with stride 2 keeps every other row and column.
        let pool = || {
            MaxPool2dConfig::new([1, 1])
                .with_strides([POOL_STRIDE, POOL_STRIDE])
                .init()
        };

        FeatureExtractor {
            c1: conv([self.channels, C1_CHANNELS]),
            s2: pool(),
            c3: conv([C1_CHANNELS, C3_CHANNELS]),
            s4: pool(),
            c5: conv([C3_CHANNELS, C5_CHANNELS]),
        }
    }
}

impl<B: Backend> FeatureExtractor<B> {
    /// # Shapes
    ///
    /// - images: `[batch_size, channels, height, width]`
    /// - output: `[batch_size, 120, h, w]` with `h = feature_map_size(height)`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = tanh(self.c1.forward(images));
        let x = self.s2.forward(x);
        let x = tanh(self.c3.forward(x));
        let x = self.s4.forward(x);
        tanh(self.c5.forward(x))
    }

    fn export(&self, state: &mut StateDict) {
        export_conv("convnet.c1", &self.c1, state);
        export_conv("convnet.c3", &self.c3, state);
        export_conv("convnet.c5", &self.c5, state);
    }

    fn load(self, state: &StateDict) -> Result<Self, PortError> {
        Ok(Self {
            c1: load_conv("convnet.c1", self.c1, state)?,
            s2: self.s2,
            c3: load_conv("convnet.c3", self.c3, state)?,
            s4: self.s4,
            c5: load_conv("convnet.c5", self.c5, state)?,
        })
    }
}

#[derive(Config, Debug)]
pub struct LeNet5Config {
    #[config(default = 10)]
    pub num_classes: usize,
    #[config(default = 1)]
    pub channels: usize,
}

/// LeNet-5 with a dense classification head.
///
/// Only accepts `[batch_size, channels, 32, 32]` inputs: the flattened trunk output must have
/// exactly 120 features.
#[derive(Module, Debug)]
pub struct LeNet5<B: Backend> {
    convnet: FeatureExtractor<B>,
    fc: DenseHead<B>,
}

#[derive(Module, Debug)]
pub struct DenseHead<B: Backend> {
    f6: Linear<B>,
    f7: Linear<B>,
}

impl LeNet5Config {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LeNet5<B> {
        LeNet5 {
            convnet: FeatureExtractorConfig::new()
                .with_channels(self.channels)
                .init(device),
            fc: DenseHead {
                f6: LinearConfig::new(C5_CHANNELS, F6_FEATURES).init(device),
                f7: LinearConfig::new(F6_FEATURES, self.num_classes).init(device),
            },
        }
    }
}

impl<B: Backend> LeNet5<B> {
    /// # Shapes
    ///
    /// - images: `[batch_size, channels, 32, 32]`
    /// - output: `[batch_size, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.convnet.forward(images);
        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = tanh(self.fc.f6.forward(x));
        let x = self.fc.f7.forward(x);

        log_softmax(x, 1)
    }
}

impl<B: Backend> DigitClassifier<B> for LeNet5<B> {
    fn classify(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}

impl<B: Backend> StateDictModule<B> for LeNet5<B> {
    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        self.convnet.export(&mut state);
        export_linear("fc.f6", &self.fc.f6, &mut state);
        export_linear("fc.f7", &self.fc.f7, &mut state);
        state
    }

    fn load_state_dict(self, state: &StateDict) -> Result<Self, PortError> {
        Ok(Self {
            convnet: self.convnet.load(state)?,
            fc: DenseHead {
                f6: load_linear("fc.f6", self.fc.f6, state)?,
                f7: load_linear("fc.f7", self.fc.f7, state)?,
            },
        })
    }
}

#[derive(Config, Debug)]
pub struct LeNet5FcnConfig {
    #[config(default = 10)]
    pub num_classes: usize,
    #[config(default = 1)]
    pub channels: usize,
}

/// LeNet-5 whose classification head is made of 1×1 convolutions.
///
/// Accepts any square input for which [`feature_map_size`] is defined. The head produces a class
/// map over the spatial positions left by the trunk, and the final max pool spans that whole map,
/// whatever its size.
#[derive(Module, Debug)]
pub struct LeNet5Fcn<B: Backend> {
    convnet: FeatureExtractor<B>,
    fc: ConvHead<B>,
}

#[derive(Module, Debug)]
pub struct ConvHead<B: Backend> {
    f6: Conv2d<B>,
    fc7: Conv2d<B>,
}

impl LeNet5FcnConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LeNet5Fcn<B> {
        LeNet5Fcn {
            convnet: FeatureExtractorConfig::new()
                .with_channels(self.channels)
                .init(device),
            fc: ConvHead {
                f6: Conv2dConfig::new([C5_CHANNELS, F6_FEATURES], [1, 1]).init(device),
                fc7: Conv2dConfig::new([F6_FEATURES, self.num_classes], [1, 1]).init(device),
            },
        }
    }
}

impl<B: Backend> LeNet5Fcn<B> {
    /// Per-position class log-probabilities.
    ///
    /// # Shapes
    ///
    /// - images: `[batch_size, channels, height, width]`
    /// - output: `[batch_size, num_classes, h, w]` with `h = feature_map_size(height)`
    pub fn forward_map(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.convnet.forward(images);
        let x = tanh(self.fc.f6.forward(x));
        let x = self.fc.fc7.forward(x);

        log_softmax(x, 1)
    }

    /// # Shapes
    ///
    /// - images: `[batch_size, channels, height, width]`
    /// - output: `[batch_size, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let map = self.forward_map(images);
        let [batch_size, num_classes, height, width] = map.dims();

        // Max pool with a [height, width] window, taken over the flattened positions.
        map.reshape([batch_size, num_classes, height * width])
            .max_dim(2)
            .reshape([batch_size, num_classes])
    }
}

impl<B: Backend> DigitClassifier<B> for LeNet5Fcn<B> {
    fn classify(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}

impl<B: Backend> StateDictModule<B> for LeNet5Fcn<B> {
    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        self.convnet.export(&mut state);
        export_conv("fc.f6", &self.fc.f6, &mut state);
        export_conv("fc.fc7", &self.fc.fc7, &mut state);
        state
    }

    fn load_state_dict(self, state: &StateDict) -> Result<Self, PortError> {
        Ok(Self {
            convnet: self.convnet.load(state)?,
            fc: ConvHead {
                f6: load_conv("fc.f6", self.fc.f6, state)?,
                fc7: load_conv("fc.fc7", self.fc.fc7, state)?,
            },
        })
    }
}
