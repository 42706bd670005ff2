// ============================================================
// Layer 5 — Contrastive Model
// ============================================================
// Backbone + heads shared by SimCLR and SimSiam:
//
//   image [N, 3, H, W]
//     │  conv1 3→w    stride 1 ─ BN ─ ReLU
//     │  conv2 w→2w   stride 2 ─ BN ─ ReLU
//     │  conv3 2w→4w  stride 2 ─ BN ─ ReLU
//     │  global average pool
//     ▼
//   embedding  [N, 4w]          ← used by the KNN monitor
//     │  projector: Linear ─ ReLU ─ Linear
//     ▼
//   projection [N, proj_dim]    ← "z", fed to NT-Xent
//     │  predictor (SimSiam only): Linear ─ ReLU ─ Linear
//     ▼
//   prediction [N, proj_dim]    ← "p"
//
// Reference: Burn Book §3 (Building Blocks)
//            Chen et al. (2020) SimCLR, Chen & He (2021) SimSiam

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::relu,
};

use crate::data::dataset::CHANNELS;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
#[derive(Config, Debug)]
pub struct ContrastiveModelConfig {
    /// Channels of conv1; the embedding has 4 * width features
    pub width:         usize,
    pub proj_dim:      usize,
    pub pred_hidden:   usize,
    pub use_predictor: bool,
}

impl ContrastiveModelConfig {
    pub fn embedding_dim(&self) -> usize {
        self.width * 4
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ContrastiveModel<B> {
        let w   = self.width;
        let emb = self.embedding_dim();

        let backbone = Backbone {
            conv1: conv3x3([CHANNELS, w], 1, device),
            bn1:   BatchNormConfig::new(w).init(device),
            conv2: conv3x3([w, 2 * w], 2, device),
            bn2:   BatchNormConfig::new(2 * w).init(device),
            conv3: conv3x3([2 * w, emb], 2, device),
            bn3:   BatchNormConfig::new(emb).init(device),
            pool:  AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        };

        let projector = MlpHead {
            linear1: LinearConfig::new(emb, emb).init(device),
            linear2: LinearConfig::new(emb, self.proj_dim).init(device),
        };

        let predictor = self.use_predictor.then(|| MlpHead {
            linear1: LinearConfig::new(self.proj_dim, self.pred_hidden).init(device),
            linear2: LinearConfig::new(self.pred_hidden, self.proj_dim).init(device),
        });

        ContrastiveModel { backbone, projector, predictor }
    }
}

fn conv3x3<B: Backend>(channels: [usize; 2], stride: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new(channels, [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}

// ─── Backbone ─────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1:   BatchNorm<B, 2>,
    pub conv2: Conv2d<B>,
    pub bn2:   BatchNorm<B, 2>,
    pub conv3: Conv2d<B>,
    pub bn3:   BatchNorm<B, 2>,
    pub pool:  AdaptiveAvgPool2d,
}

impl<B: Backend> Backbone<B> {
    /// [N, 3, H, W] → [N, 4w]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.bn1.forward(self.conv1.forward(images)));
        let x = relu(self.bn2.forward(self.conv2.forward(x)));
        let x = relu(self.bn3.forward(self.conv3.forward(x)));
        self.pool.forward(x).flatten(1, 3)
    }
}

// ─── Two-layer MLP head (projector / predictor) ───────────────────────────────
#[derive(Module, Debug)]
pub struct MlpHead<B: Backend> {
    pub linear1: Linear<B>,
    pub linear2: Linear<B>,
}

impl<B: Backend> MlpHead<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.linear2.forward(relu(self.linear1.forward(x)))
    }
}

// ─── ContrastiveModel ─────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct ContrastiveModel<B: Backend> {
    pub backbone:  Backbone<B>,
    pub projector: MlpHead<B>,
    pub predictor: Option<MlpHead<B>>,
}

/// The (embedding, projection, prediction) triple of one view.
#[derive(Debug, Clone)]
pub struct ModelOutput<B: Backend> {
    pub embedding:  Tensor<B, 2>,
    pub projection: Tensor<B, 2>,
    /// Present only when the model has a predictor head
    pub prediction: Option<Tensor<B, 2>>,
}

impl<B: Backend> ContrastiveModel<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> ModelOutput<B> {
        let embedding  = self.backbone.forward(images);
        let projection = self.projector.forward(embedding.clone());
        let prediction = self.predictor.as_ref().map(|p| p.forward(projection.clone()));
        ModelOutput { embedding, projection, prediction }
    }

    /// Backbone features only, for the KNN monitor
    pub fn embed(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.backbone.forward(images)
    }

    /// Sum of conv1's weights, logged to spot identical initialisations
    pub fn conv1_weight_sum(&self) -> f64 {
        self.backbone.conv1.weight.val().sum().into_scalar().elem::<f64>()
    }

    /// Parameter count of each trainable part, in model order
    pub fn trainable_parts(&self) -> Vec<(&'static str, usize)> {
        let mut parts = vec![
            ("backbone", self.backbone.num_params()),
            ("projector", self.projector.num_params()),
        ];
        if let Some(predictor) = &self.predictor {
            parts.push(("predictor", predictor.num_params()));
        }
        parts
    }

    /// "name (Type): [shape]" for every module that owns a weight
    pub fn module_summary(&self) -> Vec<String> {
        let bb = &self.backbone;
        let mut lines = vec![
            describe("backbone.conv1", "Conv2d", &bb.conv1.weight.dims()),
            describe("backbone.bn1", "BatchNorm2d", &bb.bn1.gamma.dims()),
            describe("backbone.conv2", "Conv2d", &bb.conv2.weight.dims()),
            describe("backbone.bn2", "BatchNorm2d", &bb.bn2.gamma.dims()),
            describe("backbone.conv3", "Conv2d", &bb.conv3.weight.dims()),
            describe("backbone.bn3", "BatchNorm2d", &bb.bn3.gamma.dims()),
        ];
        lines.extend(head_summary("projector", &self.projector));
        if let Some(predictor) = &self.predictor {
            lines.extend(head_summary("predictor", predictor));
        }
        lines
    }
}

fn describe(name: &str, kind: &str, shape: &[usize]) -> String {
    format!("{name} ({kind}): {shape:?}")
}

fn head_summary<B: Backend>(prefix: &str, head: &MlpHead<B>) -> [String; 2] {
    [
        describe(&format!("{prefix}.linear1"), "Linear", &head.linear1.weight.dims()),
        describe(&format!("{prefix}.linear2"), "Linear", &head.linear2.weight.dims()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn config(use_predictor: bool) -> ContrastiveModelConfig {
        ContrastiveModelConfig::new(4, 8, 6, use_predictor)
    }

    #[test]
    fn forward_shapes_follow_the_config() {
        let device = Default::default();
        let model  = config(true).init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 8, 8], &device);

        let out = model.forward(images);
        assert_eq!(out.embedding.dims(), [2, 16]);
        assert_eq!(out.projection.dims(), [2, 8]);
        assert_eq!(out.prediction.map(|p| p.dims()), Some([2, 8]));
    }

    #[test]
    fn simclr_model_has_no_predictor() {
        let model = config(false).init::<TestBackend>(&Default::default());
        assert!(model.predictor.is_none());
        let names: Vec<&str> = model.trainable_parts().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["backbone", "projector"]);
    }

    #[test]
    fn parts_add_up_to_the_whole_model() {
        let model = config(true).init::<TestBackend>(&Default::default());
        let total: usize = model.trainable_parts().iter().map(|(_, n)| n).sum();
        assert_eq!(total, model.num_params());
    }

    #[test]
    fn summary_lists_conv1_first() {
        let model   = config(true).init::<TestBackend>(&Default::default());
        let summary = model.module_summary();
        assert_eq!(summary[0], "backbone.conv1 (Conv2d): [4, 3, 3, 3]");
        assert_eq!(summary.len(), 10);
        assert!(summary.last().unwrap().starts_with("predictor.linear2 (Linear)"));
    }
}
