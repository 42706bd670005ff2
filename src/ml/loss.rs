// ============================================================
// Layer 5 — Self-supervised Criteria
// ============================================================
// SimCLR — NT-Xent (normalised temperature-scaled cross entropy)
//   z = [norm(z1); norm(z2)]                       [2N, D]
//   s = z zᵀ / τ, diagonal masked out              [2N, 2N]
//   positive of row i is row (i + N) mod 2N
//   L = mean_i -log softmax(s_i)[positive(i)]
//
// SimSiam — symmetric negative cosine with stop-gradient
//   D(p, z) = -mean cos(p, stopgrad(z))
//   L = D(p1, z2) / 2 + D(p2, z1) / 2
//
// Reference: Chen et al. (2020) SimCLR, eq. 1
//            Chen & He (2021) SimSiam, eq. 1-2

use anyhow::{anyhow, Result};
use burn::{prelude::*, tensor::activation::log_softmax};

use crate::domain::run::Arch;
use crate::ml::model::ModelOutput;

const EPS: f64 = 1e-12;
const MASK_VALUE: f32 = -1.0e9;

/// Scale every row of `x` to unit L2 norm
pub fn l2_normalize<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = x.clone().powf_scalar(2.0).sum_dim(1).sqrt().clamp_min(EPS);
    x / norm
}

/// NT-Xent over two batches of projections, each [N, D]
pub fn nt_xent<B: Backend>(z1: Tensor<B, 2>, z2: Tensor<B, 2>, temperature: f64) -> Tensor<B, 1> {
    let device = z1.device();
    let n      = z1.dims()[0];
    let total  = 2 * n;

    let z   = Tensor::cat(vec![l2_normalize(z1), l2_normalize(z2)], 0);
    let sim = z.clone().matmul(z.transpose()).div_scalar(temperature);

    let mut self_mask = vec![0.0f32; total * total];
    let mut positives = vec![0.0f32; total * total];
    for i in 0..total {
        self_mask[i * total + i] = MASK_VALUE;
        positives[i * total + (i + n) % total] = 1.0;
    }
    let self_mask = Tensor::<B, 1>::from_floats(self_mask.as_slice(), &device).reshape([total, total]);
    let positives = Tensor::<B, 1>::from_floats(positives.as_slice(), &device).reshape([total, total]);

    let log_prob = log_softmax(sim + self_mask, 1);
    (log_prob * positives).sum().neg().div_scalar(total as f64)
}

/// D(p, z) = -mean cos(p, stopgrad(z))
pub fn negative_cosine<B: Backend>(p: Tensor<B, 2>, z: Tensor<B, 2>) -> Tensor<B, 1> {
    let cos = (l2_normalize(p) * l2_normalize(z.detach())).sum_dim(1);
    cos.mean().neg()
}

/// Symmetric SimSiam loss
pub fn simsiam<B: Backend>(
    p1: Tensor<B, 2>,
    z1: Tensor<B, 2>,
    p2: Tensor<B, 2>,
    z2: Tensor<B, 2>,
) -> Tensor<B, 1> {
    negative_cosine(p1, z2).div_scalar(2.0) + negative_cosine(p2, z1).div_scalar(2.0)
}

// ─── Criterion ────────────────────────────────────────────────────────────────
/// The loss chosen by the run's arch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Criterion {
    NtXent { temperature: f64 },
    SimSiam,
}

impl Criterion {
    pub fn for_arch(arch: Arch, temperature: f64) -> Self {
        match arch {
            Arch::SimClr  => Criterion::NtXent { temperature },
            Arch::SimSiam => Criterion::SimSiam,
        }
    }

    /// Loss of the two views' model outputs
    pub fn loss<B: Backend>(&self, view1: ModelOutput<B>, view2: ModelOutput<B>) -> Result<Tensor<B, 1>> {
        match *self {
            Criterion::NtXent { temperature } => {
                Ok(nt_xent(view1.projection, view2.projection, temperature))
            }
            Criterion::SimSiam => {
                let missing = || anyhow!("SimSiam loss needs a model with a predictor head");
                let p1 = view1.prediction.ok_or_else(missing)?;
                let p2 = view2.prediction.ok_or_else(missing)?;
                Ok(simsiam(p1, view1.projection, p2, view2.projection))
            }
        }
    }
}
