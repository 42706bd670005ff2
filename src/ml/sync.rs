// ============================================================
// Layer 5 — Replica Synchronisation
// ============================================================
// Keeps the model replicas of a multi-rank run identical:
//
//   broadcast_module   rank 0's weights and BatchNorm running
//                      stats replace every other rank's; done
//                      once, after init / resume
//   average_gradients  every group's gradients are flattened in
//                      model order, all-reduced to their mean and
//                      written back before the optimizer step
//
// Both walk the module with a visitor, so every rank lays out
// its buffer the same way as long as it built the same model.
// Running stats carry no gradient; after the first broadcast
// each rank keeps its own.
//
// Reference: Goyal et al. (2017) Accurate, Large Minibatch SGD

use anyhow::{anyhow, Result};
use burn::{
    module::{Module, ModuleMapper, ModuleVisitor, ParamId},
    optim::GradientsParams,
    prelude::*,
    tensor::{backend::AutodiffBackend, TensorData},
};

use crate::infra::distributed::GroupMember;

/// Rank whose weights every replica starts from
pub const ROOT_RANK: usize = 0;

fn values_of<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, String> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| format!("{err:?}"))
}

fn tensor_from<B: Backend, const D: usize>(values: Vec<f32>, dims: [usize; D], device: &B::Device) -> Tensor<B, D> {
    let data = TensorData::new(values, dims).convert::<B::FloatElem>();
    Tensor::from_data(data, device)
}

// ─── Weights ──────────────────────────────────────────────────────────────────
/// Appends every float tensor of a module to one buffer
#[derive(Default)]
struct FlattenWeights {
    values: Vec<f32>,
    error:  Option<String>,
}

impl<B: Backend> ModuleVisitor<B> for FlattenWeights {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        match values_of(tensor.clone()) {
            Ok(values) => self.values.extend(values),
            Err(err)   => {
                self.error.get_or_insert(err);
            }
        }
    }
}

/// Replaces every float tensor of a module with the next slice of `values`
struct RestoreWeights<'a> {
    values: &'a [f32],
    offset: usize,
}

impl<B: Backend> ModuleMapper<B> for RestoreWeights<'_> {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let len    = tensor.shape().num_elements();
        let values = self.values[self.offset..self.offset + len].to_vec();
        self.offset += len;

        let fresh = tensor_from::<B, D>(values, tensor.dims(), &tensor.device());
        // Param::map does not carry the flag over
        if tensor.is_require_grad() {
            fresh.require_grad()
        } else {
            fresh
        }
    }
}

/// Overwrite `module` with its state on rank 0
pub fn broadcast_module<B: Backend, M: Module<B>>(member: &GroupMember, module: M) -> Result<M> {
    let mut flat = FlattenWeights::default();
    module.visit(&mut flat);
    if let Some(err) = flat.error {
        member.abort(&err);
        return Err(anyhow!("Reading weights on rank {}: {err}", member.rank()));
    }

    member.broadcast(&mut flat.values, ROOT_RANK)?;
    tracing::debug!("Rank {} synchronised {} weights from rank {}", member.rank(), flat.values.len(), ROOT_RANK);

    Ok(module.map(&mut RestoreWeights { values: &flat.values, offset: 0 }))
}

// ─── Gradients ────────────────────────────────────────────────────────────────
/// Appends the gradient of every parameter present in `grads`
struct FlattenGrads<'a> {
    grads:  &'a GradientsParams,
    values: &'a mut Vec<f32>,
    error:  Option<String>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for FlattenGrads<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) else {
            return;
        };
        match values_of(grad) {
            Ok(values) => self.values.extend(values),
            Err(err)   => {
                self.error.get_or_insert(err);
            }
        }
    }
}

/// Writes the averaged gradients back in the order `FlattenGrads` read them
struct RestoreGrads<'a> {
    grads:  &'a mut GradientsParams,
    values: &'a [f32],
    offset: usize,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for RestoreGrads<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) else {
            return;
        };
        let len    = grad.shape().num_elements();
        let values = self.values[self.offset..self.offset + len].to_vec();
        self.offset += len;

        let averaged = tensor_from::<B::InnerBackend, D>(values, grad.dims(), &grad.device());
        self.grads.register::<B::InnerBackend, D>(id, averaged);
    }
}

/// Replace every group's gradients with their mean over all ranks
pub fn average_gradients<B, M>(member: &GroupMember, model: &M, groups: &mut [GradientsParams]) -> Result<()>
where
    B: AutodiffBackend,
    M: Module<B>,
{
    let mut values = Vec::new();
    for grads in groups.iter() {
        let mut flat = FlattenGrads { grads, values: &mut values, error: None };
        model.visit(&mut flat);
        if let Some(err) = flat.error {
            member.abort(&err);
            return Err(anyhow!("Reading gradients on rank {}: {err}", member.rank()));
        }
    }

    member.all_reduce_mean(&mut values)?;

    let mut offset = 0;
    for grads in groups.iter_mut() {
        let mut restore = RestoreGrads { grads, values: &values, offset };
        model.visit(&mut restore);
        offset = restore.offset;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::distributed::WorkerGroup;
    use burn::{
        backend::{Autodiff, NdArray},
        nn::{Linear, LinearConfig},
    };
    use std::thread;

    type TestBackend = Autodiff<NdArray>;

    fn weight_sum(linear: &Linear<TestBackend>) -> f32 {
        linear.weight.val().sum().into_scalar()
    }

    #[test]
    fn broadcast_gives_every_rank_the_root_weights() {
        let group = WorkerGroup::new(2).unwrap();
        let sums: Vec<(f32, bool)> = thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|rank| {
                    let member = group.join(rank).unwrap();
                    scope.spawn(move || {
                        let device = Default::default();
                        let linear = LinearConfig::new(3, 2).init::<TestBackend>(&device);
                        let linear = broadcast_module(&member, linear).unwrap();
                        (weight_sum(&linear), linear.weight.val().is_require_grad())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(sums[0].0, sums[1].0);
        assert!(sums.iter().all(|(_, grad)| *grad));
    }

    #[test]
    fn gradients_become_the_mean_over_ranks() {
        let device = Default::default();
        let linear = LinearConfig::new(2, 1).with_bias(false).init::<TestBackend>(&device);

        let group = WorkerGroup::new(2).unwrap();
        let grads: Vec<Vec<f32>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|rank| {
                    let member = group.join(rank).unwrap();
                    let linear = linear.clone();
                    scope.spawn(move || {
                        // d(sum(x·W))/dW = x, so rank r's gradient is [r+1, r+1]
                        let input = Tensor::<TestBackend, 2>::full([1, 2], rank as f32 + 1.0, &Default::default());
                        let raw   = linear.forward(input).sum().backward();
                        let mut groups = vec![GradientsParams::from_grads(raw, &linear)];

                        average_gradients(&member, &linear, &mut groups).unwrap();

                        let grad = groups[0]
                            .get::<NdArray, 2>(linear.weight.id)
                            .unwrap();
                        grad.into_data().to_vec::<f32>().unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for grad in grads {
            assert_eq!(grad, vec![1.5, 1.5]);
        }
    }

    #[test]
    fn single_rank_gradients_are_untouched() {
        let device = Default::default();
        let linear = LinearConfig::new(2, 1).with_bias(false).init::<TestBackend>(&device);
        let member = WorkerGroup::new(1).unwrap().join(0).unwrap();

        let input = Tensor::<TestBackend, 2>::from_floats([[2.0, -1.0]], &device);
        let raw   = linear.forward(input).sum().backward();
        let mut groups = vec![GradientsParams::from_grads(raw, &linear)];
        average_gradients(&member, &linear, &mut groups).unwrap();

        let grad = groups[0].get::<NdArray, 2>(linear.weight.id).unwrap();
        assert_eq!(grad.into_data().to_vec::<f32>().unwrap(), vec![2.0, -1.0]);
    }
}
