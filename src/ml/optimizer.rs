// ============================================================
// Layer 5 — Optimizer Factory and Parameter Groups
// ============================================================
// Builds the update rule named by `cfg.optimizer`:
//
//   sgd      momentum, weight decay, no dampening
//   adam     default betas, no weight decay
//   rmsprop  alpha 0.9, momentum 0.9, weight decay
//   adamw    decoupled weight decay
//
// and wraps it in a GroupedOptimizer. A step splits the
// gradients into one GradientsParams per ParamGroup and applies
// each with `lr * group.lr_scale`. Optimizer state is keyed by
// parameter id, so one inner optimizer serves every group.
//
// In a multi-rank run the optimizer also holds the rank's
// GroupMember and averages the gradients over all ranks right
// before they are applied.
//
// Burn's optimizer types differ per rule, so the caller passes
// an OptimizerVisitor that owns the model, receives the concrete
// optimizer and runs the rest of the job generically.
//
// Reference: Burn Book §5 (Optimizers)
//            Kingma & Ba (2015) Adam, Loshchilov & Hutter (2019) AdamW

use std::sync::Arc;

use anyhow::Result;
use burn::{
    optim::{
        decay::WeightDecayConfig, momentum::MomentumConfig, AdamConfig, AdamWConfig,
        GradientsParams, Optimizer, RmsPropConfig, SgdConfig,
    },
    tensor::backend::AutodiffBackend,
};

use crate::application::pretrain_use_case::PretrainConfig;
use crate::domain::run::{param_groups, OptimizerKind, ParamGroup, ParamTarget};
use crate::infra::distributed::GroupMember;
use crate::ml::{model::ContrastiveModel, sync::average_gradients};

// ─── GroupedOptimizer ─────────────────────────────────────────────────────────
pub struct GroupedOptimizer<O> {
    inner:  O,
    groups: Vec<ParamGroup>,
    /// Base learning rate, written by the lr policy each epoch
    lr:     f64,
    /// Set in multi-rank runs; gradients are averaged through it
    member: Option<Arc<GroupMember>>,
}

impl<O> GroupedOptimizer<O> {
    pub fn new(inner: O, groups: Vec<ParamGroup>, lr: f64) -> Self {
        Self { inner, groups, lr, member: None }
    }

    /// Average every step's gradients over `member`'s group
    pub fn sync_with(&mut self, member: Arc<GroupMember>) {
        self.member = Some(member);
    }

    /// Base lr (the lr of the first group when it is unscaled)
    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    pub fn groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    /// Effective lr of every group
    pub fn group_lrs(&self) -> Vec<f64> {
        self.groups.iter().map(|g| self.lr * g.lr_scale).collect()
    }

    /// Move the gradients of each group out of `grads`
    pub fn split<B: AutodiffBackend>(
        &self,
        model:     &ContrastiveModel<B>,
        mut grads: B::Gradients,
    ) -> Vec<GradientsParams> {
        self.groups
            .iter()
            .map(|group| match group.target {
                ParamTarget::Whole     => GradientsParams::from_module(&mut grads, model),
                ParamTarget::Backbone  => GradientsParams::from_module(&mut grads, &model.backbone),
                ParamTarget::Projector => GradientsParams::from_module(&mut grads, &model.projector),
                ParamTarget::Predictor => match &model.predictor {
                    Some(predictor) => GradientsParams::from_module(&mut grads, predictor),
                    None            => GradientsParams::new(),
                },
            })
            .collect()
    }

    /// Apply per-group gradients (as returned by `split`) in group order
    pub fn apply<B>(
        &mut self,
        mut model: ContrastiveModel<B>,
        mut grads: Vec<GradientsParams>,
    ) -> Result<ContrastiveModel<B>>
    where
        B: AutodiffBackend,
        O: Optimizer<ContrastiveModel<B>, B>,
    {
        if let Some(member) = &self.member {
            average_gradients(member, &model, &mut grads)?;
        }
        for (group, group_grads) in self.groups.iter().zip(grads) {
            model = self.inner.step(self.lr * group.lr_scale, model, group_grads);
        }
        Ok(model)
    }

    /// `split` + `apply` for one backward pass
    pub fn step<B>(&mut self, model: ContrastiveModel<B>, grads: B::Gradients) -> Result<ContrastiveModel<B>>
    where
        B: AutodiffBackend,
        O: Optimizer<ContrastiveModel<B>, B>,
    {
        let grads = self.split(&model, grads);
        self.apply(model, grads)
    }

    /// Optimizer state for a checkpoint. Call as `to_record::<B>()`.
    pub fn to_record<B>(&self) -> <O as Optimizer<ContrastiveModel<B>, B>>::Record
    where
        B: AutodiffBackend,
        O: Optimizer<ContrastiveModel<B>, B>,
    {
        self.inner.to_record()
    }

    pub fn load_record<B>(self, record: <O as Optimizer<ContrastiveModel<B>, B>>::Record) -> Self
    where
        B: AutodiffBackend,
        O: Optimizer<ContrastiveModel<B>, B>,
    {
        Self { inner: self.inner.load_record(record), ..self }
    }
}

// ─── Factory ──────────────────────────────────────────────────────────────────
/// Owns the model and receives the concrete optimizer built for it.
pub trait OptimizerVisitor<B: AutodiffBackend> {
    type Output;

    /// Model the optimizer will train
    fn model(&self) -> &ContrastiveModel<B>;

    fn visit<O>(self, optimizer: GroupedOptimizer<O>) -> Self::Output
    where
        O: Optimizer<ContrastiveModel<B>, B>;
}

/// Log what `visitor`'s model will train, build the optimizer for `cfg`
/// and hand it to `visitor`
pub fn build_optimizer<B, V>(cfg: &PretrainConfig, visitor: V) -> V::Output
where
    B: AutodiffBackend,
    V: OptimizerVisitor<B>,
{
    let model = visitor.model();
    for (name, count) in model.trainable_parts() {
        tracing::info!("<DEBUG> gradient to {} ({} parameters)", name, count);
    }

    let groups = param_groups(cfg.fine_tune, model.predictor.is_some(), cfg.head_lr_scale);
    tracing::info!(
        "=> Using {} optimizer, lr {} over {} param group(s)",
        cfg.optimizer,
        cfg.lr,
        groups.len()
    );

    let weight_decay = WeightDecayConfig::new(cfg.weight_decay as f32);

    match cfg.optimizer {
        OptimizerKind::Sgd => {
            let momentum = MomentumConfig::new()
                .with_momentum(cfg.momentum)
                .with_dampening(0.0);
            let inner = SgdConfig::new()
                .with_momentum(Some(momentum))
                .with_weight_decay(Some(weight_decay))
                .init::<B, ContrastiveModel<B>>();
            visitor.visit(GroupedOptimizer::new(inner, groups, cfg.lr))
        }
        OptimizerKind::Adam => {
            let inner = AdamConfig::new().init::<B, ContrastiveModel<B>>();
            visitor.visit(GroupedOptimizer::new(inner, groups, cfg.lr))
        }
        OptimizerKind::RmsProp => {
            let inner = RmsPropConfig::new()
                .with_alpha(0.9)
                .with_momentum(0.9)
                .with_weight_decay(Some(weight_decay))
                .init::<B, ContrastiveModel<B>>();
            visitor.visit(GroupedOptimizer::new(inner, groups, cfg.lr))
        }
        OptimizerKind::AdamW => {
            let inner = AdamWConfig::new()
                .with_weight_decay(cfg.weight_decay as f32)
                .init::<B, ContrastiveModel<B>>();
            visitor.visit(GroupedOptimizer::new(inner, groups, cfg.lr))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::run::Arch;
    use crate::ml::{loss::Criterion, model::ContrastiveModelConfig};
    use burn::{
        backend::{Autodiff, NdArray},
        prelude::*,
    };

    type TestBackend = Autodiff<NdArray>;

    fn model(predictor: bool) -> ContrastiveModel<TestBackend> {
        ContrastiveModelConfig::new(2, 4, 3, predictor).init(&Default::default())
    }

    fn loss_grads(model: &ContrastiveModel<TestBackend>) -> <TestBackend as AutodiffBackend>::Gradients {
        let device = Default::default();
        let view1 = Tensor::<TestBackend, 4>::random([4, 3, 6, 6], burn::tensor::Distribution::Default, &device);
        let view2 = Tensor::<TestBackend, 4>::random([4, 3, 6, 6], burn::tensor::Distribution::Default, &device);
        let criterion = Criterion::for_arch(
            if model.predictor.is_some() { Arch::SimSiam } else { Arch::SimClr },
            0.5,
        );
        criterion
            .loss(model.forward(view1), model.forward(view2))
            .unwrap()
            .backward()
    }

    /// Takes one step with whatever optimizer the factory chose and
    /// reports how far conv1's weights moved
    struct StepOnce {
        model: ContrastiveModel<TestBackend>,
    }

    impl OptimizerVisitor<TestBackend> for StepOnce {
        type Output = f64;

        fn model(&self) -> &ContrastiveModel<TestBackend> {
            &self.model
        }

        fn visit<O>(self, mut optimizer: GroupedOptimizer<O>) -> Self::Output
        where
            O: Optimizer<ContrastiveModel<TestBackend>, TestBackend>,
        {
            let before = self.model.backbone.conv1.weight.val();
            let grads  = loss_grads(&self.model);
            let model  = optimizer.step(self.model, grads).unwrap();
            let after  = model.backbone.conv1.weight.val();
            (after - before).abs().sum().into_scalar().elem::<f64>()
        }
    }

    #[test]
    fn every_optimizer_kind_updates_the_backbone() {
        for kind in [OptimizerKind::Sgd, OptimizerKind::Adam, OptimizerKind::RmsProp, OptimizerKind::AdamW] {
            let cfg   = PretrainConfig { optimizer: kind, lr: 0.1, ..PretrainConfig::default() };
            let moved = build_optimizer(&cfg, StepOnce { model: model(false) });
            assert!(moved > 0.0, "{kind} left conv1 unchanged");
        }
    }

    #[test]
    fn split_produces_one_entry_per_group() {
        let model  = model(true);
        let groups = param_groups(true, true, 10.0);
        let opt    = GroupedOptimizer::new((), groups, 0.1);
        let split  = opt.split(&model, loss_grads(&model));
        assert_eq!(split.len(), 3);
        assert_eq!(opt.group_lrs(), vec![0.1, 0.1, 1.0]);
    }

    #[test]
    fn frozen_head_scale_leaves_projector_untouched() {
        let cfg = PretrainConfig {
            fine_tune:     true,
            head_lr_scale: 0.0,
            optimizer:     OptimizerKind::Sgd,
            momentum:      0.0,
            weight_decay:  0.0,
            ..PretrainConfig::default()
        };

        struct ProjectorDelta {
            model: ContrastiveModel<TestBackend>,
        }

        impl OptimizerVisitor<TestBackend> for ProjectorDelta {
            type Output = (f64, f64);

            fn model(&self) -> &ContrastiveModel<TestBackend> {
                &self.model
            }

            fn visit<O>(self, mut optimizer: GroupedOptimizer<O>) -> Self::Output
            where
                O: Optimizer<ContrastiveModel<TestBackend>, TestBackend>,
            {
                let sum = |m: &ContrastiveModel<TestBackend>| {
                    m.projector.linear1.weight.val().sum().into_scalar().elem::<f64>()
                };
                let before = sum(&self.model);
                let grads  = loss_grads(&self.model);
                let model  = optimizer.step(self.model, grads).unwrap();
                (before, sum(&model))
            }
        }

        let (before, after) = build_optimizer(&cfg, ProjectorDelta { model: model(false) });
        assert!((before - after).abs() < 1e-9);
    }
}
