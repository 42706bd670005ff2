// ============================================================
// Layer 5 — Learning-rate Policies
// ============================================================
// Resolved by name from `cfg.lr_policy`, stepped once per epoch:
//
//   constant_lr   lr (after optional linear warmup)
//   cosine_lr     warmup, then 0.5 * (1 + cos(pi * e / es)) * lr
//                 with e = epoch - warmup, es = epochs - warmup
//   multistep_lr  lr * gamma ^ (epoch / lr_adjust)
//   exp_lr        warmup, then lr * gamma ^ (epoch - warmup)
//
// Linear warmup ramps lr * (epoch + 1) / warmup_length, so the
// first epoch already trains with a non-zero rate.
//
// Reference: Loshchilov & Hutter (2017) SGDR
//            Goyal et al. (2017) linear warmup

use std::f64::consts::PI;

use crate::application::pretrain_use_case::PretrainConfig;
use crate::domain::{errors::LookupError, traits::LrSchedule};
use crate::ml::optimizer::GroupedOptimizer;

pub const KNOWN_POLICIES: [&str; 4] = ["constant_lr", "cosine_lr", "multistep_lr", "exp_lr"];

fn warmup_lr(base: f64, warmup: usize, epoch: usize) -> f64 {
    base * (epoch + 1) as f64 / warmup as f64
}

#[derive(Debug, Clone)]
pub struct ConstantLr {
    base:   f64,
    warmup: usize,
}

impl LrSchedule for ConstantLr {
    fn name(&self) -> &'static str {
        "constant_lr"
    }

    fn lr_at(&self, epoch: usize, _iteration: Option<usize>) -> f64 {
        if epoch < self.warmup { warmup_lr(self.base, self.warmup, epoch) } else { self.base }
    }
}

#[derive(Debug, Clone)]
pub struct CosineLr {
    base:   f64,
    warmup: usize,
    epochs: usize,
}

impl LrSchedule for CosineLr {
    fn name(&self) -> &'static str {
        "cosine_lr"
    }

    fn lr_at(&self, epoch: usize, _iteration: Option<usize>) -> f64 {
        if epoch < self.warmup {
            return warmup_lr(self.base, self.warmup, epoch);
        }
        let e  = (epoch - self.warmup) as f64;
        let es = self.epochs.saturating_sub(self.warmup).max(1) as f64;
        0.5 * (1.0 + (PI * e / es).cos()) * self.base
    }
}

#[derive(Debug, Clone)]
pub struct MultiStepLr {
    base:   f64,
    gamma:  f64,
    adjust: usize,
}

impl LrSchedule for MultiStepLr {
    fn name(&self) -> &'static str {
        "multistep_lr"
    }

    fn lr_at(&self, epoch: usize, _iteration: Option<usize>) -> f64 {
        self.base * self.gamma.powi((epoch / self.adjust.max(1)) as i32)
    }
}

#[derive(Debug, Clone)]
pub struct ExponentialLr {
    base:   f64,
    warmup: usize,
    gamma:  f64,
}

impl LrSchedule for ExponentialLr {
    fn name(&self) -> &'static str {
        "exp_lr"
    }

    fn lr_at(&self, epoch: usize, _iteration: Option<usize>) -> f64 {
        if epoch < self.warmup {
            return warmup_lr(self.base, self.warmup, epoch);
        }
        self.base * self.gamma.powi((epoch - self.warmup) as i32)
    }
}

/// Build the policy called `name` from the run's lr knobs
pub fn resolve(name: &str, cfg: &PretrainConfig) -> Result<Box<dyn LrSchedule>, LookupError> {
    let base   = cfg.lr;
    let warmup = cfg.warmup_length;
    let policy: Box<dyn LrSchedule> = match name {
        "constant_lr"  => Box::new(ConstantLr { base, warmup }),
        "cosine_lr"    => Box::new(CosineLr { base, warmup, epochs: cfg.epochs }),
        "multistep_lr" => Box::new(MultiStepLr { base, gamma: cfg.lr_gamma, adjust: cfg.lr_adjust }),
        "exp_lr"       => Box::new(ExponentialLr { base, warmup, gamma: cfg.lr_gamma }),
        other          => return Err(LookupError::lr_policy(other, &KNOWN_POLICIES)),
    };
    tracing::debug!("=> Using lr policy {}", policy.name());
    Ok(policy)
}

/// Write the policy's lr for `epoch` into the optimizer and return it
pub fn step<O>(policy: &dyn LrSchedule, optimizer: &mut GroupedOptimizer<O>, epoch: usize) -> f64 {
    let lr = policy.lr_at(epoch, None);
    optimizer.set_lr(lr);
    tracing::debug!("Epoch {} group lrs {:?}", epoch, optimizer.group_lrs());
    lr
}
