// ============================================================
// Layer 3 — Run Vocabulary
// ============================================================
// The small closed sets a pretraining run is described with:
//
//   Arch          — which self-supervised method is trained
//   OptimizerKind — which update rule drives the weights
//   ParamGroup    — a slice of the model with its own lr scale
//
// All of them parse from the strings used on the command line
// and in the saved JSON config, so FromStr / Display are the
// only conversions the outer layers need.
//
// Reference: Chen et al. (2020) SimCLR
//            Chen & He (2021) SimSiam

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

// ─── Arch ─────────────────────────────────────────────────────────────────────
/// Self-supervised method. Decides the criterion and whether the
/// model carries a predictor head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Arch {
    /// Contrastive: NT-Xent over two augmented views
    #[serde(rename = "SimCLR")]
    SimClr,

    /// Non-contrastive: predictor + stop-gradient
    #[serde(rename = "SimSiam")]
    SimSiam,
}

impl Arch {
    /// SimSiam needs the extra predictor MLP on top of the projector
    pub fn uses_predictor(self) -> bool {
        matches!(self, Arch::SimSiam)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::SimClr  => f.write_str("SimCLR"),
            Arch::SimSiam => f.write_str("SimSiam"),
        }
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simclr"  => Ok(Arch::SimClr),
            "simsiam" => Ok(Arch::SimSiam),
            other     => Err(format!("unsupported arch '{other}' (expected SimCLR or SimSiam)")),
        }
    }
}

// ─── OptimizerKind ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Sgd,
    Adam,
    RmsProp,
    AdamW,
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptimizerKind::Sgd     => "sgd",
            OptimizerKind::Adam    => "adam",
            OptimizerKind::RmsProp => "rmsprop",
            OptimizerKind::AdamW   => "adamw",
        };
        f.write_str(name)
    }
}

impl FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sgd"     => Ok(OptimizerKind::Sgd),
            "adam"    => Ok(OptimizerKind::Adam),
            "rmsprop" => Ok(OptimizerKind::RmsProp),
            "adamw"   => Ok(OptimizerKind::AdamW),
            other     => Err(format!("invalid optimizer '{other}'")),
        }
    }
}

// ─── Parameter groups ─────────────────────────────────────────────────────────
/// Which part of the model a parameter group covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamTarget {
    Whole,
    Backbone,
    Projector,
    Predictor,
}

/// A parameter set plus its learning-rate override, expressed as a
/// multiplier on the scheduled base lr.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamGroup {
    pub target:   ParamTarget,
    pub lr_scale: f64,
}

impl ParamGroup {
    pub fn new(target: ParamTarget, lr_scale: f64) -> Self {
        Self { target, lr_scale }
    }

    /// The default single group: every parameter at the base lr
    pub fn whole() -> Self {
        Self::new(ParamTarget::Whole, 1.0)
    }
}

/// Build the parameter groups for a run, once.
///
/// Without fine-tuning everything trains at the base lr.
/// With fine-tuning the embedding head (projector) is split off
/// so it can run at `head_lr_scale * lr`.
pub fn param_groups(fine_tune: bool, has_predictor: bool, head_lr_scale: f64) -> Vec<ParamGroup> {
    if !fine_tune {
        return vec![ParamGroup::whole()];
    }
    let mut groups = vec![ParamGroup::new(ParamTarget::Backbone, 1.0)];
    if has_predictor {
        groups.push(ParamGroup::new(ParamTarget::Predictor, 1.0));
    }
    groups.push(ParamGroup::new(ParamTarget::Projector, head_lr_scale));
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_parses_case_insensitively() {
        assert_eq!("SimCLR".parse::<Arch>().unwrap(), Arch::SimClr);
        assert_eq!("simsiam".parse::<Arch>().unwrap(), Arch::SimSiam);
        assert!("byol".parse::<Arch>().is_err());
    }

    #[test]
    fn arch_display_round_trips_through_serde_names() {
        let json = serde_json::to_string(&Arch::SimSiam).unwrap();
        assert_eq!(json, "\"SimSiam\"");
        assert_eq!(Arch::SimClr.to_string(), "SimCLR");
    }

    #[test]
    fn optimizer_kind_rejects_unknown_names() {
        assert_eq!("AdamW".parse::<OptimizerKind>().unwrap(), OptimizerKind::AdamW);
        let err = "lamb".parse::<OptimizerKind>().unwrap_err();
        assert!(err.contains("lamb"));
    }

    #[test]
    fn plain_runs_use_a_single_group() {
        let groups = param_groups(false, true, 10.0);
        assert_eq!(groups, vec![ParamGroup::whole()]);
    }

    #[test]
    fn fine_tune_splits_off_the_projector() {
        let groups = param_groups(true, false, 10.0);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].target, ParamTarget::Backbone);
        assert_eq!(groups[1], ParamGroup::new(ParamTarget::Projector, 10.0));

        let simsiam = param_groups(true, true, 1.0);
        assert!(simsiam.iter().any(|g| g.target == ParamTarget::Predictor));
    }
}
