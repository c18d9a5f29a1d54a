//! Field aggregator: the one piece of shared mutable state.
//!
//! Owned by the runtime task; nothing else mutates it. Readers get
//! [`FieldState`] snapshots over a `tokio::sync::watch` channel.
//!
//! The aggregate coherence never jumps: every admitted packet and every
//! pulse moves it by one bounded step toward a target, and a departing
//! member's contribution fades over several pulses instead of vanishing.

use std::collections::{BTreeMap, VecDeque};

use lumen_transport::ConnectionId;
use serde::Serialize;

use crate::signature::{IdentitySignature, Mode};
use crate::types::{clamp_percent, clamp_unit};

#[derive(Debug, Clone)]
pub struct FieldConfig {
    /// Fraction of the distance to the target covered per step (default 0.1).
    pub step: f64,
    /// Coherence samples kept in history (default 144).
    pub history_len: usize,
    /// Coherence of an empty field, 0–100 (default 50).
    pub initial_coherence: f64,
    /// Fading weight multiplier per pulse (default 0.5).
    pub fade_factor: f64,
    /// Fading contributions below this weight are dropped (default 0.05).
    pub fade_floor: f64,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            step: 0.1,
            history_len: 144,
            initial_coherence: 50.0,
            fade_factor: 0.5,
            fade_floor: 0.05,
        }
    }
}

/// Snapshot of the collective field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldState {
    /// Aggregate coherence, 0–100.
    pub coherence: f64,
    pub dominant_mode: Option<Mode>,
    pub active_nodes: usize,
    /// Most recent coherence values, oldest first.
    pub history: VecDeque<f64>,
}

/// Advice for a node relative to the current field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "adjustment")]
pub enum FieldAdjustment {
    Maintain,
    Minor { suggested_mode: Option<Mode> },
    Major { suggested_mode: Option<Mode> },
}

impl FieldAdjustment {
    /// One-line advice for a sender, `None` when no change is needed.
    pub fn advice(&self) -> Option<String> {
        let (text, mode) = match self {
            FieldAdjustment::Maintain => return None,
            FieldAdjustment::Minor { suggested_mode } => ("adjust gently toward the field", suggested_mode),
            FieldAdjustment::Major { suggested_mode } => ("realign with the field", suggested_mode),
        };
        Some(match mode {
            Some(mode) => format!("{text} in {mode} mode"),
            None => text.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default)]
struct Member {
    mode: Option<Mode>,
    contribution: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Fading {
    value: f64,
    weight: f64,
}

#[derive(Debug, Clone)]
pub struct FieldAggregator {
    config: FieldConfig,
    state: FieldState,
    members: BTreeMap<ConnectionId, Member>,
    fading: Vec<Fading>,
}

impl FieldAggregator {
    pub fn new(config: FieldConfig) -> Self {
        let coherence = clamp_percent(config.initial_coherence);
        Self {
            state: FieldState {
                coherence,
                dominant_mode: None,
                active_nodes: 0,
                history: VecDeque::from([coherence]),
            },
            config,
            members: BTreeMap::new(),
            fading: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> FieldState {
        self.state.clone()
    }

    pub fn coherence(&self) -> f64 {
        self.state.coherence
    }

    pub fn is_member(&self, id: &ConnectionId) -> bool {
        self.members.contains_key(id)
    }

    /// Add a member. Joining twice only updates the mode.
    pub fn join(&mut self, id: ConnectionId, mode: Option<Mode>) {
        self.members.entry(id).or_default().mode = mode;
        self.recount();
    }

    /// Update a member's mode after a signature change. Ignored for
    /// non-members.
    pub fn set_mode(&mut self, id: &ConnectionId, mode: Option<Mode>) {
        if let Some(member) = self.members.get_mut(id) {
            member.mode = mode;
            self.recount();
        }
    }

    /// Account an admitted packet whose sender coherence is
    /// `packet_coherence` (0–1).
    pub fn admit(&mut self, id: &ConnectionId, packet_coherence: f64) {
        let target = 100.0 * clamp_unit(packet_coherence);
        if let Some(member) = self.members.get_mut(id) {
            member.contribution = Some(target);
        }
        self.step_toward(target);
        self.record();
    }

    /// Remove a member; its contribution starts fading.
    pub fn leave(&mut self, id: &ConnectionId) -> bool {
        let Some(member) = self.members.remove(id) else {
            return false;
        };
        if let Some(value) = member.contribution {
            self.fading.push(Fading { value, weight: 1.0 });
        }
        self.recount();
        true
    }

    /// Shift coherence directly by `delta` points.
    pub fn nudge(&mut self, delta: f64) {
        self.state.coherence = clamp_percent(self.state.coherence + delta);
        self.record();
    }

    /// One decay tick. Returns whether coherence moved noticeably.
    pub fn pulse(&mut self) -> bool {
        let (factor, floor) = (self.config.fade_factor, self.config.fade_floor);
        for f in &mut self.fading {
            f.weight *= factor;
        }
        self.fading.retain(|f| f.weight >= floor);

        let before = self.state.coherence;
        let target = self.relaxation_target();
        self.step_toward(target);
        let changed = (self.state.coherence - before).abs() > 0.01;
        if changed {
            self.record();
        }
        changed
    }

    /// How strongly a node with `signature` would resonate with the field,
    /// 0–100.
    pub fn personal_resonance(&self, signature: &IdentitySignature) -> f64 {
        let bonus = if self.state.dominant_mode == Some(signature.mode) {
            50.0
        } else {
            25.0
        };
        clamp_percent(self.state.coherence + bonus)
    }

    pub fn suggest_adjustment(&self, signature: &IdentitySignature) -> FieldAdjustment {
        let resonance = self.personal_resonance(signature);
        if resonance > 90.0 {
            FieldAdjustment::Maintain
        } else if resonance > 70.0 {
            FieldAdjustment::Minor {
                suggested_mode: self.state.dominant_mode,
            }
        } else {
            FieldAdjustment::Major {
                suggested_mode: self.state.dominant_mode,
            }
        }
    }

    fn step_toward(&mut self, target: f64) {
        let current = self.state.coherence;
        self.state.coherence = clamp_percent(current + self.config.step * (target - current));
    }

    fn relaxation_target(&self) -> f64 {
        let mut sum = 0.0;
        let mut weight = 0.0;
        for value in self.members.values().filter_map(|m| m.contribution) {
            sum += value;
            weight += 1.0;
        }
        for f in &self.fading {
            sum += f.value * f.weight;
            weight += f.weight;
        }
        if weight > 0.0 {
            sum / weight
        } else {
            clamp_percent(self.config.initial_coherence)
        }
    }

    fn record(&mut self) {
        self.state.history.push_back(self.state.coherence);
        while self.state.history.len() > self.config.history_len.max(1) {
            self.state.history.pop_front();
        }
    }

    fn recount(&mut self) {
        self.state.active_nodes = self.members.len();

        let mut counts = [0usize; Mode::ALL.len()];
        for mode in self.members.values().filter_map(|m| m.mode) {
            counts[mode.index()] += 1;
        }
        let mut dominant = None;
        let mut best = 0;
        for (i, &count) in counts.iter().enumerate() {
            if count > best {
                best = count;
                dominant = Some(Mode::ALL[i]);
            }
        }
        self.state.dominant_mode = dominant;
    }
}

impl Default for FieldAggregator {
    fn default() -> Self {
        Self::new(FieldConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{Attunement, Key};

    fn id(n: u64) -> ConnectionId {
        ConnectionId::new(n)
    }

    #[test]
    fn starts_at_baseline() {
        let field = FieldAggregator::default();
        let s = field.snapshot();
        assert_eq!(s.coherence, 50.0);
        assert_eq!(s.active_nodes, 0);
        assert_eq!(s.dominant_mode, None);
        assert_eq!(s.history, VecDeque::from([50.0]));
    }

    #[test]
    fn join_is_idempotent_and_tracks_plurality() {
        let mut field = FieldAggregator::default();
        field.join(id(1), Some(Mode::Dorian));
        field.join(id(1), Some(Mode::Dorian));
        assert_eq!(field.snapshot().active_nodes, 1);

        field.join(id(2), Some(Mode::Lydian));
        field.join(id(3), Some(Mode::Lydian));
        assert_eq!(field.snapshot().dominant_mode, Some(Mode::Lydian));

        field.leave(&id(3));
        // tie between dorian and lydian goes to the earlier mode
        assert_eq!(field.snapshot().dominant_mode, Some(Mode::Dorian));
        assert_eq!(field.snapshot().active_nodes, 2);
    }

    #[test]
    fn admit_moves_by_a_bounded_step() {
        let mut field = FieldAggregator::default();
        field.join(id(1), None);
        field.admit(&id(1), 1.0);
        assert!((field.coherence() - 55.0).abs() < 1e-9);
        field.admit(&id(1), 0.0);
        assert!((field.coherence() - 49.5).abs() < 1e-9);
        assert_eq!(field.snapshot().history.len(), 3);
    }

    #[test]
    fn one_peer_cannot_whipsaw_the_field() {
        let mut field = FieldAggregator::default();
        field.join(id(1), None);
        for _ in 0..3 {
            field.admit(&id(1), 1.0);
            field.admit(&id(1), 0.0);
        }
        let c = field.coherence();
        assert!((40.0..60.0).contains(&c), "coherence swung to {c}");
    }

    #[test]
    fn departed_contribution_fades_not_vanishes() {
        let mut field = FieldAggregator::default();
        field.join(id(1), None);
        for _ in 0..30 {
            field.admit(&id(1), 1.0);
        }
        let high = field.coherence();
        assert!(high > 95.0);

        assert!(field.leave(&id(1)));
        assert!(!field.leave(&id(1)));
        assert_eq!(field.snapshot().active_nodes, 0);

        // first pulse still pulls toward the fading contribution
        field.pulse();
        assert!(field.coherence() > high - 1.0);

        for _ in 0..200 {
            field.pulse();
        }
        assert!((field.coherence() - 50.0).abs() < 0.5);
    }

    #[test]
    fn pulse_on_settled_field_reports_no_change() {
        let mut field = FieldAggregator::default();
        assert!(!field.pulse());
        assert_eq!(field.snapshot().history.len(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let mut field = FieldAggregator::new(FieldConfig {
            history_len: 4,
            ..FieldConfig::default()
        });
        for _ in 0..10 {
            field.nudge(1.0);
        }
        assert_eq!(field.snapshot().history.len(), 4);
        assert_eq!(field.coherence(), 60.0);
    }

    #[test]
    fn nudge_is_clamped() {
        let mut field = FieldAggregator::default();
        field.nudge(500.0);
        assert_eq!(field.coherence(), 100.0);
        field.nudge(-500.0);
        assert_eq!(field.coherence(), 0.0);
    }

    #[test]
    fn personal_resonance_and_advice() {
        let mut field = FieldAggregator::default();
        field.join(id(1), Some(Mode::Aeolian));
        let aligned = IdentitySignature::new(Mode::Aeolian, Key::A, Attunement::Theta, "r", "resonate");
        let other = IdentitySignature::new(Mode::Ionian, Key::A, Attunement::Theta, "r", "resonate");

        assert_eq!(field.personal_resonance(&aligned), 100.0);
        assert_eq!(field.personal_resonance(&other), 75.0);
        assert_eq!(field.suggest_adjustment(&aligned), FieldAdjustment::Maintain);
        assert_eq!(
            field.suggest_adjustment(&other),
            FieldAdjustment::Minor {
                suggested_mode: Some(Mode::Aeolian)
            }
        );

        field.nudge(-40.0);
        assert_eq!(
            field.suggest_adjustment(&other),
            FieldAdjustment::Major {
                suggested_mode: Some(Mode::Aeolian)
            }
        );
        assert_eq!(
            field.suggest_adjustment(&other).advice().as_deref(),
            Some("realign with the field in aeolian mode")
        );
        assert_eq!(FieldAdjustment::Maintain.advice(), None);
    }

    #[test]
    fn set_mode_ignores_non_members() {
        let mut field = FieldAggregator::default();
        field.set_mode(&id(9), Some(Mode::Locrian));
        assert_eq!(field.snapshot().dominant_mode, None);
        field.join(id(9), None);
        field.set_mode(&id(9), Some(Mode::Locrian));
        assert_eq!(field.snapshot().dominant_mode, Some(Mode::Locrian));
    }
}
