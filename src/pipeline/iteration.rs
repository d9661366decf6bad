//! Iteration scheduler.
//!
//! Drives a fixed number of iterations over a plugin or group of plugins,
//! deciding which datasets are read and written on each one.
//!
//! # States
//!
//! `NotStarted -> Running { iteration: 0 } -> ... -> Running { iteration: k-1 } -> Complete`
//!
//! Iterations 0 and 1 use explicitly registered bindings. Every later
//! iteration is derived from the previous one by swapping the members of
//! each alternating (original, clone) pair between the in and out lists, so
//! the state stays the same size however many iterations run.
//!
//! # Finalisation
//!
//! On completion, whichever member of a pair currently sits in the out list
//! holds the last result. It survives under the original's logical name and
//! the other member is marked for removal. The survivor is found by looking
//! at the binding, not by the parity of the iteration count.

use crate::data::{DataRole, DatasetId, ExperimentIndex, CLONE_MARKER};
use crate::error::{Result, TomoflowError};
use std::fmt;

/// Datasets read and written by one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    pub inputs: Vec<DatasetId>,
    pub outputs: Vec<DatasetId>,
}

impl Binding {
    pub fn new(inputs: Vec<DatasetId>, outputs: Vec<DatasetId>) -> Self {
        Self { inputs, outputs }
    }

    fn replace(&mut self, from: DatasetId, to: DatasetId) {
        for id in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            if *id == from {
                *id = to;
            } else if *id == to {
                *id = from;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlternatingPair {
    pub original: DatasetId,
    pub clone: DatasetId,
}

/// Bindings of the first two iterations plus the alternating pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationPlan {
    pub iteration_0: Option<Binding>,
    pub iteration_1: Option<Binding>,
    pub alternating: Vec<AlternatingPair>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationPhase {
    NotStarted,
    Running { iteration: usize },
    Complete,
}

impl fmt::Display for IterationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterationPhase::NotStarted => write!(f, "not started"),
            IterationPhase::Running { iteration } => write!(f, "iteration {}", iteration),
            IterationPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Outcome of finalising one alternating pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalisedPair {
    pub logical_name: String,
    pub kept: DatasetId,
    pub removed: DatasetId,
}

#[derive(Debug, Clone)]
pub struct IterationScheduler {
    fixed_iterations: usize,
    plan: IterationPlan,
    phase: IterationPhase,
    current: Binding,
}

impl IterationScheduler {
    pub fn new(fixed_iterations: usize) -> Result<Self> {
        if fixed_iterations == 0 {
            return Err(TomoflowError::Configuration(
                "an iteration count must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            fixed_iterations,
            plan: IterationPlan::default(),
            phase: IterationPhase::NotStarted,
            current: Binding::default(),
        })
    }

    pub fn fixed_iterations(&self) -> usize {
        self.fixed_iterations
    }

    pub fn phase(&self) -> IterationPhase {
        self.phase
    }

    pub fn plan(&self) -> &IterationPlan {
        &self.plan
    }

    /// Binding of the current iteration.
    pub fn binding(&self) -> &Binding {
        &self.current
    }

    pub fn current_iteration(&self) -> Option<usize> {
        match self.phase {
            IterationPhase::Running { iteration } => Some(iteration),
            _ => None,
        }
    }

    /// Register the binding of iteration 0 or 1.
    pub fn set_iteration_datasets(
        &mut self,
        iteration: usize,
        inputs: Vec<DatasetId>,
        outputs: Vec<DatasetId>,
    ) -> Result<()> {
        let binding = Binding::new(inputs, outputs);
        match iteration {
            0 => self.plan.iteration_0 = Some(binding),
            1 => self.plan.iteration_1 = Some(binding),
            other => {
                return Err(TomoflowError::Configuration(format!(
                    "only iterations 0 and 1 take explicit datasets, got {}",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Register a pair whose members swap roles from iteration 2 on.
    /// One of the two must be a clone.
    pub fn set_alternating_datasets(
        &mut self,
        index: &ExperimentIndex,
        original: DatasetId,
        clone: DatasetId,
    ) -> Result<()> {
        let first = index.get(original)?.name();
        let second = index.get(clone)?.name();
        if !first.contains(CLONE_MARKER) && !second.contains(CLONE_MARKER) {
            return Err(TomoflowError::CloneNaming {
                first: first.to_string(),
                second: second.to_string(),
            });
        }
        self.plan.alternating.push(AlternatingPair { original, clone });
        Ok(())
    }

    /// Enter iteration 0.
    pub fn start(&mut self) -> Result<&Binding> {
        if self.phase != IterationPhase::NotStarted {
            return Err(TomoflowError::Configuration(format!(
                "cannot start iterating from state '{}'",
                self.phase
            )));
        }
        self.current = self
            .plan
            .iteration_0
            .clone()
            .ok_or_else(|| missing_binding(0))?;
        self.phase = IterationPhase::Running { iteration: 0 };
        tracing::info!("Iteration 1 of {}", self.fixed_iterations);
        Ok(&self.current)
    }

    /// Move past the current iteration.
    pub fn advance(&mut self) -> Result<IterationPhase> {
        let IterationPhase::Running { iteration } = self.phase else {
            return Err(TomoflowError::Configuration(format!(
                "cannot advance from state '{}'",
                self.phase
            )));
        };
        if iteration + 1 >= self.fixed_iterations {
            self.phase = IterationPhase::Complete;
            tracing::info!("Completed {} iterations", self.fixed_iterations);
            return Ok(self.phase);
        }
        let next = iteration + 1;
        if next == 1 {
            self.current = self
                .plan
                .iteration_1
                .clone()
                .ok_or_else(|| missing_binding(1))?;
        } else {
            self.swap_alternating();
        }
        self.phase = IterationPhase::Running { iteration: next };
        tracing::info!("Iteration {} of {}", next + 1, self.fixed_iterations);
        Ok(self.phase)
    }

    /// Exchange the members of every alternating pair in the current
    /// binding. Applying it twice restores the binding.
    pub fn swap_alternating(&mut self) {
        for pair in &self.plan.alternating {
            self.current.replace(pair.original, pair.clone);
        }
    }

    /// Keep the member of each pair that holds the last result, under the
    /// logical name, and mark the other for removal.
    pub fn finalise(&mut self, index: &mut ExperimentIndex) -> Result<Vec<FinalisedPair>> {
        if self.phase != IterationPhase::Complete {
            return Err(TomoflowError::Configuration(format!(
                "cannot finalise iterated datasets in state '{}'",
                self.phase
            )));
        }
        let mut finalised = Vec::with_capacity(self.plan.alternating.len());
        for pair in &self.plan.alternating {
            let (kept, removed) = if self.current.outputs.contains(&pair.original) {
                (pair.original, pair.clone)
            } else {
                (pair.clone, pair.original)
            };

            let original_name = index.get(pair.original)?.name().to_string();
            let logical_name = if original_name.contains(CLONE_MARKER) {
                index.get(pair.clone)?.name().to_string()
            } else {
                original_name
            };

            index.get_mut(removed)?.remove = true;
            let kept_name = index.get(kept)?.name().to_string();
            if kept_name != logical_name {
                index.rebind(DataRole::Out, &logical_name, kept)?;
                index.rebind(DataRole::Out, &kept_name, removed)?;
                index.get_mut(kept)?.set_name(logical_name.clone());
                index.get_mut(removed)?.set_name(kept_name);
            }
            tracing::info!(
                "Iterated dataset {} is {}, {} will be removed",
                logical_name,
                kept,
                removed
            );
            finalised.push(FinalisedPair {
                logical_name,
                kept,
                removed,
            });
        }
        Ok(finalised)
    }
}

fn missing_binding(iteration: usize) -> TomoflowError {
    TomoflowError::MissingMetadata {
        what: "iteration datasets".to_string(),
        key: iteration.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DType;
    use proptest::prelude::*;

    struct Fixture {
        index: ExperimentIndex,
        input: DatasetId,
        orig: DatasetId,
        clone: DatasetId,
    }

    fn fixture() -> Fixture {
        let mut index = ExperimentIndex::new();
        let input = index.create(DataRole::In, "tomo", vec![4, 2, 2], DType::Float32);
        let orig = index.create(DataRole::Out, "tomo", vec![4, 2, 2], DType::Float32);
        let clone = index.create(DataRole::Out, "itr_clone1", vec![4, 2, 2], DType::Float32);
        Fixture {
            index,
            input,
            orig,
            clone,
        }
    }

    fn scheduler(f: &Fixture, k: usize) -> IterationScheduler {
        let mut s = IterationScheduler::new(k).unwrap();
        s.set_iteration_datasets(0, vec![f.input], vec![f.orig]).unwrap();
        s.set_iteration_datasets(1, vec![f.input, f.orig], vec![f.clone])
            .unwrap();
        s.set_alternating_datasets(&f.index, f.orig, f.clone).unwrap();
        s
    }

    fn run_to_completion(s: &mut IterationScheduler) -> Vec<Binding> {
        let mut seen = vec![s.start().unwrap().clone()];
        while let IterationPhase::Running { .. } = s.advance().unwrap() {
            seen.push(s.binding().clone());
        }
        seen
    }

    #[test]
    fn test_zero_iterations_rejected() {
        assert!(IterationScheduler::new(0).is_err());
    }

    #[test]
    fn test_only_first_two_iterations_are_explicit() {
        let mut s = IterationScheduler::new(3).unwrap();
        assert!(s.set_iteration_datasets(2, vec![], vec![]).is_err());
    }

    #[test]
    fn test_alternation_sequence() {
        let f = fixture();
        let mut s = scheduler(&f, 4);
        let seen = run_to_completion(&mut s);
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].outputs, vec![f.orig]);
        assert_eq!(seen[1].outputs, vec![f.clone]);
        assert_eq!(seen[2].inputs, vec![f.input, f.clone]);
        assert_eq!(seen[2].outputs, vec![f.orig]);
        assert_eq!(seen[3], seen[1]);
    }

    #[test]
    fn test_three_iterations_keep_original() {
        let mut f = fixture();
        let mut s = scheduler(&f, 3);
        run_to_completion(&mut s);
        let done = s.finalise(&mut f.index).unwrap();
        assert_eq!(done[0].kept, f.orig);
        assert_eq!(done[0].logical_name, "tomo");
        assert!(f.index.get(f.clone).unwrap().remove);
        assert!(!f.index.get(f.orig).unwrap().remove);
        assert_eq!(f.index.lookup(DataRole::Out, "tomo").unwrap(), f.orig);
    }

    #[test]
    fn test_two_iterations_keep_clone_under_logical_name() {
        let mut f = fixture();
        let mut s = scheduler(&f, 2);
        run_to_completion(&mut s);
        let done = s.finalise(&mut f.index).unwrap();
        assert_eq!(done[0].kept, f.clone);
        assert_eq!(f.index.lookup(DataRole::Out, "tomo").unwrap(), f.clone);
        assert_eq!(f.index.lookup(DataRole::Out, "itr_clone1").unwrap(), f.orig);
        assert_eq!(f.index.get(f.clone).unwrap().name(), "tomo");
        assert!(f.index.get(f.orig).unwrap().remove);
    }

    #[test]
    fn test_single_iteration_needs_no_second_binding() {
        let mut f = fixture();
        let mut s = IterationScheduler::new(1).unwrap();
        s.set_iteration_datasets(0, vec![f.input], vec![f.orig]).unwrap();
        s.set_alternating_datasets(&f.index, f.orig, f.clone).unwrap();
        assert_eq!(run_to_completion(&mut s).len(), 1);
        assert_eq!(s.finalise(&mut f.index).unwrap()[0].kept, f.orig);
    }

    #[test]
    fn test_missing_iteration_one_binding() {
        let f = fixture();
        let mut s = IterationScheduler::new(2).unwrap();
        s.set_iteration_datasets(0, vec![f.input], vec![f.orig]).unwrap();
        s.start().unwrap();
        assert!(matches!(
            s.advance(),
            Err(TomoflowError::MissingMetadata { .. })
        ));
    }

    #[test]
    fn test_alternating_pair_needs_clone_name() {
        let mut f = fixture();
        let other = f
            .index
            .create(DataRole::Out, "other", vec![4, 2, 2], DType::Float32);
        let mut s = IterationScheduler::new(2).unwrap();
        let err = s
            .set_alternating_datasets(&f.index, f.orig, other)
            .unwrap_err();
        assert!(matches!(err, TomoflowError::CloneNaming { .. }));
        // either member may carry the marker
        assert!(s.set_alternating_datasets(&f.index, f.clone, f.orig).is_ok());
    }

    #[test]
    fn test_finalise_before_complete() {
        let mut f = fixture();
        let mut s = scheduler(&f, 2);
        s.start().unwrap();
        assert!(s.finalise(&mut f.index).is_err());
        assert!(IterationScheduler::new(1).unwrap().advance().is_err());
    }

    proptest! {
        #[test]
        fn test_runs_exactly_k_iterations(k in 1usize..40) {
            let f = fixture();
            let mut s = scheduler(&f, k);
            let mut iterations = Vec::new();
            s.start().unwrap();
            iterations.push(s.current_iteration().unwrap());
            loop {
                match s.advance().unwrap() {
                    IterationPhase::Running { iteration } => iterations.push(iteration),
                    IterationPhase::Complete => break,
                    IterationPhase::NotStarted => prop_assert!(false),
                }
            }
            prop_assert_eq!(iterations, (0..k).collect::<Vec<_>>());
        }

        #[test]
        fn test_pair_members_split_between_roles(k in 3usize..30) {
            let f = fixture();
            let mut s = scheduler(&f, k);
            let seen = run_to_completion(&mut s);
            for b in &seen[2..] {
                let orig_in = b.inputs.contains(&f.orig);
                let clone_in = b.inputs.contains(&f.clone);
                let orig_out = b.outputs.contains(&f.orig);
                let clone_out = b.outputs.contains(&f.clone);
                prop_assert!(orig_in != clone_in);
                prop_assert!(orig_out != clone_out);
                prop_assert_eq!(orig_in, clone_out);
            }
        }

        #[test]
        fn test_swap_is_an_involution(k in 2usize..10) {
            let f = fixture();
            let mut s = scheduler(&f, k);
            s.start().unwrap();
            s.advance().unwrap();
            let before = s.binding().clone();
            s.swap_alternating();
            prop_assert_ne!(s.binding(), &before);
            s.swap_alternating();
            prop_assert_eq!(s.binding(), &before);
        }
    }
}
