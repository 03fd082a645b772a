//! Composable bring-up sequences.
//!
//! A [`Sequence`] is an ordered collection of uniquely named steps which is
//! assembled once per target family and executed once per session. Chip
//! families customize the generic base procedure by declaring structural
//! edits against step names ([`Sequence::insert_before`],
//! [`Sequence::wrap`], [`Sequence::replace`], ...) instead of forking the
//! whole procedure, so family code stays proportional to what actually
//! differs.
//!
//! All structural edits are validated when they are made: a missing anchor
//! or a name collision is reported immediately as a [`SequenceError`], not
//! at execution time.

use crate::Error;

/// Errors raised while assembling a [`Sequence`].
///
/// These are construction errors and always fatal to bring-up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    /// The named anchor or target step does not exist in the sequence.
    #[error("the sequence has no step named `{0}`")]
    StepNotFound(String),
    /// A step with this name already exists in the sequence.
    #[error("the sequence already has a step named `{0}`")]
    DuplicateStep(String),
}

type StepFn<C> = Box<dyn FnOnce(&mut C) -> Result<(), Error>>;

/// A single named unit of bring-up work, executed at most once.
pub struct Step<C> {
    name: &'static str,
    run: StepFn<C>,
}

impl<C> Step<C> {
    /// Creates a named step from a closure.
    pub fn new(name: &'static str, run: impl FnOnce(&mut C) -> Result<(), Error> + 'static) -> Self {
        Step {
            name,
            run: Box::new(run),
        }
    }

    /// The identifier of this step.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runs the step against the given context.
    ///
    /// This consumes the step; steps are never re-entered.
    pub fn run(self, ctx: &mut C) -> Result<(), Error> {
        (self.run)(ctx)
    }
}

impl<C> std::fmt::Debug for Step<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

/// An ordered sequence of named steps.
///
/// The sequence is mutated only while it is assembled; executing it
/// consumes it and runs the steps strictly in declared order, stopping at
/// the first failing step.
pub struct Sequence<C> {
    steps: Vec<Step<C>>,
}

impl<C> Default for Sequence<C> {
    fn default() -> Self {
        Sequence::new()
    }
}

impl<C> std::fmt::Debug for Sequence<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence")
            .field("steps", &self.step_names())
            .finish()
    }
}

impl<C> Sequence<C> {
    /// Creates an empty sequence.
    pub fn new() -> Self {
        Sequence { steps: Vec::new() }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.name == name)
    }

    fn check_free(&self, name: &str) -> Result<(), SequenceError> {
        if self.position(name).is_some() {
            return Err(SequenceError::DuplicateStep(name.to_string()));
        }
        Ok(())
    }

    /// Appends a step at the end of the sequence.
    pub fn append(&mut self, step: Step<C>) -> Result<&mut Self, SequenceError> {
        self.check_free(step.name)?;
        self.steps.push(step);
        Ok(self)
    }

    /// Inserts a step immediately before the step named `anchor`.
    pub fn insert_before(
        &mut self,
        anchor: &str,
        step: Step<C>,
    ) -> Result<&mut Self, SequenceError> {
        let index = self
            .position(anchor)
            .ok_or_else(|| SequenceError::StepNotFound(anchor.to_string()))?;
        self.check_free(step.name)?;
        self.steps.insert(index, step);
        Ok(self)
    }

    /// Inserts a step immediately after the step named `anchor`.
    pub fn insert_after(&mut self, anchor: &str, step: Step<C>) -> Result<&mut Self, SequenceError> {
        let index = self
            .position(anchor)
            .ok_or_else(|| SequenceError::StepNotFound(anchor.to_string()))?;
        self.check_free(step.name)?;
        self.steps.insert(index + 1, step);
        Ok(self)
    }

    /// Replaces the step named `target` with `step`, keeping its position.
    pub fn replace(&mut self, target: &str, step: Step<C>) -> Result<&mut Self, SequenceError> {
        let index = self
            .position(target)
            .ok_or_else(|| SequenceError::StepNotFound(target.to_string()))?;
        if step.name != target {
            self.check_free(step.name)?;
        }
        self.steps[index] = step;
        Ok(self)
    }

    /// Hands the step named `target` to `wrapper` and puts the returned
    /// replacement back in its position.
    ///
    /// The wrapper receives the existing step by value, so it can run it
    /// from within the replacement ("do more, then run the existing step"
    /// and vice versa) or drop it entirely.
    pub fn wrap(
        &mut self,
        target: &str,
        wrapper: impl FnOnce(Step<C>) -> Step<C>,
    ) -> Result<&mut Self, SequenceError> {
        let index = self
            .position(target)
            .ok_or_else(|| SequenceError::StepNotFound(target.to_string()))?;
        let inner = self.steps.remove(index);
        let replacement = wrapper(inner);
        if replacement.name != target {
            self.check_free(replacement.name)?;
        }
        self.steps.insert(index, replacement);
        Ok(self)
    }

    /// The names of all steps, in execution order.
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name).collect()
    }

    /// Executes all steps in declared order.
    ///
    /// Execution stops at the first failing step; the failure is surfaced
    /// with the name of the step attached. There is no partial-step retry
    /// at this layer.
    pub fn execute(self, ctx: &mut C) -> Result<(), Error> {
        for step in self.steps {
            let name = step.name;
            tracing::debug!("running bring-up step `{name}`");
            step.run(ctx).map_err(|source| Error::Step {
                step: name,
                source: Box::new(source),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    /// The context the test steps record into.
    type Log = Vec<&'static str>;

    fn mark(name: &'static str) -> Step<Log> {
        Step::new(name, move |log: &mut Log| {
            log.push(name);
            Ok(())
        })
    }

    #[test]
    fn steps_execute_in_declared_order() {
        let mut seq = Sequence::new();
        seq.append(mark("one")).unwrap();
        seq.append(mark("two")).unwrap();
        seq.append(mark("three")).unwrap();

        let mut log = Log::new();
        seq.execute(&mut log).unwrap();
        assert_eq!(log, vec!["one", "two", "three"]);
    }

    #[test]
    fn insert_before_and_after_anchor() {
        let mut seq = Sequence::new();
        seq.append(mark("middle")).unwrap();
        seq.insert_before("middle", mark("first")).unwrap();
        seq.insert_after("middle", mark("last")).unwrap();

        assert_eq!(seq.step_names(), vec!["first", "middle", "last"]);
    }

    #[test]
    fn insert_against_missing_anchor_fails() {
        let mut seq = Sequence::new();
        seq.append(mark("only")).unwrap();

        assert_eq!(
            seq.insert_before("missing", mark("new")).unwrap_err(),
            SequenceError::StepNotFound("missing".to_string())
        );
        assert_eq!(
            seq.insert_after("missing", mark("new")).unwrap_err(),
            SequenceError::StepNotFound("missing".to_string())
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut seq = Sequence::new();
        seq.append(mark("step")).unwrap();

        assert_eq!(
            seq.append(mark("step")).unwrap_err(),
            SequenceError::DuplicateStep("step".to_string())
        );
        assert_eq!(
            seq.insert_after("step", mark("step")).unwrap_err(),
            SequenceError::DuplicateStep("step".to_string())
        );
    }

    #[test]
    fn replace_keeps_the_position() {
        let mut seq = Sequence::new();
        seq.append(mark("one")).unwrap();
        seq.append(mark("two")).unwrap();
        seq.append(mark("three")).unwrap();
        seq.replace(
            "two",
            Step::new("two", |log: &mut Log| {
                log.push("replacement");
                Ok(())
            }),
        )
        .unwrap();

        let mut log = Log::new();
        seq.execute(&mut log).unwrap();
        assert_eq!(log, vec!["one", "replacement", "three"]);
    }

    #[test]
    fn replace_missing_target_fails() {
        let mut seq = Sequence::<Log>::new();
        assert_eq!(
            seq.replace("gone", mark("gone")).unwrap_err(),
            SequenceError::StepNotFound("gone".to_string())
        );
    }

    #[test]
    fn wrapping_preserves_the_inner_step_exactly_once() {
        let mut seq = Sequence::new();
        seq.append(mark("work")).unwrap();
        seq.wrap("work", |inner| {
            Step::new("work", move |log: &mut Log| {
                log.push("before");
                inner.run(log)?;
                log.push("after");
                Ok(())
            })
        })
        .unwrap();

        let mut log = Log::new();
        seq.execute(&mut log).unwrap();
        assert_eq!(log, vec!["before", "work", "after"]);
    }

    #[test]
    fn execution_stops_at_the_failing_step() {
        let mut seq = Sequence::new();
        seq.append(mark("good")).unwrap();
        seq.append(Step::new("bad", |_: &mut Log| {
            Err(crate::arm::ArmError::TransferFault.into())
        }))
        .unwrap();
        seq.append(mark("unreached")).unwrap();

        let mut log = Log::new();
        let err = seq.execute(&mut log).unwrap_err();
        assert_eq!(log, vec!["good"]);
        match err {
            Error::Step { step, .. } => assert_eq!(step, "bad"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
