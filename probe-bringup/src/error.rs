use crate::arm::ArmError;
use crate::sequencer::SequenceError;

/// The overall error type of this crate.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum Error {
    /// An ARM specific error occurred.
    Arm(#[from] ArmError),

    /// Bring-up step `{step}` failed.
    Step {
        /// The name of the failing step.
        step: &'static str,
        /// The failure the step reported.
        #[source]
        source: Box<Error>,
    },

    /// The bring-up sequence could not be assembled.
    Sequence(#[from] SequenceError),

    /// Core {0} does not exist.
    CoreNotFound(usize),

    /// Some uncategorized error occurred.
    Other(#[from] anyhow::Error),
}
