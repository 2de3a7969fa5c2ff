//! Domain model: ids, devices, capabilities, context keys, records and their state, outcomes, errors.

pub mod capability;
pub mod command;
pub mod context;
pub mod device;
pub mod errors;
pub mod ids;
pub mod interaction;
pub mod outcome;
pub mod state;

pub use capability::{ArgumentError, OperationSpec, ParamKind, ParamSpec};
pub use command::ResolvedCommand;
pub use context::{ContextKey, Cue, TimeBucket};
pub use device::{Arguments, Device, DeviceId, DeviceKind, StateMap, Target};
pub use errors::{ErrorKind, HomeError};
pub use ids::RecordId;
pub use interaction::{
    Feedback, FeedbackSignal, InteractionRecord, LearnedParameter, LearningSample, NewInteraction,
    RecordOutcome, RecordStatus,
};
pub use outcome::{ApplyReport, DispatchResult, ErrorReport, OutcomeKind, TargetOutcome};
pub use state::RecordState;
