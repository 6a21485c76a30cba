//! Errors generated by the compiler.
use thiserror::Error as ThisError;

/// Convinience wrapper to represent success or meaningul compiler error.
pub type RedstoneResult<T> = std::result::Result<T, Error>;

/// The category of a compiler error. Every pass aborts entirely when it
/// produces one of these; none of them are recovered inside the pipeline.
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An operand was not defined earlier in the same block.
    #[error("undefined value reference")]
    UndefinedValueReference,
    /// The scheduler was asked for an objective it does not implement.
    #[error("unsupported scheduling objective")]
    UnsupportedSchedulingObjective,
    /// The solver reported an infeasible or otherwise non-optimal program.
    #[error("scheduling infeasible")]
    SchedulingInfeasible,
    /// Lowering was requested on a block that is not fully scheduled.
    #[error("lowering precondition violated")]
    LoweringPreconditionViolation,
    /// Lowering was requested on a multi-block or non-top-level function.
    #[error("unsupported function shape")]
    UnsupportedFunctionShape,
    /// A reserved value kind (such as `phi`) reached lowering.
    #[error("unhandled value kind")]
    UnhandledValueKind,
    /// Time relations contradict each other before any scheduling happens.
    #[error("conflicting time relation")]
    ConflictingTimeRelation,
    /// The program was built in a way the compiler does not accept.
    #[error("malformed program")]
    Malformed,
    /// Miscellaneous error message.
    #[error("error")]
    Misc,
}

/// Standard error type for Redstone errors.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {msg}")]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn new<S: ToString>(kind: ErrorKind, msg: S) -> Self {
        Self {
            kind,
            msg: msg.to_string(),
        }
    }

    pub fn undefined_value<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::UndefinedValueReference, msg)
    }

    pub fn unsupported_objective<S: ToString>(objective: S) -> Self {
        Self::new(
            ErrorKind::UnsupportedSchedulingObjective,
            format!("`{}' is not a supported objective", objective.to_string()),
        )
    }

    pub fn scheduling_infeasible<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::SchedulingInfeasible, msg)
    }

    pub fn lowering_precondition<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::LoweringPreconditionViolation, msg)
    }

    pub fn unsupported_shape<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::UnsupportedFunctionShape, msg)
    }

    pub fn unhandled_kind<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::UnhandledValueKind, msg)
    }

    pub fn conflicting_time<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::ConflictingTimeRelation, msg)
    }

    pub fn malformed<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::Malformed, msg)
    }

    pub fn misc<S: ToString>(msg: S) -> Self {
        Self::new(ErrorKind::Misc, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::misc(format!("IO Error: {e}"))
    }
}

impl From<std::fmt::Error> for Error {
    fn from(_: std::fmt::Error) -> Self {
        Error::misc("failed to write formatted output")
    }
}
