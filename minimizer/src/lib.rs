pub mod config;
pub mod content;
pub mod debugger;
pub mod distance;
pub mod engine;
pub mod error;
pub mod probability;
pub mod progress;
pub mod signature;
pub mod target;

pub use crate::config::MinimizerConfig;
pub use content::{ArchiveEntry, ArchiveMap, ContentCodec};
pub use debugger::{CommandDebugger, CrashSignature, DebugResult, Debugger};
pub use distance::Metric;
pub use engine::{
    Crash, DoneReason, EngineState, MinimizationEngine, MinimizationReport, OtherCrash,
    Termination,
};
pub use error::{DebuggerError, MinimizerError};
pub use signature::{CrashSignatureSet, SignatureSampler};
pub use target::TargetMode;
