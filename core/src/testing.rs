//! The verification engine: run programs under limits and judge what they
//! print.

pub mod batch;
pub mod cancel;
pub mod case;
pub mod checker;
pub mod command;
pub mod compare;
pub mod error;
pub mod generate;
mod memory;
pub mod pool;
pub mod process;
pub mod qa;
pub mod reactive;
pub mod report;
pub mod stress;
pub mod validator;
pub mod verdict;

pub use batch::{BatchJudge, Judge};
pub use cancel::CancelToken;
pub use case::{CaseFormat, CaseRepository, Testcase};
pub use checker::{Checker, Judgement, Matcher};
pub use command::{shell_quote, CommandLine};
pub use compare::{compare, CompareMode, Comparison};
pub use error::{Error, ErrorKind, Result};
pub use generate::{CaseGenerator, GenerationReport};
pub use pool::{CaseRunnerPool, PoolEvent};
pub use process::{ExecutionResult, Limits, ProcessRunner, Termination};
pub use qa::{run_qa, QaObserver, QaPlan, QaReport, StageKind, StageOutcome, StageReport};
pub use reactive::ReactiveJudge;
pub use report::{Abort, JudgeReport};
pub use stress::{materialize, Divergence, Materialized, Oracle, StressSession, StressTester};
pub use validator::{discover_validators, InputValidator, ValidationReport, ValidationResult};
pub use verdict::{CaseResult, Verdict};
