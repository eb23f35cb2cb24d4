mod compile;
mod config;
mod context;
mod engine;
mod error;
mod events;
mod expr;
mod extract;
mod phases;
mod picker;
mod runner;
mod template;

pub use compile::compile;
pub use config::{
    BasicAuth, CaptureSpec, ConnectSpec, CssIndex, Defaults, LoopCount, LoopSpec, MatchSpec,
    OverSpec, Payload, PayloadOrder, Phase, RequestSpec, Scenario, Script, Selector, Step,
    ThinkSpec, VariableSpec,
};
pub use context::{Context, FuncMap, FunctionHook, GeneratorFn, PayloadReader, SessionFactory};
pub use engine::{
    EngineRegistry, Pipeline, ProtocolEngine, StepFn, StepFuture, StepOptions, boxed_step,
};
pub use error::{Error, HookError, Result, StepError, StepResult};
pub use events::{EventFn, EventSink, PendingCounters, RunEvent};
pub use expr::{Env, eval, values_equal};
pub use extract::{Extraction, MatchOutcome, ResponseView, capture_or_match};
pub use phases::{PhaseEvent, Phaser};
pub use picker::WeightedPicker;
pub use runner::run;
pub use template::{resolve, resolve_str};
pub use volley_metrics::{
    CustomStatReport, DistributionReport, Report, RpsReport, SessionStats, StatsSnapshot,
};
pub use volley_value::{ObjectMap, Value};
