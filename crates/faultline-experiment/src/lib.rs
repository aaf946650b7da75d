//! Declarative chaos experiments.
//!
//! An experiment template names a set of actions (fault injections, waits,
//! alarm assertions), the resources they target, the order they run in and the
//! alarms that abort the run. This crate validates templates, builds their
//! action graph, resolves targets to concrete resources and executes the
//! actions under a stop-condition monitor.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   render    ┌───────────┐  validate  ┌───────────────────┐
//! │   template   │ ──────────▶ │ template  │ ─────────▶ │ ValidatedTemplate │
//! │ (json/yaml)  │  RenderVars │           │  Validator │  + ActionGraph    │
//! └──────────────┘             └───────────┘            └─────────┬─────────┘
//!                                                                 │ run
//!                   ┌──────────────────────────────────────────────▼─────────┐
//!                   │  ExperimentExecutor                                    │
//!                   │  - TargetResolver   (ResourceInventory)                │
//!                   │  - ActionRegistry   (ActionHandler per actionId)       │
//!                   │  - StopConditionMonitor (AlarmSource per source id)    │
//!                   └──────────────────────────────┬─────────────────────────┘
//!                                                  ▼
//!                                              RunReport
//! ```

pub mod alarm;
pub mod builtin;
pub mod error;
pub mod executor;
pub mod graph;
pub mod loader;
pub mod monitor;
pub mod registry;
pub mod render;
pub mod run;
pub mod selection;
pub mod target;
pub mod template;
pub mod validate;

pub use alarm::{AlarmError, AlarmSource, AlarmState, InMemoryAlarms, parse_alarm_states};
pub use builtin::parse_iso8601_duration;
pub use error::{ExperimentError, GraphError, Result, ValidationError, ValidationErrors};
pub use executor::{ExecutorConfig, ExperimentExecutor};
pub use graph::ActionGraph;
pub use loader::{LoadEvent, TemplateLoader};
pub use monitor::{AlarmSources, ConditionStatus, StopConditionMonitor};
pub use registry::{
    ActionContext, ActionFailure, ActionHandler, ActionKind, ActionRegistry, ParamCheck,
};
pub use render::RenderVars;
pub use run::{
    ActionOutcome, ActionState, ExperimentRun, FailureCause, RunReport, RunState, SkipReason,
    StopTrigger,
};
pub use selection::SelectionMode;
pub use target::{
    InMemoryInventory, InventoryError, ResourceInventory, ResourceRecord, TargetResolution,
    TargetResolver,
};
pub use template::{
    AccountTargeting, Action, EmptyTargetResolutionMode, ExperimentOptions, ExperimentTemplate,
    Filter, STOP_CONDITION_NONE, StopCondition, TargetSpec, TemplateFormat,
};
pub use validate::{ValidatedTemplate, Validator};
