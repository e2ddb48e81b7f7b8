//! Analytical task execution: admission, fairness, breakers, resource sampling.

pub mod breaker;
pub mod executor;
pub mod governor;
pub mod registry;
pub mod resources;
pub mod scheduler;

pub use breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerState};
pub use executor::{ExecutionOutput, TaskExecutor};
pub use governor::AdmissionGate;
pub use registry::{AnalyticalUnit, UnitContext, UnitRegistry};
pub use resources::{ResourceMonitor, ResourceSampler, ResourceUsageSnapshot};
pub use scheduler::FairScheduler;
