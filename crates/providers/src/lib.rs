//! Provider registry and resilience wrappers
//!
//! This crate owns everything between the pipeline and a concrete STT, LLM,
//! or TTS vendor:
//! - A process-global registry mapping `(port kind, provider name)` to a
//!   factory; populated once at startup, read-only afterwards
//! - Per-provider circuit breakers and ordered primary/fallback wrappers
//! - Built-in loopback/scripted providers so the pipeline runs end to end
//!   without vendor credentials (dev, demos, tests)

pub mod breaker;
pub mod builtin;
pub mod fallback;
pub mod registry;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use builtin::register_builtin_providers;
pub use fallback::{FallbackLlm, FallbackStt, FallbackTts};
pub use registry::{ProviderRegistry, RegistryHandle};
