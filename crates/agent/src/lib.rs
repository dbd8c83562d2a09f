// Kubecc Agent
//
// Compiles preprocessed sources on behalf of consumers on other hosts.
//
// Key design decisions:
// - Toolchains are matched by equivalence, never by the consumer's path
// - A full queue answers with a retry hint so the scheduler can pick another agent

mod agent;
pub mod config;
pub mod error;

pub use agent::Agent;
pub use config::{load_dotenv, AgentConfig};
pub use error::{AgentError, ConfigError};
