//! Business logic services (use cases).
//!
//! Services orchestrate store calls, authority exchanges, and population
//! rules. They depend on traits (ports) -- never on concrete infrastructure
//! implementations.

pub mod hash;
pub mod pool;
