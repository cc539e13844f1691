//! One-shot completion events and the scoped wait guard that gates tensor
//! data access.
//!
//! An [`Event`] stands for "the last scheduled operation touching some tensor
//! has finished". It carries no value: callers that need data inspect the
//! tensor handle only after a successful wait. [`EventGuard`] performs the
//! wait and doubles as the receipt that tensor accessors demand, so code
//! cannot reach device memory without having synchronized first.

mod event;
mod guard;

pub use event::Event;
pub use guard::EventGuard;
