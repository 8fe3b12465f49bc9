//! Scenario suites for the network engine
//!
//! Each file holds one `#[cfg(test)] mod tests` and drives real stacks
//! through the mocks in [`crate::mock`].

pub mod checksum;
pub mod global_stack;
#[cfg(feature = "net_tcp")]
pub mod port_alloc;
#[cfg(feature = "net_tcp")]
pub mod tcp_timers;
