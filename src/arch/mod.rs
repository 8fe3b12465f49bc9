//! Architecture hooks used by the network engine
//!
//! The engine assumes run-to-completion processing. When the frame path and
//! the timer path can interrupt each other, every top-level entry point runs
//! inside [`without_interrupts`] while it holds the global stack lock.

/// Execute `f` with interrupts disabled, then restore the previous state.
///
/// On bare-metal x86_64 this masks interrupts with `cli`/`sti` through the
/// `x86_64` crate. Hosted builds (unit tests, user-space simulation) cannot
/// execute privileged instructions and run `f` directly.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[inline]
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    x86_64::instructions::interrupts::without_interrupts(f)
}

/// Execute `f` directly; hosted targets have no interrupt flag to mask.
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
#[inline]
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

