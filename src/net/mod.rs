//! NexaOS Network Stack
//!
//! IPv4 engine with conditionally compiled transports. Use feature flags to
//! enable/disable protocols:
//!
//! - `net_icmp` - ICMP echo responder
//! - `net_udp` - UDP datagram sockets
//! - `net_tcp` - TCP connections
//! - `debug_net` - per-frame trace logging
//!
//! Ethernet, ARP and IPv4 are always built. The functions in this module
//! drive the single global stack; each takes the stack lock with interrupts
//! masked and runs to completion.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use crate::config::NetConfig;
use crate::{arch, logger};

pub mod arp;
pub mod buffer;
pub mod checksum;
pub mod drivers;
pub mod ethernet;
pub mod ipv4;
pub mod protocol;
pub mod ring;
pub mod stack;

#[cfg(feature = "net_icmp")]
pub mod icmp;
#[cfg(not(feature = "net_icmp"))]
pub mod icmp {
    //! ICMP stub module (feature disabled)
}

#[cfg(feature = "net_tcp")]
pub mod tcp;
#[cfg(not(feature = "net_tcp"))]
pub mod tcp {
    //! TCP stub module (feature disabled)
}

#[cfg(feature = "net_udp")]
pub mod udp;
#[cfg(not(feature = "net_udp"))]
pub mod udp {
    //! UDP stub module (feature disabled)
}

pub use drivers::{NetDevice, NetError, TxQueue, TxQueueDevice};
pub use stack::{NetEvent, NetStack};

struct NetState {
    stack: Option<NetStack>,
    frames: u64,
}

impl NetState {
    const fn new() -> Self {
        Self {
            stack: None,
            frames: 0,
        }
    }
}

lazy_static::lazy_static! {
    static ref NET_STATE: Mutex<NetState> = Mutex::new(NetState::new());
}

static NET_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Bring the global stack up from a kernel command line (`net.ip=`,
/// `net.mask=`, `net.gw=`, `net.ttl=`, `loglevel=`). Safe to call more than
/// once; later calls are no-ops.
pub fn init(cmdline: &str, device: Box<dyn NetDevice>) {
    if let Some(level) = logger::parse_level_directive(cmdline) {
        logger::set_max_level(level);
    }
    init_with_config(NetConfig::from_cmdline(cmdline), device);
}

pub fn init_with_config(config: NetConfig, device: Box<dyn NetDevice>) {
    if NET_INITIALIZED.swap(true, Ordering::SeqCst) {
        crate::kdebug!("net: already initialized");
        return;
    }

    let mac = device.mac_address();
    let stack = NetStack::with_device(config, device);
    arch::without_interrupts(|| {
        let mut state = NET_STATE.lock();
        state.stack = Some(stack);
        state.frames = 0;
    });

    crate::kinfo!(
        "net: up {}/{} gw {} mac {}",
        config.address,
        config.netmask,
        config.gateway.unwrap_or(ipv4::Ipv4Address::UNSPECIFIED),
        ethernet::MacAddress::new(mac)
    );
}

/// Tear the global stack down, handing it back to the caller.
pub fn shutdown() -> Option<NetStack> {
    let stack = arch::without_interrupts(|| NET_STATE.lock().stack.take());
    NET_INITIALIZED.store(false, Ordering::SeqCst);
    if stack.is_some() {
        crate::kinfo!("net: down");
    }
    stack
}

pub fn is_initialized() -> bool {
    NET_INITIALIZED.load(Ordering::Relaxed)
}

/// Access the network stack safely. `None` before [`init`].
pub fn with_net_stack<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut NetStack) -> R,
{
    arch::without_interrupts(|| {
        let mut state = NET_STATE.lock();
        state.stack.as_mut().map(f)
    })
}

/// Receive path entry point for the NIC driver.
pub fn handle_frame(frame: &[u8]) {
    let result = arch::without_interrupts(|| {
        let mut state = NET_STATE.lock();
        state.frames += 1;
        state.stack.as_mut().map(|stack| stack.handle_frame(frame))
    });

    match result {
        None => crate::ktrace!("net: frame dropped, stack not initialized"),
        Some(Ok(())) => {}
        Some(Err(err)) => log_rx_error(err, frame.len()),
    }
}

/// Periodic timer hook: advances protocol timers by `elapsed_ms`.
pub fn poll(elapsed_ms: u64) {
    if !is_initialized() {
        return;
    }
    with_net_stack(|stack| stack.tick(elapsed_ms));
}

/// Feed one event to the global stack.
pub fn process(event: NetEvent<'_>) -> Result<(), NetError> {
    with_net_stack(|stack| stack.process(event)).unwrap_or(Err(NetError::NoDevice))
}

/// Frames handed to [`handle_frame`] since [`init`].
pub fn frames_received() -> u64 {
    arch::without_interrupts(|| NET_STATE.lock().frames)
}

fn log_rx_error(err: NetError, len: usize) {
    match err {
        NetError::NotForUs | NetError::ProtocolUnsupported => {
            crate::ktrace!("net: frame ({} bytes) ignored: {}", len, err)
        }
        e if e.is_malformed() => crate::kdebug!("net: malformed frame ({} bytes): {}", len, e),
        e => crate::kwarn!("net: frame processing failed ({} bytes): {}", len, e),
    }
}
