/// TCP timers: retransmission with exponential backoff and TIME-WAIT expiry.
use crate::net::ipv4::Ipv4Layer;

use super::{TcpLayer, TcpState, TCP_MAX_RETRANSMITS, TCP_MAX_RTO_MS};

impl TcpLayer {
    /// Advance the TCP clock by `elapsed_ms` and run every due timer.
    pub(crate) fn tick(&mut self, ip: &mut Ipv4Layer, elapsed_ms: u64) {
        self.clock_ms = self.clock_ms.saturating_add(elapsed_ms);

        for handle in self.table.expired_time_waits(self.clock_ms) {
            kdebug!("tcp: {} TIME_WAIT expired", handle);
            self.force_close(handle, false);
        }

        for handle in self.table.handles() {
            let Some(socket) = self.table.get_mut(handle) else {
                continue;
            };
            let Some(remaining) = socket.cb.rtx_timer_ms else {
                continue;
            };
            if remaining > elapsed_ms {
                socket.cb.rtx_timer_ms = Some(remaining - elapsed_ms);
                continue;
            }
            if socket.rtx_queue.is_empty() {
                socket.cb.rtx_timer_ms = None;
                continue;
            }

            socket.cb.attempts += 1;
            socket.cb.rto = socket.cb.rto.saturating_mul(2).min(TCP_MAX_RTO_MS);
            if socket.cb.attempts > TCP_MAX_RETRANSMITS {
                kwarn!(
                    "tcp: {} giving up on {}:{} in {} after {} retransmissions",
                    handle,
                    socket.remote_addr,
                    socket.remote_port,
                    socket.state,
                    TCP_MAX_RETRANSMITS
                );
                self.stats.timeouts += 1;
                // A child still in the handshake has no user to notify.
                let notify = socket.state != TcpState::SynReceived || socket.parent.is_none();
                self.force_close(handle, notify);
                continue;
            }

            socket.cb.rtx_timer_ms = Some(socket.cb.rto);
            kdebug!(
                "tcp: {} retransmit #{} rto={}ms",
                handle,
                socket.cb.attempts,
                socket.cb.rto
            );
            if let Err(err) = self.retransmit_oldest(ip, handle) {
                kdebug!("tcp: {} retransmit failed: {}", handle, err);
            }
        }
    }
}
