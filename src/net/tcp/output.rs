/// TCP output path: segment emission, send-buffer flushing, retransmission.
use crate::net::drivers::NetError;
use crate::net::ipv4::{Ipv4Address, Ipv4Layer};

use super::segment::{build_segment, seg_len, FlagsDisplay, TcpHeader};
use super::socket::{RtxSegment, SocketHandle, TcpSocket};
use super::{segment_scratch, TcpLayer, TcpState, PROTO_TCP, TCP_ACK, TCP_FIN, TCP_PSH};

/// Addressing of one connection, copied out so the socket borrow can end
/// before the IP layer is called.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Route {
    pub local_addr: Ipv4Address,
    pub local_port: u16,
    pub remote_addr: Ipv4Address,
    pub remote_port: u16,
}

impl Route {
    pub fn of(socket: &TcpSocket) -> Self {
        Self {
            local_addr: socket.local_addr,
            local_port: socket.local_port,
            remote_addr: socket.remote_addr,
            remote_port: socket.remote_port,
        }
    }
}

impl TcpLayer {
    /// Build and hand one segment to IP. Transmit failures are treated as
    /// segment loss and left to the retransmission timer.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn transmit(
        &mut self,
        ip: &mut Ipv4Layer,
        route: &Route,
        seq: u32,
        ack: u32,
        flags: u8,
        window: u16,
        payload: &[u8],
    ) {
        let header = TcpHeader::new(route.local_port, route.remote_port, seq, ack, flags, window);
        let buf = build_segment(route.local_addr, route.remote_addr, &header, payload);

        ktrace!(
            "tcp: tx {}:{} -> {}:{} [{}] seq={} ack={} win={} len={}",
            route.local_addr,
            route.local_port,
            route.remote_addr,
            route.remote_port,
            FlagsDisplay(flags),
            seq,
            ack,
            window,
            payload.len()
        );

        let ttl = ip.default_ttl();
        match ip.send(buf, route.remote_addr, PROTO_TCP, ttl) {
            Ok(()) => self.stats.segments_out += 1,
            Err(err) => {
                self.stats.tx_errors += 1;
                kdebug!("tcp: transmit to {} failed: {}", route.remote_addr, err);
            }
        }
    }

    /// Send a segment at `snd_nxt`, acknowledging `rcv_nxt` when ACK is set.
    /// Anything occupying sequence space is queued for retransmission.
    pub(crate) fn send_segment(
        &mut self,
        ip: &mut Ipv4Layer,
        handle: SocketHandle,
        flags: u8,
        payload: &[u8],
    ) -> Result<(), NetError> {
        let socket = self.socket_mut(handle)?;
        socket.update_rcv_wnd();
        let seq = socket.cb.snd_nxt;
        let ack = if flags & TCP_ACK != 0 {
            socket.cb.rcv_nxt
        } else {
            0
        };
        let window = socket.cb.rcv_wnd;

        let len = seg_len(flags, payload.len());
        if len > 0 {
            socket.cb.snd_nxt = seq.wrapping_add(len);
            socket.rtx_queue.push_back(RtxSegment {
                seq,
                flags,
                payload: payload.to_vec(),
            });
            if socket.cb.rtx_timer_ms.is_none() {
                socket.cb.rtx_timer_ms = Some(socket.cb.rto);
            }
        }
        if flags & TCP_FIN != 0 {
            socket.fin_sent = true;
        }

        let route = Route::of(socket);
        self.transmit(ip, &route, seq, ack, flags, window, payload);
        Ok(())
    }

    pub(crate) fn send_ack(&mut self, ip: &mut Ipv4Layer, handle: SocketHandle) -> Result<(), NetError> {
        self.send_segment(ip, handle, TCP_ACK, &[])
    }

    /// RST carrying `seq`, with ACK set when `ack` is given.
    pub(crate) fn send_reset(&mut self, ip: &mut Ipv4Layer, route: &Route, seq: u32, ack: Option<u32>) {
        let (flags, ack) = match ack {
            Some(ack) => (super::TCP_RST | TCP_ACK, ack),
            None => (super::TCP_RST, 0),
        };
        self.stats.resets_sent += 1;
        self.transmit(ip, route, seq, ack, flags, 0, &[]);
    }

    /// Push buffered user data out within the peer's window, then the FIN
    /// once the buffer has drained after `close`.
    pub(crate) fn flush(&mut self, ip: &mut Ipv4Layer, handle: SocketHandle) -> Result<(), NetError> {
        loop {
            let socket = self.socket_mut(handle)?;
            let sending = matches!(
                socket.state,
                TcpState::Established
                    | TcpState::CloseWait
                    | TcpState::FinWait1
                    | TcpState::Closing
                    | TcpState::LastAck
            );
            if !sending || socket.tx.is_empty() || socket.fin_sent {
                break;
            }

            let in_flight = socket.cb.in_flight() as usize;
            let window = socket.cb.snd_wnd as usize;
            // Zero window: probe with a single byte when nothing is outstanding.
            let room = match window {
                0 if in_flight == 0 => 1,
                _ => window.saturating_sub(in_flight),
            };
            let count = room
                .min(socket.cb.mss as usize)
                .min(socket.tx.available());
            if count == 0 {
                break;
            }

            let mut chunk = segment_scratch(count);
            socket.tx.read(&mut chunk);
            self.send_segment(ip, handle, TCP_ACK | TCP_PSH, &chunk)?;
        }

        let socket = self.socket_mut(handle)?;
        let closing = matches!(
            socket.state,
            TcpState::FinWait1 | TcpState::Closing | TcpState::LastAck
        );
        if closing && socket.fin_pending && socket.tx.is_empty() {
            socket.fin_pending = false;
            kdebug!("tcp: {} sending FIN in {}", handle, socket.state);
            self.send_segment(ip, handle, TCP_FIN | TCP_ACK, &[])?;
        }
        Ok(())
    }

    /// Resend the oldest unacknowledged segment as it was first sent, with
    /// a current ACK and window.
    pub(crate) fn retransmit_oldest(
        &mut self,
        ip: &mut Ipv4Layer,
        handle: SocketHandle,
    ) -> Result<(), NetError> {
        let socket = self.socket_mut(handle)?;
        let Some(segment) = socket.rtx_queue.front().cloned() else {
            return Ok(());
        };
        socket.update_rcv_wnd();
        let ack = if segment.flags & TCP_ACK != 0 {
            socket.cb.rcv_nxt
        } else {
            0
        };
        let window = socket.cb.rcv_wnd;
        let route = Route::of(socket);

        self.stats.retransmits += 1;
        self.transmit(ip, &route, segment.seq, ack, segment.flags, window, &segment.payload);
        Ok(())
    }
}
