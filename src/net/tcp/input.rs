/// TCP input path: demultiplexing and the per-state segment handling.
use crate::net::buffer::NetBuf;
use crate::net::drivers::NetError;
use crate::net::ipv4::{Ipv4Address, Ipv4Layer};

use super::output::Route;
use super::segment::{parse_segment, FlagsDisplay, TcpHeader};
use super::seq::{seq_gt, seq_in_window, seq_le, seq_lt};
use super::socket::{ControlBlock, SocketHandle, TcpSocket};
use super::{TcpLayer, TcpState, TCP_ACK, TCP_FIN, TCP_RST, TCP_SYN};

/// A received segment after parsing.
struct Incoming<'a> {
    src: Ipv4Address,
    dst: Ipv4Address,
    header: TcpHeader,
    data: &'a [u8],
}

/// Notification to deliver once the socket borrow has ended.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Notify {
    Connected,
    DataReady(usize),
    Sent(usize),
    Closed,
}

impl TcpLayer {
    pub(crate) fn input(
        &mut self,
        ip: &mut Ipv4Layer,
        src: Ipv4Address,
        dst: Ipv4Address,
        payload: NetBuf,
    ) -> Result<(), NetError> {
        self.stats.segments_in += 1;

        // TCP is unicast only; a broadcast SYN must not create a connection.
        if ip.is_broadcast(dst) || dst.is_multicast() {
            self.stats.malformed += 1;
            kdebug!("tcp: dropping segment from {} to non-unicast {}", src, dst);
            return Err(NetError::InvalidPacket);
        }

        let (header, data) = match parse_segment(src, dst, payload.data()) {
            Ok(parsed) => parsed,
            Err(err) => {
                if err == NetError::ChecksumFailed {
                    self.stats.checksum_failures += 1;
                } else {
                    self.stats.malformed += 1;
                }
                kdebug!("tcp: dropping segment from {}: {}", src, err);
                return Err(err);
            }
        };

        ktrace!(
            "tcp: rx {}:{} -> {}:{} [{}] seq={} ack={} win={} len={}",
            src,
            header.src_port,
            dst,
            header.dst_port,
            FlagsDisplay(header.flags),
            header.seq_num,
            header.ack_num,
            header.window_size,
            data.len()
        );

        let handle = self
            .table
            .find_connection(dst, header.dst_port, src, header.src_port)
            .or_else(|| self.table.find_listener(dst, header.dst_port));
        let Some(handle) = handle else {
            self.stats.rx_unmatched += 1;
            kdebug!(
                "tcp: no socket for {}:{} -> {}:{} [{}], dropped",
                src,
                header.src_port,
                dst,
                header.dst_port,
                FlagsDisplay(header.flags)
            );
            return Ok(());
        };

        let segment = Incoming {
            src,
            dst,
            header,
            data,
        };
        match self.socket_ref(handle)?.state {
            TcpState::Closed => Ok(()),
            TcpState::Listen => self.listen_input(ip, handle, &segment),
            TcpState::SynSent => self.syn_sent_input(ip, handle, &segment),
            _ => self.synchronized_input(ip, handle, &segment),
        }
    }

    /// Passive open: a SYN on a listener spawns a SYN_RECEIVED child.
    fn listen_input(
        &mut self,
        ip: &mut Ipv4Layer,
        listener: SocketHandle,
        seg: &Incoming<'_>,
    ) -> Result<(), NetError> {
        let hdr = &seg.header;
        if hdr.has(TCP_RST) {
            return Ok(());
        }
        if hdr.has(TCP_ACK) || !hdr.has(TCP_SYN) {
            self.stats.rx_unmatched += 1;
            kdebug!(
                "tcp: {} ignoring [{}] from {}:{}",
                listener,
                FlagsDisplay(hdr.flags),
                seg.src,
                hdr.src_port
            );
            return Ok(());
        }

        let parent = self.socket_ref(listener)?;
        let events = parent.events.clone();
        if parent.listener.as_ref().map_or(true, |l| l.is_full()) {
            self.stats.backlog_drops += 1;
            kdebug!(
                "tcp: {} backlog full, dropping SYN from {}:{}",
                listener,
                seg.src,
                hdr.src_port
            );
            return Err(NetError::BacklogFull);
        }

        let iss = self.next_iss();
        let mut child = TcpSocket::new(seg.dst, hdr.dst_port, events);
        child.state = TcpState::SynReceived;
        child.remote_addr = seg.src;
        child.remote_port = hdr.src_port;
        child.parent = Some(listener);
        child.cb = ControlBlock::new(iss);
        child.cb.irs = hdr.seq_num;
        child.cb.rcv_nxt = hdr.seq_num.wrapping_add(1);
        child.cb.snd_wnd = hdr.window_size;

        let child_handle = match self.table.insert(child) {
            Ok(handle) => handle,
            Err(err) => {
                kwarn!("tcp: socket table full, dropping SYN from {}:{}", seg.src, hdr.src_port);
                return Err(err);
            }
        };
        if let Some(queue) = self.table.get_mut(listener).and_then(|s| s.listener.as_mut()) {
            queue.queue.push_back(child_handle);
        }

        kdebug!(
            "tcp: {} SYN from {}:{}, child {} iss={}",
            listener,
            seg.src,
            hdr.src_port,
            child_handle,
            iss
        );
        self.send_segment(ip, child_handle, TCP_SYN | TCP_ACK, &[])
    }

    fn syn_sent_input(
        &mut self,
        ip: &mut Ipv4Layer,
        handle: SocketHandle,
        seg: &Incoming<'_>,
    ) -> Result<(), NetError> {
        let hdr = &seg.header;
        let socket = self.socket_ref(handle)?;
        let snd_nxt = socket.cb.snd_nxt;
        let route = Route::of(socket);

        if hdr.has(TCP_RST) {
            kdebug!("tcp: {} connection refused by {}:{}", handle, seg.src, hdr.src_port);
            self.force_close(handle, true);
            return Ok(());
        }

        if hdr.has(TCP_SYN) && hdr.has(TCP_ACK) {
            if hdr.ack_num != snd_nxt {
                kdebug!("tcp: {} SYN|ACK acks {} (expected {})", handle, hdr.ack_num, snd_nxt);
                self.send_reset(ip, &route, hdr.ack_num, None);
                return Ok(());
            }

            let socket = self.socket_mut(handle)?;
            socket.cb.irs = hdr.seq_num;
            socket.cb.rcv_nxt = hdr.seq_num.wrapping_add(1);
            socket.cb.snd_una = hdr.ack_num;
            socket.cb.snd_wnd = hdr.window_size;
            socket.cb.rtx_timer_ms = None;
            socket.cb.reset_backoff();
            socket.rtx_queue.clear();
            socket.state = TcpState::Established;
            kdebug!("tcp: {} established with {}:{}", handle, seg.src, hdr.src_port);

            self.send_ack(ip, handle)?;
            self.notify(handle, Notify::Connected);
            return self.receive_data(
                ip,
                handle,
                hdr.seq_num.wrapping_add(1),
                seg.data,
                hdr.has(TCP_FIN),
            );
        }

        if hdr.has(TCP_SYN) {
            // Simultaneous open: answer with SYN|ACK reusing our ISS.
            let socket = self.socket_mut(handle)?;
            socket.cb.irs = hdr.seq_num;
            socket.cb.rcv_nxt = hdr.seq_num.wrapping_add(1);
            socket.cb.snd_wnd = hdr.window_size;
            socket.cb.snd_nxt = socket.cb.iss;
            socket.cb.rtx_timer_ms = None;
            socket.rtx_queue.clear();
            socket.state = TcpState::SynReceived;
            kdebug!("tcp: {} simultaneous open with {}:{}", handle, seg.src, hdr.src_port);
            return self.send_segment(ip, handle, TCP_SYN | TCP_ACK, &[]);
        }

        if hdr.has(TCP_ACK) {
            kdebug!("tcp: {} ACK without SYN while connecting, resetting", handle);
            self.send_reset(ip, &route, hdr.ack_num, None);
            self.force_close(handle, true);
        }
        Ok(())
    }

    fn synchronized_input(
        &mut self,
        ip: &mut Ipv4Layer,
        handle: SocketHandle,
        seg: &Incoming<'_>,
    ) -> Result<(), NetError> {
        let hdr = &seg.header;
        let socket = self.socket_ref(handle)?;
        let state = socket.state;
        let irs = socket.cb.irs;
        let snd_nxt = socket.cb.snd_nxt;

        if hdr.has(TCP_RST) {
            kdebug!("tcp: {} reset by peer in {}", handle, state);
            self.force_close(handle, true);
            return Ok(());
        }

        let mut seq = hdr.seq_num;
        if hdr.has(TCP_SYN) {
            if state != TcpState::SynReceived {
                // Our final handshake ACK was probably lost.
                return self.send_ack(ip, handle);
            }
            if !hdr.has(TCP_ACK) {
                if hdr.seq_num == irs {
                    ktrace!("tcp: {} duplicate SYN, resending SYN|ACK", handle);
                    return self.retransmit_oldest(ip, handle);
                }
                return Ok(());
            }
            seq = seq.wrapping_add(1);
        }

        if !hdr.has(TCP_ACK) {
            return Ok(());
        }

        if state == TcpState::SynReceived {
            if hdr.ack_num != snd_nxt {
                kdebug!("tcp: {} handshake ACK {} (expected {}), dropped", handle, hdr.ack_num, snd_nxt);
                return Ok(());
            }
            let socket = self.socket_mut(handle)?;
            socket.cb.snd_una = hdr.ack_num;
            socket.cb.snd_wnd = hdr.window_size;
            socket.cb.rtx_timer_ms = None;
            socket.cb.reset_backoff();
            socket.rtx_queue.clear();
            socket.state = TcpState::Established;
            kdebug!("tcp: {} established with {}:{}", handle, seg.src, hdr.src_port);
            self.notify(handle, Notify::Connected);
        } else {
            self.process_ack(handle, hdr)?;
            if self.table.get(handle).is_none() {
                return Ok(());
            }
        }

        self.receive_data(ip, handle, seq, seg.data, hdr.has(TCP_FIN))?;
        if self.table.get(handle).is_some() {
            self.flush(ip, handle)?;
        }
        Ok(())
    }

    /// Release acknowledged data and advance the close handshake.
    fn process_ack(&mut self, handle: SocketHandle, hdr: &TcpHeader) -> Result<(), NetError> {
        let socket = self.socket_mut(handle)?;
        let ack = hdr.ack_num;

        if !seq_in_window(ack, socket.cb.snd_una, socket.cb.snd_nxt) {
            if ack == socket.cb.snd_una {
                socket.cb.snd_wnd = hdr.window_size;
                // Probe answered with the window still shut; the RTO keeps
                // its backoff but the retry count starts over.
                if hdr.window_size == 0 && !socket.rtx_queue.is_empty() {
                    socket.cb.attempts = 0;
                }
            } else {
                ktrace!(
                    "tcp: {} ignoring ack {} outside {}..={}",
                    handle,
                    ack,
                    socket.cb.snd_una,
                    socket.cb.snd_nxt
                );
            }
            return Ok(());
        }

        let mut acked_bytes = 0usize;
        while let Some(front) = socket.rtx_queue.front_mut() {
            if seq_le(front.end(), ack) {
                acked_bytes += front.payload.len();
                socket.rtx_queue.pop_front();
                continue;
            }
            if seq_gt(ack, front.seq) {
                let mut covered = ack.wrapping_sub(front.seq) as usize;
                if front.flags & TCP_SYN != 0 {
                    covered -= 1;
                    front.flags &= !TCP_SYN;
                }
                let covered = covered.min(front.payload.len());
                front.payload.drain(..covered);
                front.seq = ack;
                acked_bytes += covered;
            }
            break;
        }

        socket.cb.snd_una = ack;
        socket.cb.snd_wnd = hdr.window_size;
        socket.cb.reset_backoff();
        socket.cb.rtx_timer_ms = if socket.rtx_queue.is_empty() {
            None
        } else {
            Some(socket.cb.rto)
        };

        let state = socket.state;
        let fin_acked = socket.fin_acked();
        if acked_bytes > 0 {
            self.notify(handle, Notify::Sent(acked_bytes));
        }
        if !fin_acked {
            return Ok(());
        }

        match state {
            TcpState::FinWait1 => {
                self.socket_mut(handle)?.state = TcpState::FinWait2;
                kdebug!("tcp: {} FIN acknowledged, FIN_WAIT_2", handle);
            }
            TcpState::Closing => self.enter_time_wait(handle),
            TcpState::LastAck => {
                kdebug!("tcp: {} LAST_ACK complete", handle);
                self.force_close(handle, true);
            }
            _ => {}
        }
        Ok(())
    }

    /// Accept in-order payload and the peer's FIN. Data starting beyond
    /// `rcv_nxt` is not buffered; the peer gets a duplicate ACK instead.
    fn receive_data(
        &mut self,
        ip: &mut Ipv4Layer,
        handle: SocketHandle,
        seq: u32,
        data: &[u8],
        fin: bool,
    ) -> Result<(), NetError> {
        let socket = self.socket_mut(handle)?;
        let state = socket.state;
        let rcv_nxt = socket.cb.rcv_nxt;
        let end = seq.wrapping_add(data.len() as u32);

        if !matches!(
            state,
            TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2
        ) {
            // The peer's FIN is already consumed; re-ACK a retransmission.
            if fin && end.wrapping_add(1) == rcv_nxt {
                if state == TcpState::TimeWait {
                    let now = self.clock_ms;
                    self.table.start_time_wait(handle, now);
                }
                return self.send_ack(ip, handle);
            }
            return Ok(());
        }

        if seq_gt(seq, rcv_nxt) {
            if !data.is_empty() || fin {
                self.stats.out_of_order += 1;
                ktrace!("tcp: {} out-of-order seq={} (expected {})", handle, seq, rcv_nxt);
                return self.send_ack(ip, handle);
            }
            return Ok(());
        }

        let mut need_ack = false;
        let mut readable = None;

        if !data.is_empty() {
            if seq_le(end, rcv_nxt) {
                self.stats.duplicates += 1;
                need_ack = true;
            } else {
                let skip = if seq_lt(seq, rcv_nxt) {
                    rcv_nxt.wrapping_sub(seq) as usize
                } else {
                    0
                };
                let fresh = &data[skip..];
                if socket.rx.write_all(fresh).is_err() {
                    self.stats.rx_overflow += 1;
                    kdebug!("tcp: {} receive buffer full, dropping {} bytes", handle, fresh.len());
                    return self.send_ack(ip, handle);
                }
                socket.cb.rcv_nxt = rcv_nxt.wrapping_add(fresh.len() as u32);
                readable = Some(socket.rx.available());
                need_ack = true;
            }
        }

        let mut next_state = state;
        if fin {
            let socket = self.socket_mut(handle)?;
            if end == socket.cb.rcv_nxt {
                socket.cb.rcv_nxt = end.wrapping_add(1);
                next_state = match state {
                    TcpState::Established => TcpState::CloseWait,
                    TcpState::FinWait1 => TcpState::Closing,
                    _ => TcpState::TimeWait,
                };
                socket.state = next_state;
                need_ack = true;
                kdebug!("tcp: {} peer FIN, {} -> {}", handle, state, next_state);
            }
        }

        if need_ack {
            self.send_ack(ip, handle)?;
        }
        if let Some(available) = readable {
            self.notify(handle, Notify::DataReady(available));
        }
        if next_state != state {
            match next_state {
                TcpState::CloseWait => self.notify(handle, Notify::Closed),
                TcpState::TimeWait => self.enter_time_wait(handle),
                _ => {}
            }
        }
        Ok(())
    }

    /// Park a socket in TIME-WAIT, or free it at once when no tracker is left.
    pub(crate) fn enter_time_wait(&mut self, handle: SocketHandle) {
        if let Some(socket) = self.table.get_mut(handle) {
            socket.state = TcpState::TimeWait;
            socket.rtx_queue.clear();
            socket.cb.rtx_timer_ms = None;
        }
        let now = self.clock_ms;
        if !self.table.start_time_wait(handle, now) {
            kwarn!("tcp: no TIME-WAIT slot for {}, releasing early", handle);
            self.release(handle);
        }
    }

    /// Move a socket to CLOSED and free its slot.
    pub(crate) fn force_close(&mut self, handle: SocketHandle, notify: bool) {
        let events = match self.table.get_mut(handle) {
            Some(socket) => {
                socket.state = TcpState::Closed;
                socket.events.clone()
            }
            None => return,
        };
        self.release(handle);
        if notify {
            events.closed(handle);
        }
    }

    /// Free a slot and unlink it from its listener's accept queue.
    pub(crate) fn release(&mut self, handle: SocketHandle) {
        let Some(socket) = self.table.remove(handle) else {
            return;
        };
        if let Some(parent) = socket.parent {
            if let Some(listener) = self.table.get_mut(parent).and_then(|p| p.listener.as_mut()) {
                listener.remove(handle);
            }
        }
        ktrace!("tcp: {} released", handle);
    }

    pub(crate) fn notify(&self, handle: SocketHandle, event: Notify) {
        let Some(socket) = self.table.get(handle) else {
            return;
        };
        let events = socket.events.clone();
        match event {
            Notify::Connected => events.connected(handle),
            Notify::DataReady(available) => events.data_ready(handle, available),
            Notify::Sent(bytes) => events.sent(handle, bytes),
            Notify::Closed => events.closed(handle),
        }
    }
}
