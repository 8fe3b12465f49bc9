//! TCP retransmission timers
//!
//! Timeout-driven resends with exponential backoff, backoff reset on a
//! fresh ACK, and abandoning a connection after the retry limit.

#[cfg(test)]
mod tests {
    use crate::mock::link::B_IP;
    use crate::mock::peer::tcp_segments;
    use crate::mock::session::Session;
    use crate::mock::{capture_stack, Link, RecordingEvents, PEER_IP};
    use nexa_net::net::ipv4::Ipv4Address;
    use nexa_net::net::tcp::{
        no_events, TcpState, TCP_ACK, TCP_FIN, TCP_INITIAL_RTO_MS, TCP_MAX_RETRANSMITS,
        TCP_MAX_RTO_MS, TCP_SYN,
    };

    // =========================================================================
    // Data retransmission
    // =========================================================================

    #[test]
    fn test_unacked_data_resent_after_rto() {
        let (mut stack, queue) = capture_stack();
        let (mut session, _listener, child) = Session::open(&mut stack, &queue, 80, no_events());

        stack.tcp().unwrap().send(child, b"data").unwrap();
        let original = session.collect(&queue).remove(0);

        stack.tick(TCP_INITIAL_RTO_MS - 1);
        assert!(queue.is_empty());

        stack.tick(1);
        let resent = tcp_segments(&queue);
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].header.seq_num, original.header.seq_num);
        assert_eq!(resent[0].payload, original.payload);

        let tcp = stack.tcp().unwrap();
        let cb = tcp.control_block(child).unwrap();
        assert_eq!(cb.attempts, 1);
        assert_eq!(cb.rto, 2 * TCP_INITIAL_RTO_MS);
        assert_eq!(cb.rtx_timer_ms, Some(2 * TCP_INITIAL_RTO_MS));
        assert_eq!(tcp.stats().retransmits, 1);
    }

    #[test]
    fn test_backoff_doubles_between_resends() {
        let (mut stack, queue) = capture_stack();
        let (mut session, _listener, child) = Session::open(&mut stack, &queue, 80, no_events());
        stack.tcp().unwrap().send(child, b"data").unwrap();
        session.collect(&queue);

        let mut resend_times = Vec::new();
        let mut now = 0;
        while resend_times.len() < 3 {
            stack.tick(50);
            now += 50;
            if !tcp_segments(&queue).is_empty() {
                resend_times.push(now);
            }
        }
        let first = TCP_INITIAL_RTO_MS;
        assert_eq!(
            resend_times,
            vec![first, first + 2 * first, first + 2 * first + 4 * first]
        );
    }

    #[test]
    fn test_ack_resets_backoff() {
        let (mut stack, queue) = capture_stack();
        let events = RecordingEvents::new();
        let (mut session, _listener, child) = Session::open(&mut stack, &queue, 80, events.shared());

        stack.tcp().unwrap().send(child, b"data").unwrap();
        session.collect(&queue);
        stack.tick(TCP_INITIAL_RTO_MS);
        stack.tick(2 * TCP_INITIAL_RTO_MS);
        assert_eq!(stack.tcp().unwrap().control_block(child).unwrap().attempts, 2);
        queue.drain();

        session.deliver(&mut stack, TCP_ACK, &[]).unwrap();
        let cb = stack.tcp().unwrap().control_block(child).unwrap();
        assert_eq!(cb.attempts, 0);
        assert_eq!(cb.rto, TCP_INITIAL_RTO_MS);
        assert_eq!(cb.rtx_timer_ms, None);
        assert_eq!(events.sent_bytes(), 4);

        // Nothing outstanding: time passes quietly.
        stack.tick(TCP_MAX_RTO_MS);
        assert!(queue.is_empty());
    }

    // =========================================================================
    // Giving up
    // =========================================================================

    #[test]
    fn test_connection_abandoned_after_retry_limit() {
        let (mut stack, queue) = capture_stack();
        let events = RecordingEvents::new();
        let (mut session, _listener, child) = Session::open(&mut stack, &queue, 80, events.shared());
        stack.tcp().unwrap().send(child, b"lost").unwrap();
        session.collect(&queue);

        let mut resent = 0;
        for _ in 0..10_000 {
            if stack.tcp().unwrap().state(child) == TcpState::Closed {
                break;
            }
            stack.tick(100);
            resent += tcp_segments(&queue).len();
        }

        assert_eq!(stack.tcp().unwrap().state(child), TcpState::Closed);
        assert_eq!(resent, TCP_MAX_RETRANSMITS as usize);
        let stats = stack.tcp().unwrap().stats();
        assert_eq!(stats.retransmits, TCP_MAX_RETRANSMITS as u64);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(events.closed_count(), 1);
    }

    #[test]
    fn test_unanswered_syn_abandoned() {
        let (mut stack, queue) = capture_stack();
        let events = RecordingEvents::new();
        let client = {
            let mut tcp = stack.tcp().unwrap();
            let c = tcp.socket(Ipv4Address::UNSPECIFIED, 0, events.shared()).unwrap();
            tcp.connect(c, PEER_IP, 80).unwrap();
            c
        };

        let mut syns = 0;
        for _ in 0..10_000 {
            syns += tcp_segments(&queue).iter().filter(|s| s.has(TCP_SYN)).count();
            if stack.tcp().unwrap().state(client) == TcpState::Closed {
                break;
            }
            stack.tick(250);
        }

        assert_eq!(syns, 1 + TCP_MAX_RETRANSMITS as usize);
        assert_eq!(events.closed_count(), 1);
        assert_eq!(events.connected_count(), 0);
    }

    #[test]
    fn test_half_open_child_dropped_without_callback() {
        let (mut stack, queue) = capture_stack();
        let events = RecordingEvents::new();
        let listener = {
            let mut tcp = stack.tcp().unwrap();
            let l = tcp.socket(Ipv4Address::UNSPECIFIED, 80, events.shared()).unwrap();
            tcp.listen(l, 4).unwrap();
            l
        };
        let mut session = Session::new(41000, 80);
        session.handshake(&mut stack, &queue);
        assert_eq!(stack.tcp().unwrap().pending_connections(listener), Ok(1));

        // The peer never completes the handshake.
        for _ in 0..1000 {
            stack.tick(1000);
        }

        let tcp = stack.tcp().unwrap();
        assert_eq!(tcp.pending_connections(listener), Ok(0));
        assert_eq!(tcp.state(listener), TcpState::Listen);
        assert_eq!(tcp.stats().timeouts, 1);
        assert_eq!(events.closed_count(), 0);
    }

    #[test]
    fn test_lost_fin_resent() {
        let (mut stack, queue) = capture_stack();
        let (mut session, _listener, child) = Session::open(&mut stack, &queue, 80, no_events());

        stack.tcp().unwrap().close(child).unwrap();
        let fin = session.collect(&queue).remove(0);

        stack.tick(TCP_INITIAL_RTO_MS);
        let resent = tcp_segments(&queue);
        assert_eq!(resent.len(), 1);
        assert!(resent[0].has(TCP_FIN));
        assert_eq!(resent[0].header.seq_num, fin.header.seq_num);

        session.deliver(&mut stack, TCP_ACK, &[]).unwrap();
        assert_eq!(stack.tcp().unwrap().state(child), TcpState::FinWait2);
    }

    #[test]
    fn test_zero_window_probing_outlasts_retry_limit() {
        let (mut stack, queue) = capture_stack();
        let (mut session, _listener, child) =
            Session::open_with_window(&mut stack, &queue, 80, no_events(), 0);

        stack.tcp().unwrap().send(child, b"data").unwrap();
        let probe = tcp_segments(&queue);
        assert_eq!(probe.len(), 1);
        assert_eq!(probe[0].payload, b"d".to_vec());

        // Every probe is answered, each time with the window still shut.
        for _ in 0..2 * TCP_MAX_RETRANSMITS {
            let mut resent = Vec::new();
            for _ in 0..1000 {
                stack.tick(500);
                resent = tcp_segments(&queue);
                if !resent.is_empty() {
                    break;
                }
            }
            assert_eq!(resent.len(), 1);
            assert_eq!(resent[0].payload, b"d".to_vec());

            session.deliver(&mut stack, TCP_ACK, &[]).unwrap();
            assert!(queue.is_empty());
            assert_eq!(stack.tcp().unwrap().control_block(child).unwrap().attempts, 0);
        }
        assert_eq!(stack.tcp().unwrap().state(child), TcpState::Established);
        assert_eq!(stack.tcp().unwrap().stats().timeouts, 0);

        // The window opens with the probe byte acknowledged.
        session.local_seq = session.local_seq.wrapping_add(1);
        session.window = 8192;
        session.deliver(&mut stack, TCP_ACK, &[]).unwrap();
        let rest = tcp_segments(&queue);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].payload, b"ata".to_vec());
    }

    // =========================================================================
    // Two stacks
    // =========================================================================

    #[test]
    fn test_transfer_survives_outage() {
        let mut link = Link::new();
        let listener = {
            let mut tcp = link.b.tcp().unwrap();
            let l = tcp.socket(Ipv4Address::UNSPECIFIED, 80, no_events()).unwrap();
            tcp.listen(l, 1).unwrap();
            l
        };
        let client = {
            let mut tcp = link.a.tcp().unwrap();
            let c = tcp.socket(Ipv4Address::UNSPECIFIED, 0, no_events()).unwrap();
            tcp.connect(c, B_IP, 80).unwrap();
            c
        };
        link.pump();
        let server = link.b.tcp().unwrap().accept(listener).unwrap();

        link.cut = true;
        link.a.tcp().unwrap().send(client, b"through the outage").unwrap();
        link.pump();
        link.run_for(TCP_INITIAL_RTO_MS, 100);
        link.cut = false;

        link.run_for(4 * TCP_INITIAL_RTO_MS, 100);
        let mut buf = [0u8; 64];
        let count = link.b.tcp().unwrap().recv(server, &mut buf).unwrap();
        assert_eq!(&buf[..count], b"through the outage");
        assert!(link.a.tcp().unwrap().stats().retransmits >= 2);
    }
}
