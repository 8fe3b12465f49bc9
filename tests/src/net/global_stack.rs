//! The process-wide stack behind `net::init`
//!
//! These tests share one global and run one at a time; each starts from
//! `shutdown()` so a failure elsewhere cannot leak state in. Bring-up
//! logging is checked in a forked child so its sink stays private.

#[cfg(test)]
mod tests {
    use rusty_fork::rusty_fork_test;
    use serial_test::serial;

    use crate::mock::{init_logging, Peer, LOCAL_IP, LOCAL_MAC, PEER_IP};
    use nexa_net::logger::{self, LogLevel, LogSink};
    use nexa_net::net::drivers::{TxQueue, TxQueueDevice};
    use nexa_net::net::ipv4::Ipv4Address;
    use nexa_net::net::{self, NetEvent};
    use nexa_net::{NetConfig, NetError};

    fn device() -> (Box<TxQueueDevice>, TxQueue) {
        let (device, queue) = TxQueueDevice::new(*LOCAL_MAC.as_bytes());
        (Box::new(device), queue)
    }

    fn fresh() {
        init_logging();
        net::shutdown();
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    #[test]
    #[serial]
    fn test_calls_before_init_are_harmless() {
        fresh();
        assert!(!net::is_initialized());

        net::handle_frame(&Peer::default().arp_request(LOCAL_IP));
        net::poll(100);
        assert_eq!(net::with_net_stack(|_| ()), None);
        assert_eq!(
            net::process(NetEvent::Tick { elapsed_ms: 10 }),
            Err(NetError::NoDevice)
        );
        assert!(net::shutdown().is_none());
    }

    #[test]
    #[serial]
    fn test_init_from_cmdline() {
        fresh();
        let (device, _queue) = device();
        net::init("quiet net.ip=192.168.7.20 net.mask=255.255.255.0 net.gw=none", device);
        assert!(net::is_initialized());

        let config = net::with_net_stack(|stack| *stack.config()).unwrap();
        assert_eq!(config.address, Ipv4Address::new(192, 168, 7, 20));
        assert_eq!(config.netmask, Ipv4Address::new(255, 255, 255, 0));
        assert_eq!(config.gateway, None);

        let stack = net::shutdown().expect("stack handed back");
        assert_eq!(stack.config().address, config.address);
        assert!(!net::is_initialized());
    }

    #[test]
    #[serial]
    fn test_second_init_ignored() {
        fresh();
        let (first, _q1) = device();
        let (second, _q2) = device();
        net::init_with_config(NetConfig::default(), first);
        net::init_with_config(
            NetConfig::default().with_address(Ipv4Address::new(10, 9, 9, 9)),
            second,
        );

        let address = net::with_net_stack(|stack| stack.config().address).unwrap();
        assert_eq!(address, LOCAL_IP);
        net::shutdown();
    }

    // =========================================================================
    // Frame and timer entry points
    // =========================================================================

    #[test]
    #[serial]
    fn test_handle_frame_reaches_global_stack() {
        fresh();
        let (device, queue) = device();
        net::init_with_config(NetConfig::default(), device);

        net::handle_frame(&Peer::default().arp_request(LOCAL_IP));
        assert_eq!(net::frames_received(), 1);
        assert_eq!(queue.len(), 1);

        let learned = net::with_net_stack(|stack| stack.ip().arp_cache().lookup(PEER_IP, 0));
        assert!(learned.flatten().is_some());

        // Garbage is counted and dropped without disturbing the stack.
        net::handle_frame(&[0u8; 6]);
        assert_eq!(net::frames_received(), 2);
        assert_eq!(queue.len(), 1);
        net::shutdown();
    }

    #[cfg(feature = "net_tcp")]
    #[test]
    #[serial]
    fn test_poll_drives_tcp_timers() {
        use crate::mock::session::Session;
        use nexa_net::net::tcp::{no_events, TCP_INITIAL_RTO_MS, TCP_SYN};

        fresh();
        let (device, queue) = device();
        net::init_with_config(NetConfig::default(), device);
        net::handle_frame(&Peer::default().arp_request(LOCAL_IP));
        queue.drain();

        net::with_net_stack(|stack| {
            let mut tcp = stack.tcp().unwrap();
            let listener = tcp.socket(Ipv4Address::UNSPECIFIED, 80, no_events()).unwrap();
            tcp.listen(listener, 2).unwrap();
        })
        .unwrap();

        let mut session = Session::new(40000, 80);
        net::handle_frame(&session.frame(TCP_SYN, &[]));
        assert_eq!(queue.drain().len(), 1);

        net::poll(TCP_INITIAL_RTO_MS);
        assert_eq!(queue.drain().len(), 1);
        let retransmits = net::with_net_stack(|stack| stack.tcp().unwrap().stats().retransmits);
        assert_eq!(retransmits, Some(1));
        net::shutdown();
    }

    #[test]
    #[serial]
    fn test_process_routes_events() {
        fresh();
        let (device, queue) = device();
        net::init_with_config(NetConfig::default(), device);

        let request = Peer::default().arp_request(LOCAL_IP);
        assert_eq!(net::process(NetEvent::Frame(&request)), Ok(()));
        assert_eq!(queue.len(), 1);
        assert_eq!(net::process(NetEvent::Tick { elapsed_ms: 1_000 }), Ok(()));
        net::shutdown();
    }

    // =========================================================================
    // Bring-up logging (forked)
    // =========================================================================

    static CAPTURED: spin::Mutex<Vec<(LogLevel, String)>> = spin::Mutex::new(Vec::new());

    struct CaptureSink;

    impl LogSink for CaptureSink {
        fn write_record(&self, level: LogLevel, args: core::fmt::Arguments<'_>) {
            CAPTURED.lock().push((level, args.to_string()));
        }
    }

    static CAPTURE: CaptureSink = CaptureSink;

    rusty_fork_test! {
        #[test]
        fn test_bring_up_logged_once() {
            logger::set_sink(&CAPTURE);
            let (first, _q1) = device();
            let (second, _q2) = device();
            net::init("net.ip=10.0.2.15 loglevel=debug", first);
            net::init("net.ip=10.0.2.15", second);

            let lines = CAPTURED.lock();
            let up: Vec<_> = lines
                .iter()
                .filter(|(_, line)| line.starts_with("net: up"))
                .collect();
            assert_eq!(up.len(), 1);
            assert_eq!(up[0].0, LogLevel::INFO);
            assert!(up[0].1.contains("10.0.2.15"));
            assert!(lines.iter().any(|(_, line)| line.contains("already initialized")));
        }
    }
}
