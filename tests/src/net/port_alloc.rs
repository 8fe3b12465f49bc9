//! Local port assignment
//!
//! Ephemeral allocation through the socket API, wrap-around at the top of
//! the range, explicit-port conflicts, and the fixed socket table size.

#[cfg(test)]
mod tests {
    use crate::mock::{capture_stack, LOCAL_IP, PEER_IP};
    use nexa_net::net::ipv4::Ipv4Address;
    use nexa_net::net::tcp::{
        no_events, PortAllocator, TcpLayer, PROTO_TCP, TCP_EPHEMERAL_FIRST, TCP_EPHEMERAL_LAST,
        TCP_MAX_SOCKETS,
    };
    use nexa_net::NetError;

    // =========================================================================
    // Ephemeral ports
    // =========================================================================

    #[test]
    fn test_ephemeral_ports_distinct_and_in_range() {
        let (mut stack, _queue) = capture_stack();
        let mut tcp = stack.tcp().unwrap();

        let mut ports = Vec::new();
        for _ in 0..4 {
            let handle = tcp.socket(Ipv4Address::UNSPECIFIED, 0, no_events()).unwrap();
            let (_, port) = tcp.local_endpoint(handle).unwrap();
            assert!(port >= TCP_EPHEMERAL_FIRST);
            assert!(!ports.contains(&port), "port {} handed out twice", port);
            ports.push(port);
        }
    }

    #[test]
    fn test_ephemeral_allocation_wraps() {
        let (mut stack, _queue) = capture_stack();
        let layer = stack.protocol_mut::<TcpLayer>(PROTO_TCP).unwrap();
        *layer.table_mut().ports_mut() = PortAllocator::starting_at(TCP_EPHEMERAL_LAST);

        let mut tcp = stack.tcp().unwrap();
        let top = tcp.socket(Ipv4Address::UNSPECIFIED, 0, no_events()).unwrap();
        let wrapped = tcp.socket(Ipv4Address::UNSPECIFIED, 0, no_events()).unwrap();
        assert_eq!(tcp.local_endpoint(top).unwrap().1, TCP_EPHEMERAL_LAST);
        assert_eq!(tcp.local_endpoint(wrapped).unwrap().1, TCP_EPHEMERAL_FIRST);
    }

    #[test]
    fn test_ephemeral_allocation_skips_bound_ports() {
        let (mut stack, _queue) = capture_stack();
        let mut tcp = stack.tcp().unwrap();
        tcp.socket(Ipv4Address::UNSPECIFIED, TCP_EPHEMERAL_FIRST, no_events())
            .unwrap();

        let handle = tcp.socket(Ipv4Address::UNSPECIFIED, 0, no_events()).unwrap();
        assert_eq!(tcp.local_endpoint(handle).unwrap().1, TCP_EPHEMERAL_FIRST + 1);
    }

    #[test]
    fn test_connect_uses_allocated_port() {
        let (mut stack, _queue) = capture_stack();
        let mut tcp = stack.tcp().unwrap();
        let handle = tcp.socket(Ipv4Address::UNSPECIFIED, 0, no_events()).unwrap();
        let before = tcp.local_endpoint(handle).unwrap().1;

        tcp.connect(handle, PEER_IP, 80).unwrap();
        let (addr, port) = tcp.local_endpoint(handle).unwrap();
        assert_eq!(port, before);
        assert_eq!(addr, LOCAL_IP);
    }

    // =========================================================================
    // Explicit ports
    // =========================================================================

    #[test]
    fn test_explicit_port_conflict() {
        let (mut stack, _queue) = capture_stack();
        let mut tcp = stack.tcp().unwrap();
        let local = LOCAL_IP;

        let first = tcp.socket(Ipv4Address::UNSPECIFIED, 8080, no_events()).unwrap();
        assert_eq!(
            tcp.socket(Ipv4Address::UNSPECIFIED, 8080, no_events()),
            Err(NetError::AddressInUse)
        );
        // A wildcard binding covers the specific address too.
        assert_eq!(
            tcp.socket(local, 8080, no_events()),
            Err(NetError::AddressInUse)
        );

        let other = tcp.socket(local, 8081, no_events()).unwrap();
        assert_eq!(tcp.bind(other, local, 8080), Err(NetError::AddressInUse));
        // Rebinding a socket to its own port is fine.
        assert_eq!(tcp.bind(first, Ipv4Address::UNSPECIFIED, 8080), Ok(()));

        tcp.close(first).unwrap();
        assert_eq!(tcp.bind(other, local, 8080), Ok(()));
        assert_eq!(tcp.local_endpoint(other), Some((local, 8080)));
    }

    #[test]
    fn test_bind_after_connect_rejected() {
        let (mut stack, _queue) = capture_stack();
        let mut tcp = stack.tcp().unwrap();
        let handle = tcp.socket(Ipv4Address::UNSPECIFIED, 0, no_events()).unwrap();
        tcp.connect(handle, PEER_IP, 80).unwrap();
        assert_eq!(
            tcp.bind(handle, Ipv4Address::UNSPECIFIED, 9000),
            Err(NetError::InvalidState)
        );
    }

    // =========================================================================
    // Table capacity
    // =========================================================================

    #[test]
    fn test_socket_table_full() {
        let (mut stack, _queue) = capture_stack();
        let mut tcp = stack.tcp().unwrap();

        let handles: Vec<_> = (0..TCP_MAX_SOCKETS)
            .map(|_| tcp.socket(Ipv4Address::UNSPECIFIED, 0, no_events()).unwrap())
            .collect();
        assert_eq!(
            tcp.socket(Ipv4Address::UNSPECIFIED, 0, no_events()),
            Err(NetError::TooManyConnections)
        );

        tcp.close(handles[5]).unwrap();
        let reused = tcp.socket(Ipv4Address::UNSPECIFIED, 0, no_events()).unwrap();
        assert_eq!(reused, handles[5]);
    }
}
