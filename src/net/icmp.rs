/// ICMP echo responder
use alloc::vec::Vec;
use core::any::Any;

use super::buffer::NetBuf;
use super::checksum;
use super::drivers::NetError;
use super::ipv4::{Ipv4Address, Ipv4Layer};
use super::protocol::ProtocolHandler;

pub const PROTO_ICMP: u8 = 1;
pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IcmpStats {
    pub rx_messages: u64,
    pub rx_bad_checksum: u64,
    pub echo_requests: u64,
    pub echo_replies_sent: u64,
}

#[derive(Default)]
pub struct IcmpLayer {
    stats: IcmpStats,
}

impl IcmpLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &IcmpStats {
        &self.stats
    }
}

/// Build an echo message (`ICMP_ECHO_REQUEST` or `ICMP_ECHO_REPLY`).
pub fn build_echo(kind: u8, identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(ICMP_HEADER_SIZE + payload.len());
    message.extend_from_slice(&[kind, 0, 0, 0]);
    message.extend_from_slice(&identifier.to_be_bytes());
    message.extend_from_slice(&sequence.to_be_bytes());
    message.extend_from_slice(payload);
    checksum::fill_field(&mut message, 2, 0);
    message
}

impl ProtocolHandler for IcmpLayer {
    fn name(&self) -> &'static str {
        "icmp"
    }

    fn receive(
        &mut self,
        ip: &mut Ipv4Layer,
        src: Ipv4Address,
        dst: Ipv4Address,
        payload: NetBuf,
    ) -> Result<(), NetError> {
        self.stats.rx_messages += 1;
        let message = payload.data();
        if message.len() < ICMP_HEADER_SIZE {
            return Err(NetError::Truncated);
        }
        if !checksum::verify_field(message, 2) {
            self.stats.rx_bad_checksum += 1;
            return Err(NetError::ChecksumFailed);
        }

        if message[0] != ICMP_ECHO_REQUEST || message[1] != 0 {
            return Ok(());
        }
        self.stats.echo_requests += 1;

        // No replies to broadcast pings.
        if dst != ip.address() {
            return Ok(());
        }

        let identifier = u16::from_be_bytes([message[4], message[5]]);
        let sequence = u16::from_be_bytes([message[6], message[7]]);
        let reply = build_echo(ICMP_ECHO_REPLY, identifier, sequence, &message[ICMP_HEADER_SIZE..]);

        crate::kdebug!("icmp: echo reply to {} id={} seq={}", src, identifier, sequence);
        let ttl = ip.default_ttl();
        ip.send(NetBuf::for_payload(&reply), src, PROTO_ICMP, ttl)?;
        self.stats.echo_replies_sent += 1;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
