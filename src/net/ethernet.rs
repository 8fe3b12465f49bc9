/// Ethernet II framing
///
/// Header push/pop on [`NetBuf`] and the transmit path down to the device.
use super::buffer::NetBuf;
use super::drivers::{NetDevice, NetError};

/// Ethernet MAC address (6 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);
    pub const ZERO: MacAddress = MacAddress([0x00; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    fn from_slice(bytes: &[u8]) -> Self {
        let mut arr = [0u8; 6];
        arr.copy_from_slice(&bytes[..6]);
        Self(arr)
    }
}

impl core::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

/// EtherType values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherType {
    IPv4,
    ARP,
    IPv6,
    Unknown(u16),
}

impl From<u16> for EtherType {
    fn from(value: u16) -> Self {
        match value {
            0x0800 => EtherType::IPv4,
            0x0806 => EtherType::ARP,
            0x86DD => EtherType::IPv6,
            other => EtherType::Unknown(other),
        }
    }
}

impl From<EtherType> for u16 {
    fn from(value: EtherType) -> Self {
        match value {
            EtherType::IPv4 => 0x0800,
            EtherType::ARP => 0x0806,
            EtherType::IPv6 => 0x86DD,
            EtherType::Unknown(other) => other,
        }
    }
}

/// Ethernet II frame header (14 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst_mac: MacAddress,
    pub src_mac: MacAddress,
    pub ether_type: EtherType,
}

impl EthernetHeader {
    pub const SIZE: usize = 14;
    /// Minimum frame size without FCS; shorter frames are zero padded.
    pub const MIN_FRAME: usize = 60;

    pub fn parse(bytes: &[u8]) -> Result<Self, NetError> {
        if bytes.len() < Self::SIZE {
            return Err(NetError::Truncated);
        }
        Ok(Self {
            dst_mac: MacAddress::from_slice(&bytes[0..6]),
            src_mac: MacAddress::from_slice(&bytes[6..12]),
            ether_type: EtherType::from(u16::from_be_bytes([bytes[12], bytes[13]])),
        })
    }

    pub fn emit(&self, out: &mut [u8]) {
        out[0..6].copy_from_slice(self.dst_mac.as_bytes());
        out[6..12].copy_from_slice(self.src_mac.as_bytes());
        out[12..14].copy_from_slice(&u16::from(self.ether_type).to_be_bytes());
    }
}

pub fn push_header(buf: &mut NetBuf, header: &EthernetHeader) {
    header.emit(buf.push_head(EthernetHeader::SIZE));
}

pub fn pop_header(buf: &mut NetBuf) -> Result<EthernetHeader, NetError> {
    let header = EthernetHeader::parse(buf.data())?;
    buf.pull_head(EthernetHeader::SIZE)?;
    Ok(header)
}

/// Frame `buf` for `dst` and hand it to the device.
pub fn frame_send(
    device: &mut dyn NetDevice,
    mut buf: NetBuf,
    dst: MacAddress,
    ether_type: EtherType,
) -> Result<(), NetError> {
    if buf.len() > device.mtu() {
        return Err(NetError::BufferTooSmall);
    }

    let header = EthernetHeader {
        dst_mac: dst,
        src_mac: MacAddress(device.mac_address()),
        ether_type,
    };
    push_header(&mut buf, &header);

    if buf.len() < EthernetHeader::MIN_FRAME {
        let pad = EthernetHeader::MIN_FRAME - buf.len();
        buf.push_tail(pad);
    }

    #[cfg(feature = "debug_net")]
    crate::ktrace!(
        "eth: tx {} -> {} type={:?} len={}",
        header.src_mac,
        header.dst_mac,
        ether_type,
        buf.len()
    );

    device.transmit(buf.data())
}
