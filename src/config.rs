//! Interface configuration
//!
//! The engine runs a single IPv4 interface. Its address, mask, gateway and
//! default TTL come from [`NetConfig`], either built in code or parsed from
//! the kernel command line (`net.ip=10.0.2.15 net.mask=255.255.255.0
//! net.gw=10.0.2.2 net.ttl=64`).

use crate::net::ipv4::Ipv4Address;

pub const DEFAULT_TTL: u8 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetConfig {
    pub address: Ipv4Address,
    pub netmask: Ipv4Address,
    pub gateway: Option<Ipv4Address>,
    pub ttl: u8,
}

impl Default for NetConfig {
    /// QEMU user-mode networking: 10.0.2.15/24 via 10.0.2.2.
    fn default() -> Self {
        Self {
            address: Ipv4Address::new(10, 0, 2, 15),
            netmask: Ipv4Address::new(255, 255, 255, 0),
            gateway: Some(Ipv4Address::new(10, 0, 2, 2)),
            ttl: DEFAULT_TTL,
        }
    }
}

impl NetConfig {
    pub const fn new(address: Ipv4Address, netmask: Ipv4Address) -> Self {
        Self {
            address,
            netmask,
            gateway: None,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_address(mut self, address: Ipv4Address) -> Self {
        self.address = address;
        self
    }

    pub fn with_netmask(mut self, netmask: Ipv4Address) -> Self {
        self.netmask = netmask;
        self
    }

    pub fn with_gateway(mut self, gateway: Option<Ipv4Address>) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Apply `net.*` directives from a kernel command line on top of the
    /// defaults. Unknown keys are ignored; malformed values are logged and
    /// leave the previous setting in place.
    pub fn from_cmdline(cmdline: &str) -> Self {
        let mut config = Self::default();

        for token in cmdline.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };

            match key {
                "net.ip" => match Ipv4Address::parse(value) {
                    Some(addr) => config.address = addr,
                    None => crate::kwarn!("net: ignoring malformed net.ip={}", value),
                },
                "net.mask" => match Ipv4Address::parse(value) {
                    Some(mask) => config.netmask = mask,
                    None => crate::kwarn!("net: ignoring malformed net.mask={}", value),
                },
                "net.gw" => {
                    if value.eq_ignore_ascii_case("none") {
                        config.gateway = None;
                    } else if let Some(gw) = Ipv4Address::parse(value) {
                        config.gateway = Some(gw);
                    } else {
                        crate::kwarn!("net: ignoring malformed net.gw={}", value);
                    }
                }
                "net.ttl" => match value.parse::<u8>() {
                    Ok(ttl) if ttl > 0 => config.ttl = ttl,
                    _ => crate::kwarn!("net: ignoring malformed net.ttl={}", value),
                },
                _ => {}
            }
        }

        config
    }

    /// Whether `addr` shares the interface's subnet.
    pub fn is_on_link(&self, addr: Ipv4Address) -> bool {
        addr.in_subnet(self.address, self.netmask)
    }

    pub fn directed_broadcast(&self) -> Ipv4Address {
        self.address.directed_broadcast(self.netmask)
    }
}
