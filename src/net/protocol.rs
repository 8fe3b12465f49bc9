//! IP protocol dispatch table
//!
//! Transports register one handler per IP protocol number. The stack looks
//! the handler up for every accepted packet and passes it the payload
//! together with the addressing it arrived with.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::any::Any;

use super::buffer::NetBuf;
use super::drivers::NetError;
use super::ipv4::{Ipv4Address, Ipv4Layer};

pub trait ProtocolHandler: Any + Send {
    fn name(&self) -> &'static str;

    /// Consume one packet. `ip` is the interface the reply goes out on.
    fn receive(
        &mut self,
        ip: &mut Ipv4Layer,
        src: Ipv4Address,
        dst: Ipv4Address,
        payload: NetBuf,
    ) -> Result<(), NetError>;

    /// Periodic timer, called from [`super::stack::NetStack::tick`].
    fn on_tick(&mut self, _ip: &mut Ipv4Layer, _elapsed_ms: u64) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[derive(Default)]
pub struct ProtocolTable {
    handlers: BTreeMap<u8, Box<dyn ProtocolHandler>>,
}

impl ProtocolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, number: u8, handler: Box<dyn ProtocolHandler>) -> Result<(), NetError> {
        if self.handlers.contains_key(&number) {
            crate::kwarn!(
                "net: protocol {} already registered, rejecting {}",
                number,
                handler.name()
            );
            return Err(NetError::ProtocolInUse);
        }
        crate::kdebug!("net: registered protocol {} ({})", number, handler.name());
        self.handlers.insert(number, handler);
        Ok(())
    }

    pub fn unregister(&mut self, number: u8) -> Option<Box<dyn ProtocolHandler>> {
        self.handlers.remove(&number)
    }

    pub fn contains(&self, number: u8) -> bool {
        self.handlers.contains_key(&number)
    }

    pub fn get_mut(&mut self, number: u8) -> Option<&mut Box<dyn ProtocolHandler>> {
        self.handlers.get_mut(&number)
    }

    /// Concrete handler registered under `number`, if it is a `T`.
    pub fn downcast_ref<T: ProtocolHandler>(&self, number: u8) -> Option<&T> {
        self.handlers.get(&number)?.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: ProtocolHandler>(&mut self, number: u8) -> Option<&mut T> {
        self.handlers.get_mut(&number)?.as_any_mut().downcast_mut::<T>()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u8, &mut Box<dyn ProtocolHandler>)> {
        self.handlers.iter_mut().map(|(number, handler)| (*number, handler))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
