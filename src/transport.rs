//! The seam between the protocol engine and whatever carries SNMP datagrams.
//!
//! Implementations own the SNMP envelope (community string, version, request
//! ids) and a per-round-trip timeout. They must not retry on their own: the
//! [`Printer`](crate::Printer) decides which requests are safe to repeat.

use crate::protocol::Address;

/// One OID/value pair as returned in an SNMP response.
pub type Varbind = (Address, Vec<u8>);

/// Failure of a single round trip.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    /// The agent answered `tooBig`: the batch exceeds the response size ceiling.
    #[error("response too big")]
    TooBig,

    #[error("{0}")]
    Other(String),
}

/// Request/response capability over SNMP GET.
pub trait Transport {
    /// Issue a single GET and return the value bytes.
    fn request(&mut self, address: &Address) -> Result<Vec<u8>, TransportError>;

    /// Issue one GET carrying every address. Replies may come back in any
    /// order; each carries the OID it answers.
    fn request_batch(&mut self, addresses: &[Address]) -> Result<Vec<Varbind>, TransportError> {
        addresses
            .iter()
            .map(|a| Ok((a.clone(), self.request(a)?)))
            .collect()
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn request(&mut self, address: &Address) -> Result<Vec<u8>, TransportError> {
        (**self).request(address)
    }

    fn request_batch(&mut self, addresses: &[Address]) -> Result<Vec<Varbind>, TransportError> {
        (**self).request_batch(addresses)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn request(&mut self, address: &Address) -> Result<Vec<u8>, TransportError> {
        (**self).request(address)
    }

    fn request_batch(&mut self, addresses: &[Address]) -> Result<Vec<Varbind>, TransportError> {
        (**self).request_batch(addresses)
    }
}
