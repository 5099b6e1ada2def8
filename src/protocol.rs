//! Which wire format an [`crate::master::Master`] or [`crate::slave::Slave`]
//! speaks. Grounded in spec.md §3 ("Protocol flavor {RTU, TCP}"); carried as
//! a runtime-mutable field on the instance per spec.md §6's "set-protocol-
//! flavor" mutator.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Rtu,
    Tcp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Rtu => write!(f, "RTU"),
            Protocol::Tcp => write!(f, "TCP"),
        }
    }
}

/// The "any unit" address reserved on TCP (spec.md glossary: "0xFF 'any' on
/// TCP"); a slave bound to a normal unit id still answers requests addressed
/// to this value.
pub const TCP_BROADCAST_UNIT: u8 = 0xFF;
