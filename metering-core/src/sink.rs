//! External value-transfer boundary
//!
//! Settlement pays creators and the treasury through a [`PaymentSink`]. A
//! recipient may refuse delivery (the on-chain analogue of a reverting
//! receiver); the settlement algorithm owns the fallback policy, the sink
//! only reports success or refusal. Each delivery is expected to be bounded
//! in cost so a broken recipient cannot stall settlement.

use crate::types::{Address, Amount};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Destination for settled funds
pub trait PaymentSink: Send {
    /// Deliver `amount` to `to`. Returns false when the recipient refuses
    /// delivery; the caller decides whether that is recoverable.
    fn deliver(&mut self, to: &Address, amount: Amount) -> bool;
}

/// Shared handle to a sink, so a caller can keep inspecting balances after
/// handing the sink to the ledger
impl<S: PaymentSink> PaymentSink for Arc<Mutex<S>> {
    fn deliver(&mut self, to: &Address, amount: Amount) -> bool {
        self.lock().deliver(to, amount)
    }
}

/// In-process sink crediting per-address balances
///
/// Addresses marked via [`MemorySink::refuse`] reject every delivery, which
/// models a broken or hostile recipient.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    balances: HashMap<Address, Amount>,
    refusing: HashSet<Address>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an address as refusing all deliveries
    pub fn refuse(&mut self, addr: Address) {
        self.refusing.insert(addr);
    }

    /// Clear a refusal mark
    pub fn accept(&mut self, addr: &Address) {
        self.refusing.remove(addr);
    }

    /// Total delivered to `addr`
    pub fn balance_of(&self, addr: &Address) -> Amount {
        self.balances.get(addr).copied().unwrap_or(0)
    }
}

impl PaymentSink for MemorySink {
    fn deliver(&mut self, to: &Address, amount: Amount) -> bool {
        if self.refusing.contains(to) {
            tracing::warn!(recipient = %to, amount, "delivery refused by recipient");
            return false;
        }

        *self.balances.entry(to.clone()).or_insert(0) += amount;
        tracing::debug!(recipient = %to, amount, "delivered");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_credits_balance() {
        let mut sink = MemorySink::new();
        let alice = Address::new("alice");

        assert!(sink.deliver(&alice, 100));
        assert!(sink.deliver(&alice, 50));
        assert_eq!(sink.balance_of(&alice), 150);
    }

    #[test]
    fn test_refusing_recipient() {
        let mut sink = MemorySink::new();
        let broken = Address::new("broken");

        sink.refuse(broken.clone());
        assert!(!sink.deliver(&broken, 100));
        assert_eq!(sink.balance_of(&broken), 0);

        sink.accept(&broken);
        assert!(sink.deliver(&broken, 100));
        assert_eq!(sink.balance_of(&broken), 100);
    }
}
