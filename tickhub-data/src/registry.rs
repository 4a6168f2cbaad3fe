/// Subscription registry
///
/// Sole owner of the viewer-to-symbol graph. Keeps a forward index
/// (connection to its symbols) and a reverse index (symbol to its
/// subscribers) so per-tick fan-out is one lookup. Dropping the last
/// subscriber leaves cached data and the upstream stream alone; the
/// retention sweep decides actual eviction later.
use crate::error::DataError;
use crate::symbol::Symbol;
use derive_more::Display;
use fnv::{FnvHashMap, FnvHashSet};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Process-unique identifier for one viewer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("conn-{_0}")]
pub struct ConnectionId(u64);

/// Result of a subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOutcome {
    /// First subscriber overall for this symbol; the caller should start
    /// the upstream stream and consider a backfill.
    pub newly_active: bool,
}

#[derive(Debug)]
struct Connection {
    sender: mpsc::Sender<Message>,
    symbols: FnvHashSet<Symbol>,
}

#[derive(Debug, Default)]
struct Indexes {
    connections: FnvHashMap<ConnectionId, Connection>,
    subscribers: FnvHashMap<Symbol, FnvHashSet<ConnectionId>>,
}

/// Shared registry of viewer connections and their subscriptions.
#[derive(Debug)]
pub struct Registry {
    indexes: RwLock<Indexes>,
    max_symbols: usize,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new(max_symbols: usize) -> Self {
        Self {
            indexes: RwLock::new(Indexes::default()),
            max_symbols,
            next_id: AtomicU64::new(1),
        }
    }

    /// Admit a new connection and hand back its identifier. `sender` is
    /// the connection's outbound queue.
    pub fn register(&self, sender: mpsc::Sender<Message>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut indexes = self.indexes.write();
        indexes.connections.insert(
            id,
            Connection {
                sender,
                symbols: FnvHashSet::default(),
            },
        );
        id
    }

    /// Subscribe a connection to a symbol. Repeat subscribes are
    /// idempotent. Fails when the distinct-symbol cap would be exceeded.
    pub fn subscribe(
        &self,
        id: ConnectionId,
        symbol: &Symbol,
    ) -> Result<SubscribeOutcome, DataError> {
        let mut indexes = self.indexes.write();

        if !indexes.connections.contains_key(&id) {
            return Err(DataError::UnknownConnection);
        }
        let cold = !indexes.subscribers.contains_key(symbol);
        if cold && indexes.subscribers.len() >= self.max_symbols {
            return Err(DataError::SubscriptionLimit {
                max: self.max_symbols,
            });
        }

        if let Some(connection) = indexes.connections.get_mut(&id) {
            connection.symbols.insert(symbol.clone());
        }
        indexes
            .subscribers
            .entry(symbol.clone())
            .or_default()
            .insert(id);

        Ok(SubscribeOutcome { newly_active: cold })
    }

    /// Drop one subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: ConnectionId, symbol: &Symbol) -> bool {
        let mut indexes = self.indexes.write();
        let removed = indexes
            .connections
            .get_mut(&id)
            .is_some_and(|connection| connection.symbols.remove(symbol));
        if removed {
            if let Some(subscribers) = indexes.subscribers.get_mut(symbol) {
                subscribers.remove(&id);
                if subscribers.is_empty() {
                    indexes.subscribers.remove(symbol);
                }
            }
        }
        removed
    }

    /// Remove a connection and all its subscriptions. Idempotent, safe
    /// to call while a broadcast to the same connection is in flight.
    pub fn remove_connection(&self, id: ConnectionId) {
        let mut indexes = self.indexes.write();
        let Some(connection) = indexes.connections.remove(&id) else {
            return;
        };
        for symbol in connection.symbols {
            if let Some(subscribers) = indexes.subscribers.get_mut(&symbol) {
                subscribers.remove(&id);
                if subscribers.is_empty() {
                    indexes.subscribers.remove(&symbol);
                }
            }
        }
    }

    /// Whether any connection is currently subscribed to `symbol`.
    pub fn is_tracked(&self, symbol: &Symbol) -> bool {
        self.indexes.read().subscribers.contains_key(symbol)
    }

    pub fn connection_count(&self) -> usize {
        self.indexes.read().connections.len()
    }

    pub fn active_symbol_count(&self) -> usize {
        self.indexes.read().subscribers.len()
    }

    /// Push a message to every subscriber of `symbol`, returning how many
    /// queues accepted it. A full queue means that consumer is lagging;
    /// the message is dropped for it alone.
    pub fn fan_out(&self, symbol: &Symbol, message: &Message) -> usize {
        let indexes = self.indexes.read();
        let Some(subscribers) = indexes.subscribers.get(symbol) else {
            return 0;
        };

        let mut delivered = 0;
        for id in subscribers {
            let Some(connection) = indexes.connections.get(id) else {
                continue;
            };
            if deliver(*id, &connection.sender, message.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Push a message to every connection regardless of subscriptions.
    pub fn broadcast(&self, message: &Message) -> usize {
        let indexes = self.indexes.read();
        let mut delivered = 0;
        for (id, connection) in &indexes.connections {
            if deliver(*id, &connection.sender, message.clone()) {
                delivered += 1;
            }
        }
        delivered
    }
}

fn deliver(id: ConnectionId, sender: &mpsc::Sender<Message>, message: Message) -> bool {
    match sender.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("{} lagging, dropping outbound message", id);
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("{} vanished mid-send", id);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(code: &str) -> Symbol {
        Symbol::parse(&format!("NSE:{code}-EQ")).unwrap()
    }

    fn registry() -> Registry {
        Registry::new(50)
    }

    #[test]
    fn test_first_subscriber_activates_symbol() {
        let registry = registry();
        let (tx, _rx) = mpsc::channel(8);
        let conn = registry.register(tx);
        let reliance = symbol("RELIANCE");

        let outcome = registry.subscribe(conn, &reliance).unwrap();
        assert!(outcome.newly_active);
        assert!(registry.is_tracked(&reliance));
        assert_eq!(registry.active_symbol_count(), 1);
    }

    #[test]
    fn test_second_subscriber_reuses_stream() {
        let registry = registry();
        let (tx_a, _rx_a) = mpsc::channel(8);
        let (tx_b, _rx_b) = mpsc::channel(8);
        let first = registry.register(tx_a);
        let second = registry.register(tx_b);
        let tcs = symbol("TCS");

        assert!(registry.subscribe(first, &tcs).unwrap().newly_active);
        assert!(!registry.subscribe(second, &tcs).unwrap().newly_active);
        assert_eq!(registry.active_symbol_count(), 1);
    }

    #[test]
    fn test_repeat_subscribe_is_idempotent() {
        let registry = registry();
        let (tx, _rx) = mpsc::channel(8);
        let conn = registry.register(tx);
        let infy = symbol("INFY");

        assert!(registry.subscribe(conn, &infy).unwrap().newly_active);
        assert!(!registry.subscribe(conn, &infy).unwrap().newly_active);

        assert!(registry.unsubscribe(conn, &infy));
        // A single unsubscribe fully clears the pair
        assert!(!registry.is_tracked(&infy));
    }

    #[test]
    fn test_symbol_cap_rejects_new_symbols_only() {
        let registry = Registry::new(1);
        let (tx, _rx) = mpsc::channel(8);
        let conn = registry.register(tx);

        registry.subscribe(conn, &symbol("A")).unwrap();
        let err = registry.subscribe(conn, &symbol("B")).unwrap_err();
        assert_eq!(err, DataError::SubscriptionLimit { max: 1 });

        // The already-active symbol is unaffected by the cap
        assert!(registry.subscribe(conn, &symbol("A")).is_ok());
    }

    #[test]
    fn test_subscribe_unknown_connection() {
        let registry = registry();
        let (tx, _rx) = mpsc::channel(8);
        let conn = registry.register(tx);
        registry.remove_connection(conn);

        let err = registry.subscribe(conn, &symbol("A")).unwrap_err();
        assert_eq!(err, DataError::UnknownConnection);
    }

    #[test]
    fn test_unsubscribe_without_subscription() {
        let registry = registry();
        let (tx, _rx) = mpsc::channel(8);
        let conn = registry.register(tx);

        assert!(!registry.unsubscribe(conn, &symbol("A")));
    }

    #[test]
    fn test_disconnect_clears_reverse_index() {
        let registry = registry();
        let (tx_a, _rx_a) = mpsc::channel(8);
        let (tx_b, _rx_b) = mpsc::channel(8);
        let leaving = registry.register(tx_a);
        let staying = registry.register(tx_b);
        let sbin = symbol("SBIN");
        let hdfc = symbol("HDFCBANK");

        registry.subscribe(leaving, &sbin).unwrap();
        registry.subscribe(leaving, &hdfc).unwrap();
        registry.subscribe(staying, &sbin).unwrap();

        registry.remove_connection(leaving);
        registry.remove_connection(leaving); // idempotent

        assert!(registry.is_tracked(&sbin));
        assert!(!registry.is_tracked(&hdfc));
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn test_fan_out_reaches_subscribers_only() {
        let registry = registry();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let subscriber = registry.register(tx_a);
        let _bystander = registry.register(tx_b);
        let tcs = symbol("TCS");

        registry.subscribe(subscriber, &tcs).unwrap();
        let delivered = registry.fan_out(&tcs, &Message::text("tick"));

        assert_eq!(delivered, 1);
        assert_eq!(rx_a.try_recv().unwrap(), Message::text("tick"));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_slow_consumer_is_isolated() {
        let registry = registry();
        let (tx_slow, _rx_slow) = mpsc::channel(1);
        let (tx_ok, mut rx_ok) = mpsc::channel(8);
        let slow = registry.register(tx_slow);
        let ok = registry.register(tx_ok);
        let tcs = symbol("TCS");

        registry.subscribe(slow, &tcs).unwrap();
        registry.subscribe(ok, &tcs).unwrap();

        // First message fills the slow consumer's queue
        assert_eq!(registry.fan_out(&tcs, &Message::text("one")), 2);
        // Second is dropped for the slow consumer, delivered to the other
        assert_eq!(registry.fan_out(&tcs, &Message::text("two")), 1);
        assert_eq!(rx_ok.try_recv().unwrap(), Message::text("one"));
        assert_eq!(rx_ok.try_recv().unwrap(), Message::text("two"));
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let registry = registry();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        registry.register(tx_a);
        registry.register(tx_b);

        let delivered = registry.broadcast(&Message::text("heartbeat"));
        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }
}
