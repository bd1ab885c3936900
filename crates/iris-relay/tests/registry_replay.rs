//! Property tests for registry membership.
//!
//! Replays arbitrary register/unregister sequences against a model set:
//! after any sequence, the registry's membership must equal the set of
//! identities with a register not yet matched by an unregister, with no
//! identity ever present twice.

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;

use iris_relay::{Connection, ConnectionId, LifecycleInput, Message, Registry, RelayError};

type Slot = Option<(Arc<Connection>, tokio::sync::mpsc::Receiver<Message>)>;

fn open_connection() -> (Arc<Connection>, tokio::sync::mpsc::Receiver<Message>) {
    let (conn, rx) = Connection::channel(1);
    conn.apply(LifecycleInput::HandshakeCompleted);
    (conn, rx)
}

proptest! {
    #[test]
    fn replay_matches_model(ops in prop::collection::vec((0usize..8, any::<bool>()), 0..64)) {
        let registry = Registry::new(64);
        let mut slots: Vec<Slot> = (0..8).map(|_| None).collect();
        let mut model: HashSet<ConnectionId> = HashSet::new();

        for (slot, is_register) in ops {
            if is_register {
                if let Some((existing, _)) = &slots[slot] {
                    // Same identity again: invariant violation, membership unchanged.
                    let (dup, rx) = Connection::channel_with_id(existing.id(), 1);
                    dup.apply(LifecycleInput::HandshakeCompleted);
                    let err = registry.register(dup).unwrap_err();
                    let is_duplicate = matches!(err, RelayError::DuplicateIdentity { .. });
                    prop_assert!(is_duplicate, "expected duplicate identity error, got {err}");
                    drop(rx);
                } else {
                    let (conn, rx) = open_connection();
                    registry.register(Arc::clone(&conn)).unwrap();
                    model.insert(conn.id());
                    slots[slot] = Some((conn, rx));
                }
            } else if let Some((conn, _rx)) = slots[slot].take() {
                registry.unregister(conn.id());
                model.remove(&conn.id());
            } else {
                // Unregister of an absent identity is a successful no-op.
                prop_assert!(registry.unregister(ConnectionId::new()).is_none());
            }
        }

        let ids = registry.connection_ids();
        let unique: HashSet<ConnectionId> = ids.iter().copied().collect();
        prop_assert_eq!(unique.len(), ids.len(), "no identity appears twice");
        prop_assert_eq!(registry.len(), model.len());
        prop_assert_eq!(unique, model);
    }

    #[test]
    fn double_unregister_never_errors(n in 1usize..16) {
        let registry = Registry::new(64);
        let mut ids = Vec::new();
        let mut keep = Vec::new();
        for _ in 0..n {
            let (conn, rx) = open_connection();
            ids.push(conn.id());
            registry.register(Arc::clone(&conn)).unwrap();
            keep.push((conn, rx));
        }
        for id in &ids {
            prop_assert!(registry.unregister(*id).is_some());
            prop_assert!(registry.unregister(*id).is_none());
        }
        prop_assert!(registry.is_empty());
    }
}
