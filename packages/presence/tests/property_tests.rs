use std::collections::HashMap;

use proptest::prelude::*;

use peer_session::PeerId;
use presence::{InMemoryDirectory, PresenceDirectory, exclude_self};

#[derive(Debug, Clone)]
enum Op {
    Register(u8, String),
    Unregister(u8),
}

fn arb_op() -> impl Strategy<Value = Op> {
    // A small id space so operations collide often.
    prop_oneof![
        (0u8..6, "[a-z]{0,6}").prop_map(|(id, name)| Op::Register(id, name)),
        (0u8..6).prop_map(Op::Unregister),
    ]
}

fn peer(id: u8) -> PeerId {
    PeerId::new(format!("peer-{id}"))
}

fn run<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fut)
}

proptest! {
    #[test]
    fn list_matches_a_map_model(ops in prop::collection::vec(arb_op(), 0..40)) {
        let (listed, model) = run(async {
            let dir = InMemoryDirectory::new();
            let mut model: HashMap<PeerId, String> = HashMap::new();
            for op in ops {
                match op {
                    Op::Register(id, name) => {
                        dir.register(peer(id), name.clone()).await.unwrap();
                        model.insert(peer(id), name);
                    }
                    Op::Unregister(id) => {
                        let existed = dir.unregister(&peer(id)).await;
                        assert_eq!(existed, model.remove(&peer(id)).is_some());
                    }
                }
            }
            (dir.list().await, model)
        });

        // At most one entry per peer id.
        let mut seen = std::collections::HashSet::new();
        for entry in &listed {
            prop_assert!(seen.insert(entry.peer_id.clone()), "duplicate {}", entry.peer_id);
        }
        prop_assert_eq!(listed.len(), model.len());
        for entry in &listed {
            prop_assert_eq!(model.get(&entry.peer_id), Some(&entry.display_name));
        }
    }

    #[test]
    fn unregistered_ids_never_listed(ops in prop::collection::vec(arb_op(), 0..40), victim in 0u8..6) {
        let listed = run(async {
            let dir = InMemoryDirectory::new();
            for op in ops {
                match op {
                    Op::Register(id, name) => {
                        dir.register(peer(id), name).await.unwrap();
                    }
                    Op::Unregister(id) => {
                        dir.unregister(&peer(id)).await;
                    }
                }
            }
            dir.unregister(&peer(victim)).await;
            dir.list().await
        });
        prop_assert!(listed.iter().all(|e| e.peer_id != peer(victim)));
    }

    #[test]
    fn exclude_self_removes_only_self(ids in prop::collection::hash_set(0u8..10, 0..10), me in 0u8..10) {
        let listed = run(async {
            let dir = InMemoryDirectory::new();
            for id in &ids {
                dir.register(peer(*id), format!("user {id}")).await.unwrap();
            }
            dir.list().await
        });
        let others = exclude_self(listed, &peer(me));
        prop_assert!(others.iter().all(|e| e.peer_id != peer(me)));
        prop_assert_eq!(others.len(), ids.len() - usize::from(ids.contains(&me)));
    }
}
