// WeakKeyMap property tests.
//
// Property 1: liveness and eviction accounting per key.
//  - Model: per-key outstanding `Tracked` clones (all of one key instance)
//    and the value the map should hold.
//  - Invariant: contains_key(key) == entry present in model;
//               size() == number of present entries;
//               hook values == values of entries whose key died, once each.
//  - Operations: put, get, clone, drop-one, drop-all, remove, clear.
//
// Property 2: cascading reclamation through values holding keys.
//  - Model: edges i -> j (j > i) where the value of i owns a handle to j,
//    plus an external root handle per node.
//  - Invariant: live nodes == nodes reachable from remaining roots;
//               hook calls == nodes reclaimed.
//  - Operations: drop one root at a time.
use proptest::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;
use weak_hashmap::{Tracked, WeakKeyMap};

// Property 1: entries live exactly as long as their key handles.
proptest! {
    #[test]
    fn prop_weak_key_map_liveness(keys in 1usize..=5, ops in proptest::collection::vec((0u8..=9u8, 0usize..100usize), 1..120)) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut m = WeakKeyMap::with_hook(move |v: usize| sink.borrow_mut().push(v));

        let mut handles: Vec<Vec<Tracked<String>>> = vec![Vec::new(); keys];
        let mut entries: Vec<Option<usize>> = vec![None; keys];
        let mut evicted: Vec<usize> = Vec::new();

        for (step, (op, raw_k)) in ops.into_iter().enumerate() {
            let k = raw_k % keys;
            let name = format!("k{}", k);
            match op {
                // Put a fresh value; mint a key instance if none is held.
                0 | 1 | 2 => {
                    if handles[k].is_empty() {
                        handles[k].push(Tracked::new(name.clone()));
                    }
                    let prev = m.put(&handles[k][0], step);
                    prop_assert_eq!(prev, entries[k].replace(step));
                }
                3 => {
                    prop_assert_eq!(m.get(name.as_str()).copied(), entries[k]);
                }
                4 => {
                    if let Some(h) = handles[k].last().cloned() {
                        handles[k].push(h);
                    }
                }
                // Dropping the last clone reclaims the entry, if any.
                5 | 6 => {
                    handles[k].pop();
                    if handles[k].is_empty() {
                        evicted.extend(entries[k].take());
                    }
                }
                7 => {
                    handles[k].clear();
                    evicted.extend(entries[k].take());
                }
                8 => {
                    prop_assert_eq!(m.remove(name.as_str()), entries[k].take());
                }
                9 => {
                    if step % 4 == 0 {
                        m.clear();
                        entries.iter_mut().for_each(|e| *e = None);
                    }
                }
                _ => unreachable!(),
            }

            prop_assert_eq!(m.contains_key(name.as_str()), entries[k].is_some());
            let mut got = seen.borrow().clone();
            got.sort_unstable();
            evicted.sort_unstable();
            prop_assert_eq!(&got, &evicted);
        }

        let expected_len = entries.iter().filter(|e| e.is_some()).count();
        prop_assert_eq!(m.size(), expected_len);
    }
}

// ---- Property 2: cascading reclamation ----

#[derive(Clone, Debug)]
struct Scenario {
    nodes: usize,
    edges: Vec<(usize, usize)>,
    drops: Vec<usize>,
}

fn arb_scenario() -> impl Strategy<Value = Scenario> {
    (2usize..=8).prop_flat_map(|nodes| {
        let edge = (0..nodes, 0..nodes).prop_filter_map("forward edge", |(a, b)| {
            if a < b {
                Some((a, b))
            } else if b < a {
                Some((b, a))
            } else {
                None
            }
        });
        (
            Just(nodes),
            proptest::collection::vec(edge, 0..12),
            proptest::collection::vec(0..nodes, 1..16),
        )
            .prop_map(|(nodes, edges, drops)| Scenario {
                nodes,
                edges,
                drops,
            })
    })
}

fn reachable(nodes: usize, edges: &[(usize, usize)], roots: &[bool]) -> Vec<bool> {
    // Edges point forward, so one ascending pass settles reachability.
    let mut alive = roots.to_vec();
    for i in 0..nodes {
        if !alive[i] {
            continue;
        }
        for &(a, b) in edges {
            if a == i {
                alive[b] = true;
            }
        }
    }
    alive
}

proptest! {
    #[test]
    fn prop_cascading_reclamation(sc in arb_scenario()) {
        let calls = Rc::new(RefCell::new(0usize));
        let c = Rc::clone(&calls);
        let mut m = WeakKeyMap::with_hook(move |_children: Vec<Tracked<usize>>| {
            *c.borrow_mut() += 1;
        });

        // Build children first so every value can own its children's keys.
        let mut roots: Vec<Option<Tracked<usize>>> = vec![None; sc.nodes];
        for i in (0..sc.nodes).rev() {
            let key = Tracked::new(i);
            let children: Vec<Tracked<usize>> = sc
                .edges
                .iter()
                .filter(|&&(a, _)| a == i)
                .filter_map(|&(_, b)| roots[b].clone())
                .collect();
            m.put(&key, children);
            roots[i] = Some(key);
        }
        prop_assert_eq!(m.size(), sc.nodes);

        for d in sc.drops {
            roots[d] = None;
            let held: Vec<bool> = roots.iter().map(Option::is_some).collect();
            let alive = reachable(sc.nodes, &sc.edges, &held);
            let live = alive.iter().filter(|&&a| a).count();

            prop_assert_eq!(m.size(), live);
            for (i, &a) in alive.iter().enumerate() {
                prop_assert_eq!(m.contains_key(&i), a);
            }
            prop_assert_eq!(*calls.borrow(), sc.nodes - live);
        }
    }
}
