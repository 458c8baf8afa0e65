// ConcurrentMap property tests against a std HashMap model.
//
// Property 1: len/contains_key match the model after every insert/erase.
//  - insert is first-insert-wins, so the model only inserts vacant keys.
// Property 2: erase_if removes exactly the predicate matches.
// Property 3: insert_or_apply through a guard and through the map agree.
use proptest::prelude::*;
use rwmap::{ConcurrentMap, InsertOrApply};
use std::collections::HashMap;

proptest! {
    #[test]
    fn prop_insert_erase_matches_model(ops in proptest::collection::vec((0u8..=2u8, 0u32..32u32, any::<u16>()), 1..200)) {
        let map = ConcurrentMap::<u32, u16>::new();
        let mut model: HashMap<u32, u16> = HashMap::new();

        for (op, key, value) in ops {
            match op {
                0 => {
                    let inserted = map.insert(key, value);
                    prop_assert_eq!(inserted, !model.contains_key(&key));
                    model.entry(key).or_insert(value);
                }
                1 => {
                    prop_assert_eq!(map.erase(&key), model.remove(&key));
                }
                2 => {
                    let keys = [key, key.wrapping_add(1)];
                    let expected = keys.iter().filter(|k| model.remove(*k).is_some()).count();
                    prop_assert_eq!(map.erase_keys(&keys), expected);
                }
                _ => unreachable!(),
            }

            prop_assert_eq!(map.len(), model.len());
            prop_assert_eq!(map.is_empty(), model.is_empty());
            prop_assert_eq!(map.contains_key(&key), model.contains_key(&key));
        }

        for (k, v) in &model {
            prop_assert_eq!(map.get(k), Some(*v));
        }
    }

    #[test]
    fn prop_erase_if_removes_exactly_matches(values in proptest::collection::hash_map(any::<u32>(), any::<u32>(), 0..256), modulus in 1u32..8) {
        let map: ConcurrentMap<u32, u32> = values.clone().into_iter().collect();
        let removed = map.erase_if(|_, v| v % modulus == 0);

        let kept = values.iter().filter(|(_, v)| *v % modulus != 0).count();
        prop_assert_eq!(removed, values.len() - kept);
        prop_assert_eq!(map.len(), kept);
        for (k, v) in &values {
            if v % modulus == 0 {
                prop_assert!(!map.contains_key(k));
            } else {
                prop_assert_eq!(map.get(k), Some(*v));
            }
        }
    }

    #[test]
    fn prop_insert_or_apply_locked_matches_elided(ops in proptest::collection::vec((0u32..16u32, 1u64..100u64), 1..100)) {
        let locked = ConcurrentMap::<u32, u64>::new();
        let elided = ConcurrentMap::<u32, u64>::new();

        for (key, value) in ops {
            let a = locked.insert_or_apply(key, value, |v| *v += value);
            let b = elided.write().insert_or_apply(key, value, |v| *v += value);
            prop_assert_eq!(a, b);
            if a == InsertOrApply::Inserted {
                prop_assert_eq!(locked.get(&key), Some(value));
            }
        }

        let mut left = locked.into_inner().into_iter().collect::<Vec<_>>();
        let mut right = elided.into_inner().into_iter().collect::<Vec<_>>();
        left.sort();
        right.sort();
        prop_assert_eq!(left, right);
    }
}
