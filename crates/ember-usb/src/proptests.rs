use std::collections::BTreeSet;

use proptest::prelude::*;

use crate::address::{AddressPool, UsbAddress};

#[derive(Debug, Clone)]
enum Op {
    Allocate,
    FreeNth(usize),
    Reserve(u8),
}

const MAX_OPS: usize = 512;

fn op_strategy() -> BoxedStrategy<Op> {
    prop_oneof![
        5 => Just(Op::Allocate),
        3 => (0usize..256).prop_map(Op::FreeNth),
        1 => any::<u8>().prop_map(Op::Reserve),
    ]
    .boxed()
}

fn ops_strategy() -> BoxedStrategy<Vec<Op>> {
    prop::collection::vec(op_strategy(), 1..=MAX_OPS).boxed()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    /// Runs arbitrary allocate/free/reserve sequences against a set-based
    /// reference. Checks first-fit order, exhaustion exactly at 127 live
    /// addresses, and that freed slots come back.
    #[test]
    fn prop_address_pool_matches_reference(ops in ops_strategy()) {
        let mut pool = AddressPool::new();
        prop_assert!(pool.reserve(UsbAddress::ROOT_HUB));

        let mut model: BTreeSet<u8> = BTreeSet::new();
        model.insert(UsbAddress::ROOT_HUB.get());

        for op in &ops {
            match op {
                Op::Allocate => match pool.allocate() {
                    Some(address) => {
                        let raw = address.get();
                        let lowest_free = (1..=127u8).find(|a| !model.contains(a));
                        prop_assert_eq!(Some(raw), lowest_free);
                        prop_assert!(model.insert(raw));
                    }
                    None => prop_assert_eq!(model.len(), 127),
                },
                Op::FreeNth(nth) => {
                    let live: Vec<u8> = model
                        .iter()
                        .copied()
                        .filter(|raw| *raw != UsbAddress::ROOT_HUB.get())
                        .collect();
                    if live.is_empty() {
                        continue;
                    }
                    let raw = live[nth % live.len()];
                    let address = UsbAddress::new(raw).unwrap();
                    pool.free(address);
                    model.remove(&raw);
                    prop_assert!(!pool.is_used(address));
                }
                Op::Reserve(raw) => match UsbAddress::new(*raw) {
                    Some(address) => {
                        let was_free = pool.reserve(address);
                        prop_assert_eq!(was_free, model.insert(address.get()));
                    }
                    None => prop_assert!(*raw == 0 || *raw > 127),
                },
            }
            prop_assert_eq!(pool.live(), model.len());
        }

        for raw in 1..=127u8 {
            let address = UsbAddress::new(raw).unwrap();
            prop_assert_eq!(pool.is_used(address), model.contains(&raw));
        }
    }
}
