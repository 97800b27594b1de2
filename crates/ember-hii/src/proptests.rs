use proptest::prelude::*;

use ember_platform::Guid;

use crate::database::{HiiDatabase, HiiHandle};
use crate::error::HiiError;
use crate::package::{Package, PackageKind, PackageList, KIND_END};
use crate::wire;

fn kind_strategy() -> BoxedStrategy<PackageKind> {
    any::<u8>()
        .prop_filter_map("end code is reserved", |code| {
            (code != KIND_END).then(|| PackageKind::from_raw(code))
        })
        .boxed()
}

fn package_strategy() -> BoxedStrategy<Package> {
    (kind_strategy(), prop::collection::vec(any::<u8>(), 0..48))
        .prop_map(|(kind, data)| Package { kind, data })
        .boxed()
}

fn packages_strategy() -> BoxedStrategy<Vec<Package>> {
    prop::collection::vec(package_strategy(), 0..6).boxed()
}

/// Lists get their GUIDs from an install counter so no run trips the
/// duplicate-GUID refusal.
fn list_with(tag: u32, packages: Vec<Package>) -> PackageList {
    let mut list = PackageList::new(Guid::new(tag, 0x6869, 0x6921, [0x45; 8]));
    list.packages = packages;
    list
}

#[derive(Debug, Clone)]
enum Op {
    Install(u8),
    RemoveNth(usize),
    UpdateNth(usize, u8),
}

fn op_strategy() -> BoxedStrategy<Op> {
    prop_oneof![
        4 => any::<u8>().prop_map(Op::Install),
        2 => (0usize..64).prop_map(Op::RemoveNth),
        2 => ((0usize..64), any::<u8>()).prop_map(|(nth, byte)| Op::UpdateNth(nth, byte)),
    ]
    .boxed()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    /// Export of the whole store parses back to exactly the installed
    /// lists, in handle order, package kinds and payloads intact.
    #[test]
    fn prop_export_parse_round_trip(sets in prop::collection::vec(packages_strategy(), 1..8)) {
        let mut db = HiiDatabase::new();
        let mut stored = Vec::new();
        for (tag, packages) in sets.into_iter().enumerate() {
            let list = list_with(tag as u32, packages);
            stored.push(list.clone());
            db.new_package_list(list).unwrap();
        }
        let bytes = db.export_package_lists(None).unwrap();
        prop_assert_eq!(wire::parse(&bytes).unwrap(), stored);
    }

    /// A single-handle export is byte-identical to that list's slice of the
    /// full export, so consumers can cache either form.
    #[test]
    fn prop_single_export_is_a_slice_of_the_full_export(
        sets in prop::collection::vec(packages_strategy(), 1..6)
    ) {
        let mut db = HiiDatabase::new();
        let mut handles = Vec::new();
        for (tag, packages) in sets.into_iter().enumerate() {
            handles.push(db.new_package_list(list_with(tag as u32, packages)).unwrap());
        }
        let full = db.export_package_lists(None).unwrap();
        let mut offset = 0;
        for handle in handles {
            let single = db.export_package_lists(Some(handle)).unwrap();
            prop_assert_eq!(&full[offset..offset + single.len()], single.as_slice());
            offset += single.len();
        }
        prop_assert_eq!(offset, full.len());
    }

    /// Runs arbitrary install/remove/update sequences against a vector
    /// model. Checks that handles only ever move forward, removed handles
    /// stay dead, and the store tracks the model exactly.
    #[test]
    fn prop_store_tracks_an_order_preserving_model(
        ops in prop::collection::vec(op_strategy(), 1..128)
    ) {
        let mut db = HiiDatabase::new();
        let mut live: Vec<(HiiHandle, PackageList)> = Vec::new();
        let mut installs = 0u32;
        let mut top = 0u32;

        for op in ops {
            match op {
                Op::Install(byte) => {
                    let list = list_with(
                        installs,
                        vec![Package { kind: PackageKind::Strings, data: vec![byte] }],
                    );
                    installs += 1;
                    let handle = db.new_package_list(list.clone()).unwrap();
                    prop_assert!(handle.as_u32() > top);
                    top = handle.as_u32();
                    live.push((handle, list));
                }
                Op::RemoveNth(nth) => {
                    if live.is_empty() {
                        continue;
                    }
                    let (handle, _) = live.remove(nth % live.len());
                    db.remove_package_list(handle).unwrap();
                    prop_assert_eq!(db.remove_package_list(handle), Err(HiiError::NotFound));
                }
                Op::UpdateNth(nth, byte) => {
                    if live.is_empty() {
                        continue;
                    }
                    let idx = nth % live.len();
                    let (handle, old) = live[idx].clone();
                    let replacement =
                        PackageList::new(old.guid).with_package(PackageKind::Forms, vec![byte]);
                    db.update_package_list(handle, replacement.clone()).unwrap();
                    live[idx] = (handle, replacement);
                }
            }

            prop_assert_eq!(db.len(), live.len());
            for (handle, list) in &live {
                prop_assert_eq!(db.package_list(*handle), Some(list));
            }
        }

        let mut expected: Vec<HiiHandle> = live.iter().map(|(handle, _)| *handle).collect();
        expected.sort();
        prop_assert_eq!(db.list_package_lists(None), expected);
    }
}
