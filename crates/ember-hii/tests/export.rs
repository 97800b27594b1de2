//! Wire-shape pinning: the export byte layout is a contract with external
//! consumers, so one test spells it out by hand.

use ember_hii::{parse, HiiDatabase, Package, PackageKind, PackageList};
use ember_platform::Guid;

#[test]
fn export_matches_the_hand_assembled_wire_shape() {
    let guid = Guid::new(0x1122_3344, 0x5566, 0x7788, [1, 2, 3, 4, 5, 6, 7, 8]);
    let mut db = HiiDatabase::new();
    db.new_package_list(
        PackageList::new(guid).with_package(PackageKind::Strings, vec![0xaa, 0xbb]),
    )
    .unwrap();

    #[rustfmt::skip]
    let expected: Vec<u8> = vec![
        // GUID: little-endian u32, two little-endian u16s, eight raw bytes.
        0x44, 0x33, 0x22, 0x11, 0x66, 0x55, 0x88, 0x77, 1, 2, 3, 4, 5, 6, 7, 8,
        // List length: 20-byte header + 6-byte package + 4-byte end.
        30, 0, 0, 0,
        // Strings package: length 6 in bits 0..24, type 0x04 in bits 24..32.
        0x06, 0x00, 0x00, 0x04,
        0xaa, 0xbb,
        // End package: length 4, type 0xdf.
        0x04, 0x00, 0x00, 0xdf,
    ];
    assert_eq!(db.export_package_lists(None).unwrap(), expected);

    let lists = parse(&expected).unwrap();
    assert_eq!(
        lists,
        vec![PackageList {
            guid,
            packages: vec![Package {
                kind: PackageKind::Strings,
                data: vec![0xaa, 0xbb],
            }],
        }]
    );
}

#[test]
fn an_empty_store_exports_no_bytes() {
    let db = HiiDatabase::new();
    assert_eq!(db.export_package_lists(None).unwrap(), Vec::<u8>::new());
    assert_eq!(parse(&[]).unwrap(), Vec::<PackageList>::new());
}
