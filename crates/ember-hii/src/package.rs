//! Package and package-list value types. Package payloads stay opaque
//! byte blobs here; the database files and ships them, it never interprets
//! string or font content.

use ember_platform::Guid;

/// Wire type codes for the package kinds the database files.
const KIND_GUID: u8 = 0x01;
const KIND_FORMS: u8 = 0x02;
const KIND_STRINGS: u8 = 0x04;
const KIND_FONTS: u8 = 0x05;
const KIND_IMAGES: u8 = 0x06;
const KIND_SIMPLE_FONTS: u8 = 0x07;
const KIND_DEVICE_PATH: u8 = 0x08;
const KIND_KEYBOARD_LAYOUT: u8 = 0x09;
const KIND_ANIMATIONS: u8 = 0x0a;

/// Terminator package type closing every exported list.
pub(crate) const KIND_END: u8 = 0xdf;

/// What a package claims to carry. The database treats all kinds alike;
/// the enumeration exists for filtered listing and notify registration.
/// Codes nothing here names ride along as [`PackageKind::Other`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PackageKind {
    Guid,
    Forms,
    Strings,
    Fonts,
    Images,
    SimpleFonts,
    DevicePath,
    KeyboardLayout,
    Animations,
    Other(u8),
}

impl PackageKind {
    pub fn raw(self) -> u8 {
        match self {
            PackageKind::Guid => KIND_GUID,
            PackageKind::Forms => KIND_FORMS,
            PackageKind::Strings => KIND_STRINGS,
            PackageKind::Fonts => KIND_FONTS,
            PackageKind::Images => KIND_IMAGES,
            PackageKind::SimpleFonts => KIND_SIMPLE_FONTS,
            PackageKind::DevicePath => KIND_DEVICE_PATH,
            PackageKind::KeyboardLayout => KIND_KEYBOARD_LAYOUT,
            PackageKind::Animations => KIND_ANIMATIONS,
            PackageKind::Other(code) => code,
        }
    }

    pub fn from_raw(code: u8) -> Self {
        match code {
            KIND_GUID => PackageKind::Guid,
            KIND_FORMS => PackageKind::Forms,
            KIND_STRINGS => PackageKind::Strings,
            KIND_FONTS => PackageKind::Fonts,
            KIND_IMAGES => PackageKind::Images,
            KIND_SIMPLE_FONTS => PackageKind::SimpleFonts,
            KIND_DEVICE_PATH => PackageKind::DevicePath,
            KIND_KEYBOARD_LAYOUT => PackageKind::KeyboardLayout,
            KIND_ANIMATIONS => PackageKind::Animations,
            other => PackageKind::Other(other),
        }
    }
}

/// One package: a kind plus its body, header excluded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Package {
    pub kind: PackageKind,
    pub data: Vec<u8>,
}

/// A GUID-named collection of packages, the unit the database stores,
/// exports and notifies about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageList {
    pub guid: Guid,
    pub packages: Vec<Package>,
}

impl PackageList {
    pub fn new(guid: Guid) -> Self {
        Self {
            guid,
            packages: Vec::new(),
        }
    }

    pub fn with_package(mut self, kind: PackageKind, data: Vec<u8>) -> Self {
        self.packages.push(Package { kind, data });
        self
    }

    /// True when some package carries `kind`.
    pub fn contains_kind(&self, kind: PackageKind) -> bool {
        self.packages.iter().any(|package| package.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_kinds_round_trip_through_their_codes() {
        for kind in [
            PackageKind::Guid,
            PackageKind::Forms,
            PackageKind::Strings,
            PackageKind::Fonts,
            PackageKind::Images,
            PackageKind::SimpleFonts,
            PackageKind::DevicePath,
            PackageKind::KeyboardLayout,
            PackageKind::Animations,
        ] {
            assert_eq!(PackageKind::from_raw(kind.raw()), kind);
        }
    }

    #[test]
    fn unknown_codes_normalize_to_other() {
        assert_eq!(PackageKind::from_raw(0x7b), PackageKind::Other(0x7b));
        assert_eq!(PackageKind::Other(0x7b).raw(), 0x7b);
        // A code with a name never hides inside Other.
        assert_eq!(PackageKind::from_raw(0x04), PackageKind::Strings);
    }
}
