//! The package-list store. Lists live under monotonic handles, GUIDs are
//! unique across installed lists, and every mutation fans out to the notify
//! registrations matching the touched package kinds.

use std::collections::BTreeMap;

use ember_platform::{EventSender, Guid, Handle, HandleAllocator};

use crate::error::{HiiError, Result};
use crate::package::{PackageKind, PackageList};
use crate::wire;

/// Opaque name of an installed package list or a notify registration. Both
/// come out of one allocator, so a handle can never mean two things.
pub type HiiHandle = Handle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageChange {
    Added,
    Removed,
    Updated,
}

/// One delivery to a notify registration: which list changed, which package
/// kind matched, and how. Content travels separately, through export.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackageNotify {
    pub handle: HiiHandle,
    pub kind: PackageKind,
    pub change: PackageChange,
}

struct NotifyRegistration {
    kind: PackageKind,
    sender: EventSender<PackageNotify>,
}

#[derive(Default)]
pub struct HiiDatabase {
    lists: BTreeMap<HiiHandle, PackageList>,
    notifies: BTreeMap<HiiHandle, NotifyRegistration>,
    handles: HandleAllocator,
}

impl HiiDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a list under a fresh handle. The GUID names the list to the
    /// outside world, so a second list with the same GUID is refused rather
    /// than shadowed.
    pub fn new_package_list(&mut self, list: PackageList) -> Result<HiiHandle> {
        Self::check_sizes(&list)?;
        if self.guid_in_use(list.guid, None) {
            return Err(HiiError::DuplicateGuid);
        }
        let handle = self.handles.alloc();
        tracing::debug!(
            handle = handle.as_u32(),
            guid = %list.guid,
            packages = list.packages.len(),
            "package list installed"
        );
        self.notify_each(handle, &list, PackageChange::Added);
        self.lists.insert(handle, list);
        Ok(handle)
    }

    pub fn remove_package_list(&mut self, handle: HiiHandle) -> Result<()> {
        let list = self.lists.remove(&handle).ok_or(HiiError::NotFound)?;
        tracing::debug!(handle = handle.as_u32(), guid = %list.guid, "package list removed");
        self.notify_each(handle, &list, PackageChange::Removed);
        Ok(())
    }

    /// Replaces the list under `handle` wholesale, GUID included.
    pub fn update_package_list(&mut self, handle: HiiHandle, list: PackageList) -> Result<()> {
        Self::check_sizes(&list)?;
        if !self.lists.contains_key(&handle) {
            return Err(HiiError::NotFound);
        }
        if self.guid_in_use(list.guid, Some(handle)) {
            return Err(HiiError::DuplicateGuid);
        }
        self.notify_each(handle, &list, PackageChange::Updated);
        self.lists.insert(handle, list);
        Ok(())
    }

    /// Handles of every list carrying at least one package of `kind`, or
    /// all lists when no filter is given. Ascending handle order, which is
    /// installation order.
    pub fn list_package_lists(&self, kind: Option<PackageKind>) -> Vec<HiiHandle> {
        self.lists
            .iter()
            .filter(|(_, list)| kind.map_or(true, |kind| list.contains_kind(kind)))
            .map(|(handle, _)| *handle)
            .collect()
    }

    pub fn package_list(&self, handle: HiiHandle) -> Option<&PackageList> {
        self.lists.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Serializes one list, or every installed list in handle order, into
    /// the wire shape [`crate::wire::parse`] reverses.
    pub fn export_package_lists(&self, only: Option<HiiHandle>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match only {
            Some(handle) => {
                let list = self.lists.get(&handle).ok_or(HiiError::NotFound)?;
                wire::export_list(list, &mut out);
            }
            None => {
                for list in self.lists.values() {
                    wire::export_list(list, &mut out);
                }
            }
        }
        Ok(out)
    }

    /// Subscribes `sender` to changes touching packages of `kind`. The
    /// returned handle unregisters it.
    pub fn register_package_notify(
        &mut self,
        kind: PackageKind,
        sender: EventSender<PackageNotify>,
    ) -> HiiHandle {
        let handle = self.handles.alloc();
        self.notifies.insert(handle, NotifyRegistration { kind, sender });
        handle
    }

    pub fn unregister_package_notify(&mut self, handle: HiiHandle) -> Result<()> {
        self.notifies
            .remove(&handle)
            .map(|_| ())
            .ok_or(HiiError::NotFound)
    }

    fn check_sizes(list: &PackageList) -> Result<()> {
        if list
            .packages
            .iter()
            .any(|package| package.data.len() > wire::PACKAGE_DATA_MAX)
        {
            return Err(HiiError::TooLarge);
        }
        Ok(())
    }

    fn guid_in_use(&self, guid: Guid, except: Option<HiiHandle>) -> bool {
        self.lists
            .iter()
            .any(|(handle, list)| except != Some(*handle) && list.guid == guid)
    }

    /// One delivery per (package, matching registration): packages in list
    /// order, registrations in registration order within each package.
    fn notify_each(&self, handle: HiiHandle, list: &PackageList, change: PackageChange) {
        for package in &list.packages {
            for registration in self.notifies.values() {
                if registration.kind == package.kind {
                    registration.sender.send(PackageNotify {
                        handle,
                        kind: package.kind,
                        change,
                    });
                }
            }
        }
    }
}
