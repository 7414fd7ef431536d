use std::collections::HashMap;

use crate::radio::model::{DeviceId, ServiceDescriptor};

/// Last-known discovered services per device.
///
/// Deliberately unbounded with no TTL: entries live until explicitly
/// invalidated or overwritten by a fresh discovery.
#[derive(Debug, Default)]
pub(crate) struct ServiceCache {
    entries: HashMap<DeviceId, Vec<ServiceDescriptor>>,
}

impl ServiceCache {
    pub(crate) fn get(&self, device: &DeviceId) -> Option<&[ServiceDescriptor]> {
        self.entries.get(device).map(Vec::as_slice)
    }

    pub(crate) fn put(&mut self, device: DeviceId, services: Vec<ServiceDescriptor>) {
        self.entries.insert(device, services);
    }

    pub(crate) fn invalidate(&mut self, device: &DeviceId) -> bool {
        self.entries.remove(device).is_some()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn services() -> Vec<ServiceDescriptor> {
        vec![
            ServiceDescriptor::new("180f", true),
            ServiceDescriptor::new("180a", false),
        ]
    }

    #[test]
    fn put_overwrites_previous_entry() {
        let mut cache = ServiceCache::default();
        cache.put("AA".into(), services());
        cache.put("AA".into(), vec![ServiceDescriptor::new("1800", true)]);

        let cached = cache.get(&"AA".into()).expect("entry should exist");
        assert_eq!(1, cached.len());
        assert_eq!("1800", cached[0].uuid());
    }

    #[test]
    fn invalidate_removes_only_the_named_device() {
        let mut cache = ServiceCache::default();
        cache.put("AA".into(), services());
        cache.put("BB".into(), services());

        assert!(cache.invalidate(&"AA".into()));
        assert!(!cache.invalidate(&"AA".into()));
        assert!(cache.get(&"AA".into()).is_none());
        assert!(cache.get(&"BB".into()).is_some());

        cache.clear();
        assert!(cache.get(&"BB".into()).is_none());
    }
}
