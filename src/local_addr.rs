use crate::address::Address;
use pnet::datalink;
use std::collections::BTreeSet;

/// Addresses owned by this host, snapshotted at startup.
///
/// Interface changes while running are not tracked.
#[derive(Debug, Clone, Default)]
pub struct LocalAddrs {
    addrs: BTreeSet<Address>,
}

impl LocalAddrs {
    pub fn from_interfaces() -> Self {
        let addrs: BTreeSet<Address> = datalink::interfaces()
            .iter()
            .flat_map(|iface| iface.ips.iter().map(|net| Address::from(net.ip())))
            .collect();

        let local = Self { addrs };
        if local.is_empty() {
            log::warn!("No local interface addresses, every packet will be undetermined");
        } else {
            log::info!("Found {} local interface addresses", local.len());
        }
        local
    }

    pub fn from_addrs<I>(addrs: I) -> Self
    where
        I: IntoIterator<Item = Address>,
    {
        Self {
            addrs: addrs.into_iter().collect(),
        }
    }

    pub fn is_local(&self, addr: &Address) -> bool {
        self.addrs.contains(addr)
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership() {
        let local = LocalAddrs::from_addrs([
            Address::from_v4_bytes([127, 0, 0, 1]),
            Address::from_v4_bytes([192, 168, 0, 8]),
        ]);
        assert_eq!(local.len(), 2);
        assert!(local.is_local(&Address::from_v4_bytes([192, 168, 0, 8])));
        assert!(!local.is_local(&Address::from_v4_bytes([192, 168, 0, 9])));
    }

    #[test]
    fn test_host_has_loopback() {
        let local = LocalAddrs::from_interfaces();
        assert!(local.is_local(&Address::from_v4_bytes([127, 0, 0, 1])));
    }
}
