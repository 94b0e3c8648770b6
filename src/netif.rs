use pnet::datalink;
use std::net::{IpAddr, Ipv4Addr};

/// Returns the IPv4 form of an address that can be annotated: IPv4 (or IPv4-mapped IPv6)
/// and not loopback.
pub fn annotatable(ip: IpAddr) -> Option<Ipv4Addr> {
    let v4 = match ip {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(v6) => v6.to_ipv4_mapped()?,
    };
    (!v4.is_loopback()).then_some(v4)
}

/// Something that can list the local addresses to annotate. The list is evaluated at each call.
pub trait AddressSource: Send + Sync {
    fn addresses(&self) -> Vec<Ipv4Addr>;
}

/// The addresses of the local network interfaces
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAddresses;

impl AddressSource for SystemAddresses {
    fn addresses(&self) -> Vec<Ipv4Addr> {
        let all = datalink::interfaces()
            .into_iter()
            .flat_map(|iface| iface.ips.into_iter().map(|net| net.ip()));
        let addresses = filter_annotatable(all);
        log::debug!("IPv4 interfaces: {:?}", &addresses);
        addresses
    }
}

impl<F> AddressSource for F
where
    F: Fn() -> Vec<Ipv4Addr> + Send + Sync,
{
    fn addresses(&self) -> Vec<Ipv4Addr> {
        self()
    }
}

/// Keeps annotatable addresses, each once, in their original order.
pub fn filter_annotatable(ips: impl IntoIterator<Item = IpAddr>) -> Vec<Ipv4Addr> {
    let mut addresses: Vec<Ipv4Addr> = Vec::new();
    for ip in ips.into_iter().filter_map(annotatable) {
        if !addresses.contains(&ip) {
            addresses.push(ip);
        }
    }
    addresses
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_annotatable() {
        assert_eq!(
            annotatable(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))),
            Some(Ipv4Addr::new(10, 1, 2, 3))
        );
        assert_eq!(annotatable(IpAddr::V4(Ipv4Addr::LOCALHOST)), None);
        assert_eq!(annotatable(IpAddr::V6(Ipv6Addr::LOCALHOST)), None);
        assert_eq!(
            annotatable(IpAddr::V6("fe80::1".parse().unwrap())),
            None
        );
        // the same address in another representation
        assert_eq!(
            annotatable(IpAddr::V6(Ipv4Addr::new(10, 1, 2, 3).to_ipv6_mapped())),
            Some(Ipv4Addr::new(10, 1, 2, 3))
        );
        assert_eq!(
            annotatable(IpAddr::V6(Ipv4Addr::LOCALHOST.to_ipv6_mapped())),
            None
        );
    }

    #[test]
    fn test_filter_dedup() {
        let ips = vec![
            "127.0.0.1".parse().unwrap(),
            "10.0.0.1".parse().unwrap(),
            "::ffff:10.0.0.1".parse().unwrap(),
            "fd00::1".parse().unwrap(),
            "192.168.0.7".parse().unwrap(),
        ];
        assert_eq!(
            filter_annotatable(ips),
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(192, 168, 0, 7)]
        );
    }

    #[test]
    fn test_closure_source() {
        let source = || vec![Ipv4Addr::new(10, 0, 0, 9)];
        assert_eq!(source.addresses(), vec![Ipv4Addr::new(10, 0, 0, 9)]);
    }

    #[test]
    fn test_system_addresses() {
        assert!(SystemAddresses
            .addresses()
            .iter()
            .all(|ip| !ip.is_loopback()));
    }
}
