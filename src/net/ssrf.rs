//! DNS resolution guard: every outbound request is dialed through this
//! resolver, which filters results down to globally routable addresses.
//!
//! Plugged into the shared [`reqwest::Client`] via
//! [`reqwest::ClientBuilder::dns_resolver`] rather than patching a
//! process-global lookup function. A Tokio task-local flag lets a single
//! logical region of work (a test, or fetching a site the caller just
//! submitted) resolve to non-global addresses without affecting concurrent
//! work on other tasks.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use reqwest::dns::{Addrs, Resolve, Resolving};

tokio::task_local! {
    static ALLOW_NON_GLOBAL: ();
}

/// Runs `fut` with the SSRF guard relaxed to allow non-global addresses for
/// every resolution performed within it. Scoped to the current task only.
pub async fn with_non_global_allowed<F, T>(fut: F) -> T
where
    F: Future<Output = T>,
{
    ALLOW_NON_GLOBAL.scope((), fut).await
}

fn non_global_allowed() -> bool {
    ALLOW_NON_GLOBAL.try_with(|_| ()).is_ok()
}

/// Returns true if `ip` is publicly routable: not loopback, link-local,
/// private, multicast, unspecified, or otherwise reserved. An IPv6 address
/// that embeds an IPv4 address (mapped `::ffff:a.b.c.d` or the deprecated
/// compatible `::a.b.c.d` form) is classified by that embedded address,
/// matching `ipaddress.ip_address(ip).is_global`'s handling in the system
/// this was modeled on — otherwise an address like `::ffff:127.0.0.1` slips
/// past every IPv6 check here and reads as global.
pub fn is_global(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_global_v4(v4),
        IpAddr::V6(v6) => match embedded_ipv4(v6) {
            Some(v4) => is_global_v4(v4),
            None => {
                !(v6.is_loopback()
                    || v6.is_multicast()
                    || v6.is_unspecified()
                    || is_unique_local(v6)
                    || is_unicast_link_local(v6))
            }
        },
    }
}

fn is_global_v4(v4: std::net::Ipv4Addr) -> bool {
    !(v4.is_loopback()
        || v4.is_link_local()
        || v4.is_private()
        || v4.is_multicast()
        || v4.is_unspecified()
        || v4.is_broadcast()
        || v4.is_documentation()
        || is_carrier_grade_nat(v4)
        || is_benchmarking(v4)
        || is_reserved(v4))
}

fn is_carrier_grade_nat(v4: std::net::Ipv4Addr) -> bool {
    "100.64.0.0/10".parse::<ipnet::IpNet>().unwrap().contains(&v4)
}

fn is_benchmarking(v4: std::net::Ipv4Addr) -> bool {
    "198.18.0.0/15".parse::<ipnet::IpNet>().unwrap().contains(&v4)
}

/// `240.0.0.0/4`, the "reserved for future use" block (and the all-ones
/// broadcast `255.255.255.255` already caught by `is_broadcast`).
fn is_reserved(v4: std::net::Ipv4Addr) -> bool {
    "240.0.0.0/4".parse::<ipnet::IpNet>().unwrap().contains(&v4)
}

fn is_unique_local(v6: std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}

fn is_unicast_link_local(v6: std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xffc0) == 0xfe80
}

/// Extracts the embedded IPv4 address from an IPv4-mapped (`::ffff:0:0/96`)
/// or IPv4-compatible (deprecated `::0.0.0.0/96`, excluding `::` and `::1`
/// themselves) IPv6 address.
fn embedded_ipv4(v6: std::net::Ipv6Addr) -> Option<std::net::Ipv4Addr> {
    let o = v6.octets();

    if o[..10] == [0; 10] && o[10] == 0xff && o[11] == 0xff {
        return Some(std::net::Ipv4Addr::new(o[12], o[13], o[14], o[15]));
    }

    if o[..12] == [0; 12] && !v6.is_unspecified() && !v6.is_loopback() {
        return Some(std::net::Ipv4Addr::new(o[12], o[13], o[14], o[15]));
    }

    None
}

/// A [`reqwest::dns::Resolve`] implementation backed by `hickory-resolver`
/// that drops every non-global address from its answer before handing
/// results back to the HTTP client's dialer.
#[derive(Clone)]
pub struct GlobalOnlyResolver {
    inner: Arc<TokioAsyncResolver>,
}

impl GlobalOnlyResolver {
    pub fn from_system_config() -> Result<Self, hickory_resolver::error::ResolveError> {
        let (config, mut opts) = hickory_resolver::system_conf::read_system_conf()
            .map(|(c, o)| (c, o))
            .unwrap_or_else(|_| (ResolverConfig::default(), ResolverOpts::default()));
        opts.ip_strategy = hickory_resolver::config::LookupIpStrategy::Ipv4AndIpv6;

        Ok(Self {
            inner: Arc::new(TokioAsyncResolver::tokio(config, opts)),
        })
    }
}

impl Resolve for GlobalOnlyResolver {
    fn resolve(&self, name: reqwest::dns::Name) -> Resolving {
        let resolver = self.inner.clone();
        let allow_non_global = non_global_allowed();

        Box::pin(async move {
            let lookup = resolver.lookup_ip(name.as_str()).await?;

            let filtered: Vec<SocketAddr> = lookup
                .iter()
                .filter(|ip| allow_non_global || is_global(*ip))
                .map(|ip| SocketAddr::new(ip, 0))
                .collect();

            let addrs: Addrs = Box::new(filtered.into_iter());
            Ok(addrs)
        }) as Pin<Box<dyn Future<Output = Result<Addrs, Box<dyn std::error::Error + Send + Sync>>> + Send>>
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::net::Ipv6Addr;

    #[test]
    fn loopback_is_not_global() {
        assert!(!is_global(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(!is_global(IpAddr::V6(Ipv6Addr::LOCALHOST)));
    }

    #[test]
    fn private_ranges_are_not_global() {
        assert!(!is_global(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert!(!is_global(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))));
        assert!(!is_global(IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1))));
    }

    #[test]
    fn link_local_is_not_global() {
        assert!(!is_global(IpAddr::V4(Ipv4Addr::new(169, 254, 169, 254))));
    }

    #[test]
    fn public_addresses_are_global() {
        assert!(is_global(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))));
        assert!(is_global(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
    }

    #[test]
    fn reserved_v4_block_is_not_global() {
        assert!(!is_global(IpAddr::V4(Ipv4Addr::new(240, 0, 0, 1))));
    }

    #[test]
    fn ipv4_mapped_loopback_is_not_global() {
        let mapped: Ipv6Addr = "::ffff:127.0.0.1".parse().unwrap();
        assert!(!is_global(IpAddr::V6(mapped)));
    }

    #[test]
    fn ipv4_mapped_private_is_not_global() {
        let mapped: Ipv6Addr = "::ffff:10.0.0.1".parse().unwrap();
        assert!(!is_global(IpAddr::V6(mapped)));
    }

    #[test]
    fn ipv4_mapped_public_is_global() {
        let mapped: Ipv6Addr = "::ffff:8.8.8.8".parse().unwrap();
        assert!(is_global(IpAddr::V6(mapped)));
    }

    #[test]
    fn ipv4_compatible_loopback_is_not_global() {
        let compatible = Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0x7f00, 0x0001);
        assert!(!is_global(IpAddr::V6(compatible)));
    }

    #[test]
    fn unspecified_and_loopback_v6_are_not_mistaken_for_embedded_v4() {
        assert!(!is_global(IpAddr::V6(Ipv6Addr::UNSPECIFIED)));
        assert!(!is_global(IpAddr::V6(Ipv6Addr::LOCALHOST)));
    }

    #[tokio::test]
    async fn override_scope_is_task_local() {
        assert!(!non_global_allowed());
        with_non_global_allowed(async {
            assert!(non_global_allowed());
        })
        .await;
        assert!(!non_global_allowed());
    }
}
