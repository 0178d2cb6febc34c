//! Picking the client address to count.
//!
//! Behind a load balancer the peer address is the balancer, not the client;
//! the client rides in `X-Forwarded-For`. These helpers take the first
//! *public* address out of that chain and fall back to the peer address,
//! refusing to trust private or special-use ranges from the header, since any
//! client can type those in.
//!
//! Only consult the forwarded chain when the balancer overwrites or appends
//! to the header; if clients can set it freely, the peer address is the only
//! honest input.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Whether `ip` is routable on the public internet.
///
/// Loopback, unspecified, link-local, multicast, the RFC 1918 blocks (10/8,
/// 172.16/12, 192.168/16) and unique-local v6 (fc00::/7) are all private.
/// v4-mapped v6 addresses are judged as their v4 form.
pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => is_public_v6(v6),
    }
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_unspecified())
}

fn is_public_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_public_v4(v4);
    }
    if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() {
        return false;
    }
    // fc00::/7 unique local, fe80::/10 link local.
    let head = ip.segments()[0];
    head & 0xfe00 != 0xfc00 && head & 0xffc0 != 0xfe80
}

/// First public address in an `X-Forwarded-For` value
/// (`"client, proxy1, proxy2"`). `None` when no entry parses as a public
/// address.
pub fn forwarded_client_ip(forwarded_for: &str) -> Option<IpAddr> {
    forwarded_for
        .split(',')
        .map(str::trim)
        .filter_map(|entry| entry.parse::<IpAddr>().ok())
        .find(|ip| is_public_ip(*ip))
}

/// Best-effort client identifier for rate limiting.
///
/// The first public address from `forwarded_for` wins when the header is
/// present and yields one; otherwise the host part of `remote_addr`
/// (`"203.0.113.9:4711"` becomes `"203.0.113.9"`). The peer fallback is not
/// filtered for publicness: a directly connected peer is whoever it is, even
/// on loopback.
pub fn client_address(remote_addr: &str, forwarded_for: Option<&str>) -> Option<String> {
    if let Some(chain) = forwarded_for {
        if let Some(ip) = forwarded_client_ip(chain) {
            return Some(ip.to_string());
        }
    }
    remote_addr.parse::<SocketAddr>().ok().map(|peer| peer.ip().to_string())
}
