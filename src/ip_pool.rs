use crate::error::{Error, Result};
use std::net::Ipv4Addr;

/// Allocate the first free host address in `subnet_cidr`.
///
/// Addresses are enumerated in ascending order from the masked network
/// address. The network and broadcast addresses are excluded, and the
/// first usable address is reserved for the gateway, so a `/24` hands out
/// `.2` through `.254`. Subnets with fewer than three host addresses
/// (`/31`, `/32`) never allocate.
pub fn allocate(subnet_cidr: &str, assigned: &[Ipv4Addr]) -> Result<Ipv4Addr> {
    let (base, size) = subnet_bounds(subnet_cidr)?;
    // offset 0 is the network address, 1 the gateway, size-1 the broadcast
    for off in 2..size.saturating_sub(1) {
        let candidate = Ipv4Addr::from(base + off as u32);
        if !assigned.contains(&candidate) {
            return Ok(candidate);
        }
    }
    Err(Error::AllocationExhausted)
}

/// First usable address of the subnet, permanently reserved for the
/// gateway.
pub fn gateway(subnet_cidr: &str) -> Result<Ipv4Addr> {
    let (base, size) = subnet_bounds(subnet_cidr)?;
    if size <= 2 {
        return Err(Error::AllocationExhausted);
    }
    Ok(Ipv4Addr::from(base + 1))
}

/// Gateway address with the subnet prefix, e.g. `10.0.0.1/24`, as
/// assigned to the tunnel interface itself.
pub fn gateway_cidr(subnet_cidr: &str) -> Result<String> {
    let prefix = subnet_cidr
        .split_once('/')
        .map(|(_, p)| p)
        .ok_or_else(|| invalid(subnet_cidr, "missing prefix length"))?;
    Ok(format!("{}/{}", gateway(subnet_cidr)?, prefix))
}

/// Whether `addr` is an address `allocate` could ever hand out: inside
/// the subnet and none of the network, gateway or broadcast addresses.
/// Caller-chosen addresses must pass this check too.
pub fn is_allocatable(subnet_cidr: &str, addr: Ipv4Addr) -> Result<bool> {
    let (base, size) = subnet_bounds(subnet_cidr)?;
    let a = u64::from(u32::from(addr));
    let base = u64::from(base);
    Ok(a >= base + 2 && a + 1 < base + size)
}

/// Parse the `/32` host entries clients carry back into plain addresses.
/// Entries that do not parse are ignored; the pool treats them as not
/// assigned.
pub fn assigned_addresses<'a>(cidrs: impl Iterator<Item = &'a str>) -> Vec<Ipv4Addr> {
    cidrs
        .filter_map(|c| c.split('/').next())
        .filter_map(|ip| ip.parse().ok())
        .collect()
}

fn subnet_bounds(subnet_cidr: &str) -> Result<(u32, u64)> {
    let (addr, prefix) = subnet_cidr
        .split_once('/')
        .ok_or_else(|| invalid(subnet_cidr, "missing prefix length"))?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| invalid(subnet_cidr, "bad network address"))?;
    let prefix: u8 = prefix
        .parse()
        .ok()
        .filter(|p| *p <= 32)
        .ok_or_else(|| invalid(subnet_cidr, "prefix must be 0..=32"))?;
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    let size = 1u64 << (32 - prefix);
    Ok((u32::from(addr) & mask, size))
}

fn invalid(subnet: &str, why: &str) -> Error {
    Error::Config(format!("invalid client subnet {subnet:?}: {why}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_network_address() {
        // subnet given with host bits set still enumerates from the base
        let ip = allocate("10.0.0.77/24", &[]).unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn rejects_malformed_subnets() {
        assert!(allocate("10.0.0.0", &[]).is_err());
        assert!(allocate("10.0.0.0/33", &[]).is_err());
        assert!(allocate("banana/24", &[]).is_err());
    }

    #[test]
    fn is_allocatable_excludes_reserved_addresses() {
        assert!(is_allocatable("10.0.0.0/24", Ipv4Addr::new(10, 0, 0, 2)).unwrap());
        assert!(is_allocatable("10.0.0.0/24", Ipv4Addr::new(10, 0, 0, 254)).unwrap());
        // network, gateway, broadcast, out of subnet
        assert!(!is_allocatable("10.0.0.0/24", Ipv4Addr::new(10, 0, 0, 0)).unwrap());
        assert!(!is_allocatable("10.0.0.0/24", Ipv4Addr::new(10, 0, 0, 1)).unwrap());
        assert!(!is_allocatable("10.0.0.0/24", Ipv4Addr::new(10, 0, 0, 255)).unwrap());
        assert!(!is_allocatable("10.0.0.0/24", Ipv4Addr::new(10, 0, 1, 1)).unwrap());
    }

    #[test]
    fn gateway_cidr_keeps_prefix() {
        assert_eq!(gateway_cidr("10.0.0.0/24").unwrap(), "10.0.0.1/24");
    }
}
