use std::net::Ipv4Addr;
use wg_admin::error::Error;
use wg_admin::ip_pool;

#[test]
fn empty_subnet_allocates_second_usable_address() {
    // 10.0.0.0 is the network, 10.0.0.1 the gateway
    let ip = ip_pool::allocate("10.0.0.0/24", &[]).unwrap();
    assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 2));
}

#[test]
fn gateway_is_first_usable_address() {
    assert_eq!(
        ip_pool::gateway("10.0.0.0/24").unwrap(),
        Ipv4Addr::new(10, 0, 0, 1)
    );
}

#[test]
fn allocation_skips_assigned_addresses() {
    let assigned = vec![Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 3)];
    let ip = ip_pool::allocate("10.0.0.0/24", &assigned).unwrap();
    assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 4));

    // holes are filled in ascending order
    let assigned = vec![Ipv4Addr::new(10, 0, 0, 3)];
    let ip = ip_pool::allocate("10.0.0.0/24", &assigned).unwrap();
    assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 2));
}

#[test]
fn never_returns_gateway_or_duplicate_until_exhausted() {
    // /28 has hosts .1-.14; .1 is the gateway, 13 allocatable slots
    let mut assigned: Vec<Ipv4Addr> = Vec::new();
    let gateway = ip_pool::gateway("192.168.7.0/28").unwrap();
    for _ in 0..13 {
        let ip = ip_pool::allocate("192.168.7.0/28", &assigned).unwrap();
        assert_ne!(ip, gateway);
        assert!(!assigned.contains(&ip));
        assigned.push(ip);
    }
    let err = ip_pool::allocate("192.168.7.0/28", &assigned).unwrap_err();
    assert!(matches!(err, Error::AllocationExhausted));
}

#[test]
fn broadcast_address_never_allocated() {
    // /29: hosts .1-.6, broadcast .7
    let mut assigned: Vec<Ipv4Addr> = Vec::new();
    while let Ok(ip) = ip_pool::allocate("10.1.2.0/29", &assigned) {
        assert_ne!(ip, Ipv4Addr::new(10, 1, 2, 7));
        assert_ne!(ip, Ipv4Addr::new(10, 1, 2, 0));
        assigned.push(ip);
    }
    assert_eq!(assigned.len(), 5);
}

#[test]
fn tiny_subnets_yield_no_address() {
    for subnet in ["10.0.0.0/32", "10.0.0.0/31"] {
        let err = ip_pool::allocate(subnet, &[]).unwrap_err();
        assert!(matches!(err, Error::AllocationExhausted), "{subnet}");
        assert!(ip_pool::gateway(subnet).is_err(), "{subnet}");
    }
}

#[test]
fn slash30_has_a_single_client_slot() {
    let ip = ip_pool::allocate("10.0.0.0/30", &[]).unwrap();
    assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 2));
    let err = ip_pool::allocate("10.0.0.0/30", &[ip]).unwrap_err();
    assert!(matches!(err, Error::AllocationExhausted));
}

#[test]
fn assigned_addresses_parses_host_entries() {
    let cidrs = ["10.0.0.2/32", "10.0.0.9/32", "garbage", "10.0.0.300/32"];
    let parsed = ip_pool::assigned_addresses(cidrs.iter().copied());
    assert_eq!(
        parsed,
        vec![Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 9)]
    );
}
