// Copyright 2026 The Vimana Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use core::net::IpAddr;

use pretty_assertions::assert_eq;
use workd_error::{Code, Error};
use workd_runtime::error::PodPoolError;
use workd_runtime::ipam::{IpAllocator, SubnetIpAllocator};

fn ip(raw: &str) -> IpAddr {
    raw.parse().unwrap()
}

#[test]
fn hands_out_lowest_free_host_address() -> Result<(), Error> {
    let allocator = SubnetIpAllocator::new("10.1.0.0/29", &["10.1.0.2".to_string()])?;
    assert_eq!(allocator.allocate()?, ip("10.1.0.1"));
    assert_eq!(allocator.allocate()?, ip("10.1.0.3"));
    assert_eq!(allocator.allocate()?, ip("10.1.0.4"));

    allocator.release(ip("10.1.0.1"));
    assert_eq!(allocator.allocate()?, ip("10.1.0.1"));
    assert_eq!(allocator.allocate()?, ip("10.1.0.5"));
    Ok(())
}

#[test]
fn exhausted_subnet_is_reported() -> Result<(), Error> {
    // A /30 has two usable hosts.
    let allocator = SubnetIpAllocator::new("192.168.7.0/30", &[])?;
    assert_eq!(allocator.allocate()?, ip("192.168.7.1"));
    assert_eq!(allocator.allocate()?, ip("192.168.7.2"));
    let err = allocator.allocate().unwrap_err();
    assert!(matches!(err, PodPoolError::ResourceExhausted(_)));
    assert_eq!(Error::from(err).code, Code::ResourceExhausted);
    Ok(())
}

#[test]
fn host_bits_are_masked_off_the_subnet() -> Result<(), Error> {
    let allocator = SubnetIpAllocator::new("10.9.8.77/24", &[])?;
    assert_eq!(allocator.allocate()?, ip("10.9.8.1"));
    Ok(())
}

#[test]
fn ipv6_skips_subnet_router_anycast() -> Result<(), Error> {
    let allocator = SubnetIpAllocator::new("fd00:10::/120", &[])?;
    assert_eq!(allocator.allocate()?, ip("fd00:10::1"));
    assert_eq!(allocator.allocate()?, ip("fd00:10::2"));
    Ok(())
}

#[test]
fn releasing_unknown_addresses_is_ignored() -> Result<(), Error> {
    let allocator = SubnetIpAllocator::new("10.1.0.0/30", &[])?;
    allocator.release(ip("10.1.0.1"));
    allocator.release(ip("172.16.0.1"));
    allocator.release(ip("::1"));
    assert_eq!(allocator.allocate()?, ip("10.1.0.1"));
    Ok(())
}

#[test]
fn invalid_configuration_is_rejected() {
    for (subnet, reserved) in [
        ("10.0.0.0", vec![]),
        ("10.0.0.0/33", vec![]),
        ("not-an-ip/24", vec![]),
        ("10.0.0.0/24", vec!["10.0.1.1".to_string()]),
        ("10.0.0.0/24", vec!["fd00::1".to_string()]),
    ] {
        let err = SubnetIpAllocator::new(subnet, &reserved).unwrap_err();
        assert_eq!(err.code, Code::InvalidArgument, "{subnet} {reserved:?}");
    }
}
