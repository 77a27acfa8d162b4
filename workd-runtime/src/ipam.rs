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

use core::fmt::Debug;
use core::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::collections::{BTreeSet, HashSet};

use parking_lot::Mutex;
use tracing::{Level, event};
use workd_config::workd::IpamConfig;
use workd_error::{Error, ResultExt, error_if, make_input_err};

use crate::error::PodPoolError;

/// Hands out pod addresses. Calls are made while the pool holds an entry
/// lock, so implementations must not block.
pub trait IpAllocator: Send + Sync + Debug + 'static {
    fn allocate(&self) -> Result<IpAddr, PodPoolError>;

    /// Returns an address to the free set. Unknown addresses are ignored.
    fn release(&self, address: IpAddr);
}

/// Allocates the lowest free host address of a single CIDR block.
///
/// For IPv4 the network and broadcast addresses are never handed out (except
/// in /31 and /32 blocks, which have neither). For IPv6 the subnet-router
/// anycast address (host part all zeros) is skipped.
#[derive(Debug)]
pub struct SubnetIpAllocator {
    is_ipv4: bool,
    first: u128,
    last: u128,
    reserved: HashSet<u128>,
    allocated: Mutex<BTreeSet<u128>>,
}

impl SubnetIpAllocator {
    pub fn new(subnet: &str, reserved: &[String]) -> Result<Self, Error> {
        let (address, prefix_len) = subnet
            .split_once('/')
            .ok_or_else(|| make_input_err!("Subnet '{subnet}' is not in CIDR notation"))?;
        let address: IpAddr = address
            .parse()
            .err_tip(|| format!("Invalid subnet address in '{subnet}'"))?;
        let prefix_len: u32 = prefix_len
            .parse()
            .err_tip(|| format!("Invalid prefix length in '{subnet}'"))?;

        let (is_ipv4, bits, value) = match address {
            IpAddr::V4(v4) => (true, 32, u128::from(v4.to_bits())),
            IpAddr::V6(v6) => (false, 128, v6.to_bits()),
        };
        error_if!(
            prefix_len > bits,
            "Prefix length {prefix_len} too long for '{subnet}'"
        );
        let host_bits = bits - prefix_len;
        let host_mask = if host_bits == 128 {
            u128::MAX
        } else {
            (1u128 << host_bits) - 1
        };
        let network = value & !host_mask;
        let broadcast = network | host_mask;
        let (first, last) = match (is_ipv4, host_bits) {
            (true, 0 | 1) | (false, 0) => (network, broadcast),
            (true, _) => (network + 1, broadcast - 1),
            (false, _) => (network + 1, broadcast),
        };

        let reserved = reserved
            .iter()
            .map(|raw| -> Result<u128, Error> {
                let addr: IpAddr = raw
                    .parse()
                    .err_tip(|| format!("Invalid reserved address '{raw}'"))?;
                let offset = match (addr, is_ipv4) {
                    (IpAddr::V4(v4), true) => u128::from(v4.to_bits()),
                    (IpAddr::V6(v6), false) => v6.to_bits(),
                    _ => {
                        return Err(make_input_err!(
                            "Reserved address '{raw}' is not the same family as '{subnet}'"
                        ));
                    }
                };
                error_if!(
                    offset & !host_mask != network,
                    "Reserved address '{raw}' is outside of '{subnet}'"
                );
                Ok(offset)
            })
            .collect::<Result<HashSet<_>, Error>>()?;

        Ok(Self {
            is_ipv4,
            first,
            last,
            reserved,
            allocated: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn from_config(config: &IpamConfig) -> Result<Self, Error> {
        Self::new(&config.subnet, &config.reserved)
    }

    fn to_addr(&self, value: u128) -> IpAddr {
        if self.is_ipv4 {
            IpAddr::V4(Ipv4Addr::from_bits(value as u32))
        } else {
            IpAddr::V6(Ipv6Addr::from_bits(value))
        }
    }

    fn to_value(&self, address: IpAddr) -> Option<u128> {
        let value = match (address, self.is_ipv4) {
            (IpAddr::V4(v4), true) => u128::from(v4.to_bits()),
            (IpAddr::V6(v6), false) => v6.to_bits(),
            _ => return None,
        };
        (self.first..=self.last).contains(&value).then_some(value)
    }
}

impl IpAllocator for SubnetIpAllocator {
    fn allocate(&self) -> Result<IpAddr, PodPoolError> {
        let mut allocated = self.allocated.lock();
        let mut candidate = self.first;
        while allocated.contains(&candidate) || self.reserved.contains(&candidate) {
            if candidate == self.last {
                return Err(PodPoolError::ResourceExhausted(
                    "no free IP address left in pod subnet".to_string(),
                ));
            }
            candidate += 1;
        }
        allocated.insert(candidate);
        Ok(self.to_addr(candidate))
    }

    fn release(&self, address: IpAddr) {
        let released = self
            .to_value(address)
            .is_some_and(|value| self.allocated.lock().remove(&value));
        if !released {
            event!(
                Level::WARN,
                %address,
                "Released an IP address that was not allocated"
            );
        }
    }
}
