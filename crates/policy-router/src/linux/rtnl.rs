//! rtnetlink-backed netlink operations

use crate::error::{NetlinkError, RouterResult};
use crate::ops::NetlinkOps;
use crate::rules::{Link, RouteSpec, RuleSpec};
use futures::TryStreamExt;
use netlink_packet_route::address::nlas::Nla as AddressNla;
use netlink_packet_route::link::nlas::Nla as LinkNla;
use netlink_packet_route::route::nlas::Nla as RouteNla;
use netlink_packet_route::rule::nlas::Nla as RuleNla;
use netlink_packet_route::{AddressMessage, RouteMessage, RuleMessage};
use rtnetlink::{Handle, IpVersion};
use std::net::{IpAddr, Ipv4Addr};

const AF_INET: u8 = 2;
const RT_TABLE_UNSPEC: u8 = 0;
const RT_SCOPE_LINK: u8 = 253;
const FR_ACT_TO_TBL: u8 = 1;

// errno values carried, negated, in netlink error acks
const ENOENT: i32 = 2;
const ESRCH: i32 = 3;
const EEXIST: i32 = 17;
const EADDRNOTAVAIL: i32 = 99;

fn errno(e: &rtnetlink::Error) -> Option<i32> {
    match e {
        rtnetlink::Error::NetlinkError(message) => message.code.map(|code| -code.get()),
        _ => None,
    }
}

fn classify_errno(errno: Option<i32>, message: String) -> NetlinkError {
    match errno {
        Some(EEXIST) => NetlinkError::AlreadyExists(message),
        Some(ENOENT | ESRCH | EADDRNOTAVAIL) => NetlinkError::NotFound(message),
        _ => NetlinkError::Other(message),
    }
}

fn classify(e: rtnetlink::Error) -> NetlinkError {
    classify_errno(errno(&e), e.to_string())
}

fn ipv4(bytes: &[u8]) -> Option<Ipv4Addr> {
    <[u8; 4]>::try_from(bytes).ok().map(Ipv4Addr::from)
}

fn format_mac(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(":")
}

fn route_table(message: &RouteMessage) -> u32 {
    message
        .nlas
        .iter()
        .find_map(|nla| match nla {
            RouteNla::Table(table) => Some(*table),
            _ => None,
        })
        .unwrap_or_else(|| u32::from(message.header.table))
}

fn route_matches(message: &RouteMessage, route: &RouteSpec) -> bool {
    let mut destination = Ipv4Addr::UNSPECIFIED;
    let mut oif = None;
    for nla in &message.nlas {
        match nla {
            RouteNla::Destination(bytes) => destination = ipv4(bytes).unwrap_or(destination),
            RouteNla::Oif(index) => oif = Some(*index),
            _ => {}
        }
    }
    route_table(message) == route.table
        && message.header.destination_prefix_length == route.prefix_len
        && destination == route.destination
        && oif.is_none_or(|index| index == route.link_index)
}

fn rule_matches(message: &RuleMessage, rule: &RuleSpec) -> bool {
    let table = message
        .nlas
        .iter()
        .find_map(|nla| match nla {
            RuleNla::Table(table) => Some(*table),
            _ => None,
        })
        .unwrap_or_else(|| u32::from(message.header.table));
    table == rule.table
        && message.nlas.contains(&RuleNla::FwMark(rule.mark))
        && message.nlas.contains(&RuleNla::FwMask(rule.mask))
}

fn address_of(message: &AddressMessage) -> Option<Ipv4Addr> {
    if message.header.family != AF_INET {
        return None;
    }
    message.nlas.iter().find_map(|nla| match nla {
        AddressNla::Address(bytes) => ipv4(bytes),
        _ => None,
    })
}

/// Netlink operations over a single rtnetlink connection
#[derive(Debug, Clone)]
pub struct RtNetlink {
    handle: Handle,
}

impl RtNetlink {
    /// Opens a netlink socket and drives it on the current tokio runtime.
    pub fn connect() -> RouterResult<Self> {
        let (connection, handle, _) =
            rtnetlink::new_connection().map_err(|e| NetlinkError::Other(e.to_string()))?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    async fn find_address(&self, link: &Link, address: Ipv4Addr, prefix_len: u8) -> Result<Option<AddressMessage>, NetlinkError> {
        let mut addresses = self.handle.address().get().set_link_index_filter(link.index).execute();
        while let Some(message) = addresses.try_next().await.map_err(classify)? {
            if message.header.prefix_len == prefix_len && address_of(&message) == Some(address) {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }
}

#[async_trait::async_trait]
impl NetlinkOps for RtNetlink {
    async fn link_by_mac(&self, mac: &str) -> Result<Option<Link>, NetlinkError> {
        let mut links = self.handle.link().get().execute();
        while let Some(message) = links.try_next().await.map_err(classify)? {
            let mut name = None;
            let mut hardware = None;
            for nla in &message.nlas {
                match nla {
                    LinkNla::IfName(ifname) => name = Some(ifname.clone()),
                    LinkNla::Address(bytes) => hardware = Some(format_mac(bytes)),
                    _ => {}
                }
            }
            if hardware.is_some_and(|hw| hw.eq_ignore_ascii_case(mac)) {
                return Ok(Some(Link {
                    index: message.header.index,
                    name: name.unwrap_or_default(),
                    mac: mac.to_ascii_lowercase(),
                }));
            }
        }
        Ok(None)
    }

    async fn link_set_up(&self, link: &Link) -> Result<(), NetlinkError> {
        self.handle.link().set(link.index).up().execute().await.map_err(classify)
    }

    async fn link_set_mtu(&self, link: &Link, mtu: u32) -> Result<(), NetlinkError> {
        self.handle.link().set(link.index).mtu(mtu).execute().await.map_err(classify)
    }

    async fn addr_list(&self, link: &Link) -> Result<Vec<(Ipv4Addr, u8)>, NetlinkError> {
        let mut result = Vec::new();
        let mut addresses = self.handle.address().get().set_link_index_filter(link.index).execute();
        while let Some(message) = addresses.try_next().await.map_err(classify)? {
            if let Some(address) = address_of(&message) {
                result.push((address, message.header.prefix_len));
            }
        }
        Ok(result)
    }

    async fn addr_add(&self, link: &Link, address: Ipv4Addr, prefix_len: u8) -> Result<(), NetlinkError> {
        self.handle
            .address()
            .add(link.index, IpAddr::V4(address), prefix_len)
            .execute()
            .await
            .map_err(classify)
    }

    async fn addr_del(&self, link: &Link, address: Ipv4Addr, prefix_len: u8) -> Result<(), NetlinkError> {
        match self.find_address(link, address, prefix_len).await? {
            Some(message) => self.handle.address().del(message).execute().await.map_err(classify),
            None => Err(NetlinkError::NotFound(format!("{address}/{prefix_len} on {}", link.name))),
        }
    }

    async fn route_add(&self, route: &RouteSpec) -> Result<(), NetlinkError> {
        let mut request = self
            .handle
            .route()
            .add()
            .v4()
            .destination_prefix(route.destination, route.prefix_len)
            .output_interface(route.link_index);
        if let Some(gateway) = route.gateway {
            request = request.gateway(gateway);
        }
        let message = request.message_mut();
        // table ids above 255 only fit in the RTA_TABLE attribute
        message.header.table = RT_TABLE_UNSPEC;
        message.nlas.push(RouteNla::Table(route.table));
        if route.scope_link {
            message.header.scope = RT_SCOPE_LINK;
        }
        request.execute().await.map_err(classify)
    }

    async fn route_del(&self, route: &RouteSpec) -> Result<(), NetlinkError> {
        let mut routes = self.handle.route().get(IpVersion::V4).execute();
        while let Some(message) = routes.try_next().await.map_err(classify)? {
            if route_matches(&message, route) {
                return self.handle.route().del(message).execute().await.map_err(classify);
            }
        }
        Err(NetlinkError::NotFound(format!(
            "{}/{} in table {}",
            route.destination, route.prefix_len, route.table
        )))
    }

    async fn rule_add(&self, rule: &RuleSpec) -> Result<(), NetlinkError> {
        let mut request = self
            .handle
            .rule()
            .add()
            .v4()
            .table_id(rule.table)
            .action(FR_ACT_TO_TBL)
            .priority(rule.priority);
        let message = request.message_mut();
        message.nlas.push(RuleNla::FwMark(rule.mark));
        message.nlas.push(RuleNla::FwMask(rule.mask));
        request.execute().await.map_err(classify)
    }

    async fn rule_del(&self, rule: &RuleSpec) -> Result<(), NetlinkError> {
        let mut rules = self.handle.rule().get(IpVersion::V4).execute();
        while let Some(message) = rules.try_next().await.map_err(classify)? {
            if rule_matches(&message, rule) {
                return self.handle.rule().del(message).execute().await.map_err(classify);
            }
        }
        Err(NetlinkError::NotFound(format!("fwmark {:#x} lookup {}", rule.mark, rule.table)))
    }
}
