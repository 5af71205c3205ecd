//! Kernel object construction
//!
//! Pure functions deriving the route table, connection mark, routes,
//! policy rule and iptables rules for one ENI. Nothing here touches the
//! host.

use crate::error::{RouterError, RouterResult};
use eni_gateway_client::EniMetadata;
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

/// Route table of device N is `ROUTE_TABLE_BASE + N`
pub const ROUTE_TABLE_BASE: u32 = 10000;
/// Connection mark of device N is `MAIN_ENI_MARK + N`
pub const MAIN_ENI_MARK: u32 = 0x2000;
/// Priority of the fwmark policy rules
pub const CONNMARK_RULE_PRIORITY: u32 = 1000;
/// Kernel main routing table
pub const MAIN_ROUTE_TABLE: u32 = 254;
/// Loose reverse path filtering
pub const LOOSE_RP_FILTER: &str = "2";

pub(crate) const MANGLE_TABLE: &str = "mangle";
pub(crate) const PREROUTING_CHAIN: &str = "PREROUTING";
pub(crate) const OUTPUT_CHAIN: &str = "OUTPUT";

const RULE_COMMENT_PREFIX: &str = "floating-ip-lb";

/// Policy routing table for the ENI
#[must_use]
pub fn route_table_id(eni: &EniMetadata) -> u32 {
    ROUTE_TABLE_BASE + eni.device_number
}

/// Connection mark for the ENI
#[must_use]
pub fn connmark(eni: &EniMetadata) -> u32 {
    MAIN_ENI_MARK + eni.device_number
}

/// sysctl key controlling reverse path filtering on `iface`
#[must_use]
pub fn rp_filter_key(iface: &str) -> String {
    format!("net/ipv4/conf/{iface}/rp_filter")
}

/// Parse the ENI subnet and derive its gateway (network address + 1)
pub fn subnet_gateway(eni: &EniMetadata) -> RouterResult<(Ipv4Network, Ipv4Addr)> {
    let network: Ipv4Network = eni
        .subnet_cidr
        .parse()
        .map_err(|_| RouterError::InvalidSubnet(eni.subnet_cidr.clone()))?;
    let base = u32::from(network.network());
    let gateway = base
        .checked_add(1)
        .map(Ipv4Addr::from)
        .filter(|gw| network.contains(*gw))
        .ok_or_else(|| RouterError::InvalidSubnet(eni.subnet_cidr.clone()))?;
    Ok((Ipv4Network::new(network.network(), network.prefix()).unwrap_or(network), gateway))
}

/// A network interface as seen by the kernel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    pub index: u32,
    pub name: String,
    pub mac: String,
}

/// IPv4 route in a specific table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteSpec {
    pub table: u32,
    pub destination: Ipv4Addr,
    pub prefix_len: u8,
    pub gateway: Option<Ipv4Addr>,
    pub link_index: u32,
    /// `scope link` (directly reachable) instead of `scope universe`
    pub scope_link: bool,
}

/// `ip rule add fwmark <mark>/<mask> lookup <table> pref <priority>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleSpec {
    pub mark: u32,
    pub mask: u32,
    pub table: u32,
    pub priority: u32,
}

/// One iptables rule in `table`/`chain`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IptablesRule {
    pub table: &'static str,
    pub chain: &'static str,
    pub rule: String,
}

/// Routes installed in the ENI's private table: the gateway as a link-scope
/// host route, then the default route through it.
#[must_use]
pub fn eni_routes(eni: &EniMetadata, link_index: u32, gateway: Ipv4Addr) -> [RouteSpec; 2] {
    let table = route_table_id(eni);
    [
        RouteSpec {
            table,
            destination: gateway,
            prefix_len: 32,
            gateway: None,
            link_index,
            scope_link: true,
        },
        RouteSpec {
            table,
            destination: Ipv4Addr::UNSPECIFIED,
            prefix_len: 0,
            gateway: Some(gateway),
            link_index,
            scope_link: false,
        },
    ]
}

/// The subnet route the kernel installs in the main table when the ENI
/// primary address comes up
#[must_use]
pub fn main_table_subnet_route(network: Ipv4Network, link_index: u32) -> RouteSpec {
    RouteSpec {
        table: MAIN_ROUTE_TABLE,
        destination: network.network(),
        prefix_len: network.prefix(),
        gateway: None,
        link_index,
        scope_link: true,
    }
}

/// fwmark rule steering marked connections into the ENI table
#[must_use]
pub fn connmark_rule(eni: &EniMetadata) -> RuleSpec {
    let mark = connmark(eni);
    RuleSpec {
        mark,
        mask: mark,
        table: route_table_id(eni),
        priority: CONNMARK_RULE_PRIORITY,
    }
}

fn comment(eni: &EniMetadata) -> String {
    format!("-m comment --comment \"{RULE_COMMENT_PREFIX}, {}\"", eni.eni_id)
}

/// Marks connections arriving on the ENI for a local address
#[must_use]
pub fn eni_mark_rule(eni: &EniMetadata, iface: &str) -> IptablesRule {
    let mark = connmark(eni);
    IptablesRule {
        table: MANGLE_TABLE,
        chain: PREROUTING_CHAIN,
        rule: format!(
            "-i {iface} {} -m addrtype --dst-type LOCAL --limit-iface-in -j CONNMARK --set-xmark {mark:#x}/{mark:#x}",
            comment(eni)
        ),
    }
}

/// Restores the ENI mark onto packets of connections originally addressed
/// to `private_ip`, both forwarded (`PREROUTING`) and locally generated
/// (`OUTPUT`)
#[must_use]
pub fn service_restore_rules(private_ip: Ipv4Addr, eni: &EniMetadata) -> [IptablesRule; 2] {
    let mark = connmark(eni);
    let rule = format!(
        "-m conntrack --ctorigdst {private_ip} {} -j CONNMARK --restore-mark --mask {mark:#x}",
        comment(eni)
    );
    [
        IptablesRule {
            table: MANGLE_TABLE,
            chain: PREROUTING_CHAIN,
            rule: rule.clone(),
        },
        IptablesRule {
            table: MANGLE_TABLE,
            chain: OUTPUT_CHAIN,
            rule,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use eni_gateway_client::mock::helpers::managed_eni;

    #[test]
    fn test_table_and_mark_follow_device_number() {
        let eni = managed_eni("eni-a", 3, vec![]);
        assert_eq!(route_table_id(&eni), 10003);
        assert_eq!(connmark(&eni), 0x2003);

        let rule = connmark_rule(&eni);
        assert_eq!(rule.mark, 0x2003);
        assert_eq!(rule.mask, 0x2003);
        assert_eq!(rule.table, 10003);
    }

    #[test]
    fn test_subnet_gateway_is_first_host() {
        let mut eni = managed_eni("eni-a", 1, vec![]);
        eni.subnet_cidr = "172.31.16.0/20".to_string();
        let (network, gateway) = subnet_gateway(&eni).unwrap();
        assert_eq!(network.prefix(), 20);
        assert_eq!(gateway, Ipv4Addr::new(172, 31, 16, 1));

        // host bits in the CIDR are ignored
        eni.subnet_cidr = "172.31.17.9/20".to_string();
        let (network, gateway) = subnet_gateway(&eni).unwrap();
        assert_eq!(network.network(), Ipv4Addr::new(172, 31, 16, 0));
        assert_eq!(gateway, Ipv4Addr::new(172, 31, 16, 1));
    }

    #[test]
    fn test_subnet_gateway_rejects_garbage() {
        let mut eni = managed_eni("eni-a", 1, vec![]);
        eni.subnet_cidr = "not-a-cidr".to_string();
        assert!(matches!(subnet_gateway(&eni), Err(RouterError::InvalidSubnet(_))));
    }

    #[test]
    fn test_iptables_rule_text() {
        let eni = managed_eni("eni-a", 2, vec![]);
        let mark_rule = eni_mark_rule(&eni, "eth2");
        assert_eq!(mark_rule.chain, "PREROUTING");
        assert_eq!(
            mark_rule.rule,
            "-i eth2 -m comment --comment \"floating-ip-lb, eni-a\" -m addrtype --dst-type LOCAL --limit-iface-in -j CONNMARK --set-xmark 0x2002/0x2002"
        );

        let [prerouting, output] = service_restore_rules(Ipv4Addr::new(10, 0, 1, 50), &eni);
        assert_eq!(prerouting.chain, "PREROUTING");
        assert_eq!(output.chain, "OUTPUT");
        assert_eq!(
            output.rule,
            "-m conntrack --ctorigdst 10.0.1.50 -m comment --comment \"floating-ip-lb, eni-a\" -j CONNMARK --restore-mark --mask 0x2002"
        );
    }
}
