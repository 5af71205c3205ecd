//! Policy Router
//!
//! Host-side routing for floating IPs carried on secondary ENIs.
//!
//! Each secondary ENI (device number `N`) gets:
//! - a private route table `10000 + N` holding a default route via the
//!   ENI subnet gateway,
//! - a policy rule `fwmark (0x2000 + N)/(0x2000 + N) lookup 10000 + N`,
//! - a mangle rule marking connections that arrive on the ENI,
//! - loose reverse path filtering on its interface.
//!
//! Each floating IP additionally gets a `/32` address on the ENI link and
//! mangle rules restoring the ENI mark on its reply packets, so replies
//! leave through the interface the request came in on.
//!
//! The kernel is reached through [`NetlinkOps`], [`IptablesOps`] and
//! [`SysctlOps`]; [`PolicyRouter::system`] binds them to the running host.

pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
#[cfg(target_os = "linux")]
pub mod linux;
pub mod ops;
pub mod router;
pub mod rules;

pub use error::{NetlinkError, RouterError, RouterResult};
pub use ops::{IptablesOps, NetlinkOps, SysctlOps};
pub use router::{PolicyRouter, RouterConfig};
pub use rules::{IptablesRule, Link, RouteSpec, RuleSpec};
