//! Linux implementations of the host interfaces

mod ipt;
mod procfs;
mod rtnl;

pub use self::ipt::SystemIptables;
pub use self::procfs::ProcSys;
pub use self::rtnl::RtNetlink;
