//! Concrete tool policies.
//!
//! Each tool wraps one external binary with an immutable descriptor and the
//! semantic rules of its class. Policies only ever narrow what the shared
//! pipeline allows; none of them can widen the target policy or bypass the
//! argument gauntlet.

mod cred_test;
mod port_sweep;
mod service_scan;
mod web_enum;

pub use cred_test::CredTest;
pub use injection_test::InjectionTest;
pub use port_sweep::PortSweep;
pub use service_scan::ServiceScan;
pub use web_enum::WebEnum;
