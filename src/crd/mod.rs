mod cluster_policy;
mod policy_class;
mod status;

pub use cluster_policy::*;
pub use policy_class::*;
pub use status::*;
