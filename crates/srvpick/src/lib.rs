#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod balancer;
pub use balancer::{LoadBalancer, LoadBalancerFn, Rfc2782Balancer};

mod discovery;
pub use discovery::{discover, Discovery, DiscoveryBuilder};

mod endpoint;
pub use endpoint::{record_name, Endpoint, Network, Target};

mod error;
pub use error::{BoxError, DiscoveryError};

mod health;
pub use health::{DialHealthChecker, HealthChecker, HealthCheckerFn, DEFAULT_PROBE_TIMEOUT};

mod rank;
pub use rank::{rank, rank_with_rng};

mod refresh;
pub use refresh::RefreshHandle;

mod retriever;
pub use retriever::{DnsRetriever, Retriever, RetrieverFn};
