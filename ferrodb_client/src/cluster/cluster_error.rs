use crate::error_chain_fmt;
use crate::AddressParseError;

#[derive(thiserror::Error)]
pub enum ClusterError {
    #[error("no reachable servers")]
    NoReachableServers,
    #[error("no seed addresses were supplied and a cluster can't be found without at least one")]
    MissingSeedsError,
    #[error("seed address `{seed}` is not usable")]
    InvalidSeedError {
        seed: String,
        #[source]
        source: AddressParseError,
    },
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for ClusterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
