//! Chain construction: fold a hop list into one tunnel.
//!
//! # Data Flow
//! ```text
//! hops[0] ──(layer 0)──► hops[1] ──(layer 1)──► ... ──► hops[n-1] ──(layer n-1)──► target
//!
//! layer i = agent(hops[i]) over layer i-1, naming hops[i+1] (or target) as destination
//! ```
//!
//! # Design Decisions
//! - An empty hop list is a direct connection to the target
//! - Each layer owns the one beneath it; a failure at hop i drops layers 0..i
//! - Failures carry the hop index for diagnostics

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agents;
use crate::error::TunnelError;
use crate::observability::metrics;
use crate::transport::{BoxStream, Connector, ProxyHop, Target};

/// Build a stream that reaches `target` through every hop in order.
pub async fn build_chain(
    connector: &Connector,
    hops: &[ProxyHop],
    target: &Target,
    cancel: &CancellationToken,
) -> Result<BoxStream, TunnelError> {
    let Some((first, rest)) = hops.split_first() else {
        debug!(target = %target, "direct connection");
        return Ok(connector.connect(target, false, None, cancel).await?);
    };

    let destination = |index: usize| hops.get(index + 1).map_or(target, |hop| &hop.target);

    let mut stream = layer(connector, 0, first, destination(0), cancel, None).await?;
    for (offset, hop) in rest.iter().enumerate() {
        let index = offset + 1;
        stream = layer(connector, index, hop, destination(index), cancel, Some(stream)).await?;
    }
    Ok(stream)
}

async fn layer(
    connector: &Connector,
    index: usize,
    hop: &ProxyHop,
    next: &Target,
    cancel: &CancellationToken,
    previous: Option<BoxStream>,
) -> Result<BoxStream, TunnelError> {
    agents::create_connection(connector, hop, next, cancel, previous)
        .await
        .map_err(|source| TunnelError::Chain {
            index,
            hop: hop.target.clone(),
            source: Box::new(source),
        })
}

/// A connector paired with a fixed hop list.
#[derive(Clone)]
pub struct ChainBuilder {
    connector: Connector,
    hops: Arc<[ProxyHop]>,
}

impl ChainBuilder {
    pub fn new(connector: Connector, hops: impl Into<Arc<[ProxyHop]>>) -> Self {
        Self {
            connector,
            hops: hops.into(),
        }
    }

    pub fn hops(&self) -> &[ProxyHop] {
        &self.hops
    }

    /// Build the chain to `target`, recording its outcome.
    pub async fn build(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<BoxStream, TunnelError> {
        let started = Instant::now();
        let result = build_chain(&self.connector, &self.hops, target, cancel).await;
        match &result {
            Ok(_) => {
                metrics::record_chain_build("ok", started);
                debug!(target = %target, hops = self.hops.len(), elapsed = ?started.elapsed(), "chain ready");
            }
            Err(err) if err.is_cancelled() => {
                metrics::record_chain_build("cancelled", started);
                debug!(target = %target, "chain build cancelled");
            }
            Err(err) => {
                metrics::record_chain_build("error", started);
                warn!(target = %target, error = %err, cause = %err.root(), "chain build failed");
            }
        }
        result
    }
}
