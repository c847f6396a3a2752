//! Sync tasks: reconciling one endpoint pair and chaining to the next.
//!
//! Tasks for the same job run strictly one after another; the next task
//! is spawned from the current one's completion path whatever the
//! outcome, so a failed or deduplicated-away pair never stalls the
//! chain. Distinct chains share the runtime and run concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tessera_primitives::{Endpoint, TokenRange};

use crate::dedup::RangeTransferDeduper;
use crate::error::RepairError;
use crate::job::{RepairJobDesc, SyncStat};
use crate::merkle::{diff, MerkleTree, RangeHash};
use crate::metrics::RepairMetrics;

/// One endpoint's tree for the job's range.
#[derive(Debug)]
pub struct TreeResponse {
    pub endpoint: Endpoint,
    pub tree: MerkleTree,
}

/// Seam to the streaming layer: hand a set of ranges to an endpoint.
#[async_trait]
pub trait TransferDispatcher: Send + Sync {
    async fn dispatch_transfer(
        &self,
        endpoint: Endpoint,
        ranges: Vec<TokenRange>,
    ) -> Result<(), RepairError>;
}

/// Awaitable completion of one sync task.
pub struct SyncHandle {
    rx: oneshot::Receiver<Result<SyncStat, RepairError>>,
}

impl SyncHandle {
    /// Wait for the task's terminal state. A task dropped before
    /// reaching one reports as a dispatch failure.
    pub async fn join(self) -> Result<SyncStat, RepairError> {
        self.rx.await.unwrap_or_else(|_| {
            Err(RepairError::Dispatch(
                "sync task dropped before completion".to_owned(),
            ))
        })
    }
}

/// Reconciliation of one endpoint pair within a repair job.
pub struct SyncTask {
    desc: RepairJobDesc,
    left: TreeResponse,
    right: TreeResponse,
    deduper: Arc<RangeTransferDeduper>,
    dispatcher: Arc<dyn TransferDispatcher>,
    metrics: Arc<RepairMetrics>,
    next: Option<Box<SyncTask>>,
    done: Option<oneshot::Sender<Result<SyncStat, RepairError>>>,
}

impl SyncTask {
    #[must_use]
    pub fn new(
        desc: RepairJobDesc,
        left: TreeResponse,
        right: TreeResponse,
        deduper: Arc<RangeTransferDeduper>,
        dispatcher: Arc<dyn TransferDispatcher>,
        metrics: Arc<RepairMetrics>,
    ) -> (Self, SyncHandle) {
        let (tx, rx) = oneshot::channel();
        let task = Self {
            desc,
            left,
            right,
            deduper,
            dispatcher,
            metrics,
            next: None,
            done: Some(tx),
        };
        (task, SyncHandle { rx })
    }

    /// Link tasks into one sequential chain, returning its head. The
    /// head is spawned by the caller; every later task is spawned by its
    /// predecessor's completion path.
    #[must_use]
    pub fn chain(tasks: Vec<SyncTask>) -> Option<SyncTask> {
        let mut head = None;
        for mut task in tasks.into_iter().rev() {
            task.next = head.map(Box::new);
            head = Some(task);
        }
        head
    }

    pub fn spawn(self) {
        drop(tokio::spawn(self.run()));
    }

    /// Drive the task to a terminal state, then hand off to the chained
    /// next task. Boxed so the chain does not recurse in the type.
    pub fn run(mut self) -> BoxFuture<'static, ()> {
        async move {
            let next = self.next.take();
            let started = Instant::now();

            let outcome = self.execute().await;
            self.metrics
                .sync_duration_seconds
                .observe(started.elapsed().as_secs_f64());
            if let Err(err) = &outcome {
                warn!(job = %self.desc, %err, "sync task failed");
            }
            if let Some(done) = self.done.take() {
                let _ = done.send(outcome);
            }

            if let Some(next) = next {
                next.spawn();
            }
        }
        .boxed()
    }

    async fn execute(&self) -> Result<SyncStat, RepairError> {
        let left = self.left.endpoint;
        let right = self.right.endpoint;

        if self.left.tree.span() != self.right.tree.span() {
            return Err(RepairError::Diff(format!(
                "trees cover different spans: {} vs {}",
                self.left.tree.span(),
                self.right.tree.span()
            )));
        }

        let differences = diff(&self.left.tree, &self.right.tree);
        let stat = SyncStat {
            endpoints: (left, right),
            differing_ranges: differences.len() as u64,
        };

        if differences.is_empty() {
            info!(job = %self.desc, %left, %right, "endpoints are consistent");
            self.metrics.consistent_pairs.inc();
            return Ok(stat);
        }
        info!(
            job = %self.desc,
            %left,
            %right,
            ranges = differences.len(),
            "endpoints have ranges out of sync"
        );

        // Each direction is deduplicated independently: the content a
        // destination receives is the other side's hash for the range.
        let mut to_left = Vec::new();
        let mut to_right = Vec::new();
        let mut deduped = 0_u64;
        for difference in &differences {
            if self
                .deduper
                .check_and_record(left, RangeHash::new(difference.range, difference.right))
            {
                to_left.push(difference.range);
            } else {
                deduped += 1;
            }
            if self
                .deduper
                .check_and_record(right, RangeHash::new(difference.range, difference.left))
            {
                to_right.push(difference.range);
            } else {
                deduped += 1;
            }
        }
        self.metrics.ranges_deduped.inc_by(deduped);

        if to_left.is_empty() && to_right.is_empty() {
            debug!(
                job = %self.desc,
                %left,
                %right,
                "all differing ranges already streamed this session"
            );
            return Ok(stat);
        }

        let transferred = (to_left.len() + to_right.len()) as u64;
        if !to_left.is_empty() {
            self.dispatcher.dispatch_transfer(left, to_left).await?;
        }
        if !to_right.is_empty() {
            self.dispatcher.dispatch_transfer(right, to_right).await?;
        }
        self.metrics.ranges_transferred.inc_by(transferred);

        Ok(stat)
    }
}
