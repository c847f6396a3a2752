//! Chain behavior across whole repair jobs.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tessera_primitives::{Endpoint, Hash, Token, TokenRange};
use tessera_repair::{
    MerkleTree, RangeHash, RangeTransferDeduper, RepairError, RepairJobDesc, RepairMetrics,
    SessionId, SyncTask, TransferDispatcher, TreeResponse,
};

#[derive(Debug, Default)]
struct RecordingDispatcher {
    calls: Mutex<Vec<(Endpoint, Vec<TokenRange>)>>,
    fail_for: Option<Endpoint>,
}

#[async_trait]
impl TransferDispatcher for RecordingDispatcher {
    async fn dispatch_transfer(
        &self,
        endpoint: Endpoint,
        ranges: Vec<TokenRange>,
    ) -> Result<(), RepairError> {
        self.calls.lock().unwrap().push((endpoint, ranges));
        if self.fail_for == Some(endpoint) {
            return Err(RepairError::Dispatch(format!("stream to {endpoint} refused")));
        }
        Ok(())
    }
}

fn endpoint(port: u16) -> Endpoint {
    format!("10.0.0.1:{port}").parse().unwrap()
}

fn range(left: i64, right: i64) -> TokenRange {
    TokenRange::new(Token(left), Token(right))
}

fn tree(content: &[u8]) -> MerkleTree {
    MerkleTree::from_leaves(vec![
        RangeHash::new(range(0, 10), Hash::new(content)),
        RangeHash::new(range(10, 20), Hash::new(b"shared")),
    ])
    .unwrap()
}

fn desc() -> RepairJobDesc {
    RepairJobDesc::new(SessionId(1), "ks", "events", range(0, 20))
}

/// Every task of a chain reaches a terminal state in submission order,
/// including tasks after a failed one.
#[tokio::test(flavor = "multi_thread")]
async fn chain_completes_in_order_across_failures() {
    let deduper = Arc::new(RangeTransferDeduper::new());
    let metrics = Arc::new(RepairMetrics::unregistered());
    // The middle pair's first dispatch target fails.
    let dispatcher = Arc::new(RecordingDispatcher {
        calls: Mutex::new(Vec::new()),
        fail_for: Some(endpoint(21)),
    });

    let mut tasks = Vec::new();
    let mut handles = Vec::new();
    for pair in 0..3_u16 {
        let left_port = 10 * (pair + 1) + 1;
        let right_port = 10 * (pair + 1) + 2;
        // Distinct content per pair so no transfer is deduplicated away.
        let left_content = vec![pair as u8, 0];
        let right_content = vec![pair as u8, 1];
        let (task, handle) = SyncTask::new(
            desc(),
            TreeResponse {
                endpoint: endpoint(left_port),
                tree: tree(&left_content),
            },
            TreeResponse {
                endpoint: endpoint(right_port),
                tree: tree(&right_content),
            },
            deduper.clone(),
            dispatcher.clone(),
            metrics.clone(),
        );
        tasks.push(task);
        handles.push(handle);
    }

    SyncTask::chain(tasks).unwrap().spawn();

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.join().await);
    }
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].is_ok());
    assert!(matches!(outcomes[1], Err(RepairError::Dispatch(_))));
    assert!(outcomes[2].is_ok());

    // Dispatch order shows strict sequencing: pair 0 fully before pair 1
    // before pair 2. The failing pair dispatched once and stopped.
    let calls = dispatcher.calls.lock().unwrap();
    let targets: Vec<Endpoint> = calls.iter().map(|(endpoint, _)| *endpoint).collect();
    assert_eq!(
        targets,
        vec![
            endpoint(11),
            endpoint(12),
            endpoint(21),
            endpoint(31),
            endpoint(32),
        ]
    );
}

/// The session deduper spans tasks of a chain: a second pair that would
/// re-send content an endpoint already received skips that direction.
#[tokio::test(flavor = "multi_thread")]
async fn dedup_spans_tasks_within_a_session() {
    let deduper = Arc::new(RangeTransferDeduper::new());
    let metrics = Arc::new(RepairMetrics::unregistered());
    let dispatcher = Arc::new(RecordingDispatcher::default());

    // Pair 1: endpoints 1 and 2 disagree; both directions stream.
    let (first, first_handle) = SyncTask::new(
        desc(),
        TreeResponse {
            endpoint: endpoint(1),
            tree: tree(b"v1"),
        },
        TreeResponse {
            endpoint: endpoint(2),
            tree: tree(b"v2"),
        },
        deduper.clone(),
        dispatcher.clone(),
        metrics.clone(),
    );
    // Pair 2: endpoint 1 against a third endpoint holding the same
    // content endpoint 1 was just sent. Endpoint 1's direction dedups.
    let (second, second_handle) = SyncTask::new(
        desc(),
        TreeResponse {
            endpoint: endpoint(1),
            tree: tree(b"v1"),
        },
        TreeResponse {
            endpoint: endpoint(3),
            tree: tree(b"v2"),
        },
        deduper.clone(),
        dispatcher.clone(),
        metrics.clone(),
    );

    SyncTask::chain(vec![first, second]).unwrap().spawn();
    let first_stat = first_handle.join().await.unwrap();
    let second_stat = second_handle.join().await.unwrap();

    assert_eq!(first_stat.differing_ranges, 1);
    assert_eq!(second_stat.differing_ranges, 1);

    let calls = dispatcher.calls.lock().unwrap();
    let targets: Vec<Endpoint> = calls.iter().map(|(endpoint, _)| *endpoint).collect();
    // Endpoint 1 is not streamed to twice for the same content.
    assert_eq!(targets, vec![endpoint(1), endpoint(2), endpoint(3)]);
    assert_eq!(metrics.ranges_deduped.get(), 1);
    assert_eq!(metrics.ranges_transferred.get(), 3);
}
