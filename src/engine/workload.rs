//! Minimum-workload priority queue owned by a single actor task.
//!
//! Workers never touch the heap directly. Every mutation is a request on an
//! mpsc channel answered over a oneshot, so heap updates are applied in one
//! strict order while the workers' staging I/O runs concurrently.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::model::ReviewerId;

/// Heap entry: lowest load first, ties by reviewer ID.
type Entry = Reverse<(u64, ReviewerId)>;

enum Request {
    Push {
        reviewer: ReviewerId,
        load: u64,
    },
    Pop {
        reply: oneshot::Sender<Option<(ReviewerId, u64)>>,
    },
    /// Take the `count` least-loaded reviewers not in `excluded`, bump each
    /// by one and push them back.
    Pick {
        count: usize,
        excluded: HashSet<ReviewerId>,
        reply: oneshot::Sender<Vec<ReviewerId>>,
    },
    Shutdown {
        reply: oneshot::Sender<Vec<(ReviewerId, u64)>>,
    },
}

/// Cloneable handle to the workload actor.
#[derive(Clone)]
pub struct WorkloadQueue {
    tx: mpsc::Sender<Request>,
}

impl WorkloadQueue {
    /// Spawn the actor seeded with `loads`.
    pub fn spawn(loads: impl IntoIterator<Item = (ReviewerId, u64)>) -> (Self, JoinHandle<()>) {
        let heap: BinaryHeap<Entry> = loads
            .into_iter()
            .map(|(reviewer, load)| Reverse((load, reviewer)))
            .collect();
        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(run(heap, rx));
        (Self { tx }, handle)
    }

    pub async fn push(&self, reviewer: ReviewerId, load: u64) -> Result<()> {
        self.tx
            .send(Request::Push { reviewer, load })
            .await
            .map_err(|_| closed())
    }

    /// Remove and return the least-loaded reviewer.
    pub async fn pop(&self) -> Result<Option<(ReviewerId, u64)>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Pop { reply })
            .await
            .map_err(|_| closed())?;
        rx.await.map_err(|_| closed())
    }

    /// Up to `count` distinct least-loaded reviewers outside `excluded`.
    /// Each chosen reviewer's load is bumped by one.
    pub async fn pick(&self, count: usize, excluded: HashSet<ReviewerId>) -> Result<Vec<ReviewerId>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Pick {
                count,
                excluded,
                reply,
            })
            .await
            .map_err(|_| closed())?;
        rx.await.map_err(|_| closed())
    }

    /// Stop the actor and return the final loads ordered by reviewer ID.
    pub async fn shutdown(self) -> Result<Vec<(ReviewerId, u64)>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Shutdown { reply })
            .await
            .map_err(|_| closed())?;
        rx.await.map_err(|_| closed())
    }
}

fn closed() -> Error {
    Error::Other("workload queue actor stopped".to_string())
}

async fn run(mut heap: BinaryHeap<Entry>, mut rx: mpsc::Receiver<Request>) {
    while let Some(request) = rx.recv().await {
        match request {
            Request::Push { reviewer, load } => heap.push(Reverse((load, reviewer))),
            Request::Pop { reply } => {
                let _ = reply.send(heap.pop().map(|Reverse((load, id))| (id, load)));
            }
            Request::Pick {
                count,
                excluded,
                reply,
            } => {
                let mut skipped = Vec::new();
                let mut chosen = Vec::with_capacity(count);
                while chosen.len() < count {
                    let Some(Reverse((load, id))) = heap.pop() else {
                        break;
                    };
                    if excluded.contains(&id) {
                        skipped.push(Reverse((load, id)));
                    } else {
                        chosen.push((id, load));
                    }
                }
                heap.extend(skipped);
                heap.extend(chosen.iter().map(|&(id, load)| Reverse((load + 1, id))));
                let _ = reply.send(chosen.into_iter().map(|(id, _)| id).collect());
            }
            Request::Shutdown { reply } => {
                let mut loads: Vec<(ReviewerId, u64)> =
                    heap.drain().map(|Reverse((load, id))| (id, load)).collect();
                loads.sort();
                let _ = reply.send(loads);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn reviewer(n: u128) -> ReviewerId {
        ReviewerId(Uuid::from_u128(n))
    }

    #[tokio::test]
    async fn pick_prefers_lowest_load_then_id() {
        let (queue, handle) =
            WorkloadQueue::spawn([(reviewer(1), 2), (reviewer(2), 0), (reviewer(3), 0)]);
        let picked = queue.pick(2, HashSet::new()).await.unwrap();
        assert_eq!(picked, vec![reviewer(2), reviewer(3)]);

        let loads = queue.shutdown().await.unwrap();
        assert_eq!(loads, vec![(reviewer(1), 2), (reviewer(2), 1), (reviewer(3), 1)]);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn pick_skips_excluded_without_changing_their_load() {
        let (queue, _handle) = WorkloadQueue::spawn([(reviewer(1), 0), (reviewer(2), 5)]);
        let picked = queue
            .pick(1, HashSet::from([reviewer(1)]))
            .await
            .unwrap();
        assert_eq!(picked, vec![reviewer(2)]);
        assert_eq!(queue.pop().await.unwrap(), Some((reviewer(1), 0)));
        assert_eq!(queue.pop().await.unwrap(), Some((reviewer(2), 6)));
        assert_eq!(queue.pop().await.unwrap(), None);
    }

    #[tokio::test]
    async fn pick_returns_fewer_when_heap_runs_out() {
        let (queue, _handle) = WorkloadQueue::spawn([(reviewer(1), 0)]);
        queue.push(reviewer(2), 0).await.unwrap();
        let picked = queue
            .pick(3, HashSet::from([reviewer(2)]))
            .await
            .unwrap();
        assert_eq!(picked, vec![reviewer(1)]);
    }
}
