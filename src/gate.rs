use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("upload cancelled")]
pub struct Cancelled;

/// Bounds the number of in-flight transfers for a single upload call.
///
/// A slot is taken before a transfer is spawned and held by the spawned task,
/// so it is released the moment the transfer settles, whatever the outcome.
/// Settled outputs stay in the gate until reaped.
pub struct ConcurrencyGate<T> {
    limit: usize,
    permits: Arc<Semaphore>,
    tasks: JoinSet<T>,
}

impl<T: Send + 'static> ConcurrencyGate<T> {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            permits: Arc::new(Semaphore::new(limit)),
            tasks: JoinSet::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Transfers currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.limit - self.permits.available_permits()
    }

    /// Spawned transfers whose output has not been reaped yet.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for a free slot without spawning anything yet.
    pub async fn reserve(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit, Cancelled> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => permit.map_err(|_| Cancelled),
        }
    }

    /// Spawn `transfer` on a slot taken with [`reserve`](Self::reserve). The
    /// slot is released once `transfer` has produced its output.
    pub fn spawn<F>(&mut self, slot: OwnedSemaphorePermit, transfer: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.tasks.spawn(async move {
            let output = transfer.await;
            drop(slot);
            output
        });
    }

    /// Wait for a free slot, then spawn `transfer` on it.
    pub async fn dispatch<F>(&mut self, transfer: F, cancel: &CancellationToken) -> Result<(), Cancelled>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let slot = self.reserve(cancel).await?;
        self.spawn(slot, transfer);
        Ok(())
    }

    /// Outputs of transfers that already settled, without waiting.
    pub fn settled(&mut self) -> Vec<Result<T, JoinError>> {
        let mut settled = Vec::new();
        while let Some(result) = self.tasks.try_join_next() {
            settled.push(result);
        }
        settled
    }

    /// Wait for every outstanding transfer. On cancellation the remaining
    /// transfers are aborted and only what settled before is returned.
    pub async fn join_all(&mut self, cancel: &CancellationToken) -> Vec<Result<T, JoinError>> {
        let mut settled = Vec::with_capacity(self.tasks.len());
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.tasks.shutdown().await;
                    break;
                }
                next = self.tasks.join_next() => match next {
                    Some(result) => settled.push(result),
                    None => break,
                },
            }
        }
        settled
    }

    /// Abort every outstanding transfer.
    pub async fn shutdown(&mut self) {
        self.tasks.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn in_flight_never_exceeds_limit() {
        let mut gate = ConcurrencyGate::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        for i in 0..12u64 {
            assert!(gate.in_flight() <= gate.limit());
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            gate.dispatch(
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5 + i % 3)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    i
                },
                &cancel,
            )
            .await
            .unwrap();
        }

        let mut outputs: Vec<u64> = gate
            .join_all(&cancel)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        outputs.sort();

        assert_eq!(outputs, (0..12).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn settled_reaps_without_blocking() {
        let mut gate = ConcurrencyGate::new(2);
        let cancel = CancellationToken::new();

        gate.dispatch(async { 1 }, &cancel).await.unwrap();
        gate.dispatch(std::future::pending::<i32>(), &cancel).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let settled: Vec<i32> = gate.settled().into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(settled, vec![1]);
        assert_eq!(gate.pending(), 1);

        gate.shutdown().await;
        assert_eq!(gate.pending(), 0);
    }

    #[tokio::test]
    async fn cancelled_while_waiting_for_slot() {
        let mut gate = ConcurrencyGate::new(1);
        let cancel = CancellationToken::new();

        gate.dispatch(std::future::pending::<()>(), &cancel).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = gate.dispatch(async {}, &cancel).await;
        assert_eq!(result, Err(Cancelled));

        let settled = gate.join_all(&cancel).await;
        assert!(settled.is_empty());
    }

    #[tokio::test]
    async fn reserved_slot_counts_as_in_flight() {
        let mut gate = ConcurrencyGate::new(1);
        let cancel = CancellationToken::new();

        let slot = gate.reserve(&cancel).await.unwrap();
        assert_eq!(gate.in_flight(), 1);

        gate.spawn(slot, async { 7 });
        let settled: Vec<i32> = gate.join_all(&cancel).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(settled, vec![7]);
        assert_eq!(gate.in_flight(), 0);
    }
}
