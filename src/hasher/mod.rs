//! The hasher pool (spec §4.5, §5): a fixed set of worker tasks that turn
//! raw bytes into block digests off the model's own task.

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::model::BlockHash;

/// Context the caller gets back untouched alongside the digest, so a single
/// shared result channel can be routed back to the right file/block by the
/// scanner or peer controller.
#[derive(Debug, Clone)]
pub struct HashContext {
    pub folder: crate::model::FolderId,
    pub file: uuid::Uuid,
    pub block_index: usize,
}

pub struct HashJob {
    pub ctx: HashContext,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct HashResult {
    pub ctx: HashContext,
    pub hash: BlockHash,
    pub weak_hash: u32,
    pub size: u32,
}

/// Rolling weak checksum (Adler-32 style) so the scanner can short-circuit
/// reuploading unchanged blocks without a full sha256 (spec §4.5, §11).
pub fn weak_hash(data: &[u8]) -> u32 {
    const MOD_ADLER: u32 = 65521;
    let (mut a, mut b) = (1u32, 0u32);
    for &byte in data {
        a = (a + byte as u32) % MOD_ADLER;
        b = (b + a) % MOD_ADLER;
    }
    (b << 16) | a
}

#[derive(Clone)]
pub struct HasherHandle {
    job_tx: mpsc::Sender<HashJob>,
}

impl HasherHandle {
    pub async fn hash(&self, job: HashJob) -> Result<(), mpsc::error::SendError<HashJob>> {
        self.job_tx.send(job).await
    }
}

/// N worker tasks pulling from one shared job queue and pushing results to
/// one shared result channel (spec §5: "fans out block-sized chunks across
/// workers").
pub struct HasherPool;

impl HasherPool {
    pub fn spawn(workers: usize, queue_depth: usize) -> (HasherHandle, mpsc::Receiver<HashResult>, Vec<JoinHandle<()>>) {
        let (job_tx, job_rx) = mpsc::channel(queue_depth);
        let (result_tx, result_rx) = mpsc::channel(queue_depth);
        let job_rx = std::sync::Arc::new(tokio::sync::Mutex::new(job_rx));

        let handles = (0..workers.max(1))
            .map(|_| {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                tokio::spawn(async move { Worker { job_rx, result_tx }.run().await })
            })
            .collect();

        (HasherHandle { job_tx }, result_rx, handles)
    }
}

struct Worker {
    job_rx: std::sync::Arc<tokio::sync::Mutex<mpsc::Receiver<HashJob>>>,
    result_tx: mpsc::Sender<HashResult>,
}

impl Worker {
    async fn run(self) {
        loop {
            let job = {
                let mut rx = self.job_rx.lock().await;
                rx.recv().await
            };
            let Some(job) = job else { break };
            let mut hasher = Sha256::new();
            hasher.update(&job.data);
            let digest: [u8; 32] = hasher.finalize().into();
            let result = HashResult {
                ctx: job.ctx,
                hash: BlockHash(digest),
                weak_hash: weak_hash(&job.data),
                size: job.data.len() as u32,
            };
            if self.result_tx.send(result).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashes_match_direct_sha256() {
        let (handle, mut results, _workers) = HasherPool::spawn(2, 8);
        let ctx = HashContext { folder: crate::model::FolderId("f".into()), file: uuid::Uuid::new_v4(), block_index: 0 };
        handle.hash(HashJob { ctx, data: b"hello world".to_vec() }).await.unwrap();

        let result = results.recv().await.unwrap();
        let mut expected = Sha256::new();
        expected.update(b"hello world");
        let expected: [u8; 32] = expected.finalize().into();
        assert_eq!(result.hash, BlockHash(expected));
        assert_eq!(result.size, 11);
    }

    #[test]
    fn weak_hash_is_deterministic_and_order_sensitive() {
        assert_eq!(weak_hash(b"abc"), weak_hash(b"abc"));
        assert_ne!(weak_hash(b"abc"), weak_hash(b"acb"));
    }
}
