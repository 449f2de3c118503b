use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::ChainCaller;
use crate::models::chain::Chain;

/// Latest-block tracker for one chain.
///
/// Polls `eth_blockNumber` every `poll_interval` (plus up to 20% jitter so sessions on
/// the same chain do not hit the RPC in lockstep) and publishes changes through a watch
/// channel. Consumers use new blocks as the trigger for balance refreshes.
pub struct ChainState {
    chain: Chain,
    caller: Arc<dyn ChainCaller>,
    poll_interval: Duration,
    tx: watch::Sender<Option<u64>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl ChainState {
    pub fn new(chain: Chain, caller: Arc<dyn ChainCaller>, poll_interval: Duration) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            chain,
            caller,
            poll_interval,
            tx,
            poller: Mutex::new(None),
        }
    }

    pub const fn chain(&self) -> Chain {
        self.chain
    }

    pub fn latest_block(&self) -> Option<u64> {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<u64>> {
        self.tx.subscribe()
    }

    /// Fetches the block number once. Only increases are published.
    pub async fn poll_once(&self) {
        poll(self.chain, self.caller.as_ref(), &self.tx).await;
    }

    /// Starts the background poller. Calling `start` on a running state is a no-op.
    pub fn start(&self) {
        let Ok(mut poller) = self.poller.lock() else {
            return;
        };
        if poller.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let chain = self.chain;
        let caller = self.caller.clone();
        let tx = self.tx.clone();
        let interval = self.poll_interval;

        *poller = Some(tokio::spawn(async move {
            log::info!("chain::state: polling chain {chain} every {interval:?}");
            loop {
                poll(chain, caller.as_ref(), &tx).await;
                tokio::time::sleep(jittered(interval)).await;
            }
        }));
    }

    pub fn stop(&self) {
        if let Ok(mut poller) = self.poller.lock() {
            if let Some(handle) = poller.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for ChainState {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll(chain: Chain, caller: &dyn ChainCaller, tx: &watch::Sender<Option<u64>>) {
    match caller.block_number(chain).await {
        Ok(block) => {
            tx.send_if_modified(|current| {
                if current.is_some_and(|seen| seen >= block) {
                    false
                } else {
                    *current = Some(block);
                    true
                }
            });
        }
        Err(e) => log::warn!("chain::state: block number for chain {chain} failed: {e}"),
    }
}

fn jittered(interval: Duration) -> Duration {
    let max_jitter = interval.as_millis() / 5;
    let jitter = u64::try_from(max_jitter).map_or(0, |max| fastrand::u64(0..=max));
    interval + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockChainCaller;

    #[tokio::test]
    async fn test_poll_publishes_only_increases() {
        let caller = Arc::new(MockChainCaller::new());
        caller.set_block_number(100);
        let state = ChainState::new(Chain::MAINNET, caller.clone(), Duration::from_secs(12));
        let mut rx = state.subscribe();

        state.poll_once().await;
        assert_eq!(state.latest_block(), Some(100));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        // A lagging node must not move the watermark backwards
        caller.set_block_number(99);
        state.poll_once().await;
        assert_eq!(state.latest_block(), Some(100));
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let caller = Arc::new(MockChainCaller::new());
        caller.set_block_number(7);
        let state = ChainState::new(Chain::BASE, caller, Duration::from_millis(10));
        let mut rx = state.subscribe();

        state.start();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(7));
        state.stop();
    }

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let value = jittered(base);
            assert!(value >= base && value <= Duration::from_secs(12));
        }
    }
}
