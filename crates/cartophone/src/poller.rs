//! Card poller - owns the reader and turns detections into card events.
//!
//! Scan errors are absorbed here: they are logged, followed by a short pause,
//! and never reach the arbiter.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::mode::CardEvent;
use crate::scanner::{CardScanner, ScanConfig};

pub struct CardPoller {
    scanner: Box<dyn CardScanner>,
    config: ScanConfig,
}

impl CardPoller {
    pub fn new(scanner: Box<dyn CardScanner>, config: ScanConfig) -> Self {
        Self { scanner, config }
    }

    pub fn spawn(
        self,
        card_tx: mpsc::Sender<CardEvent>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(card_tx, shutdown))
    }

    /// Poll until shutdown or until the arbiter stops accepting events.
    pub async fn run(mut self, card_tx: mpsc::Sender<CardEvent>, shutdown: CancellationToken) {
        tracing::info!(
            modulations = ?self.config.modulations,
            max_attempts = self.config.max_attempts,
            period_ms = self.config.period.as_millis() as u64,
            "Card poller started"
        );

        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.scanner.scan(&self.config) => result,
            };

            match result {
                Ok(Some(uid)) => {
                    tracing::debug!(%uid, "Tag detected");
                    if card_tx.send(CardEvent::new(uid)).await.is_err() {
                        tracing::warn!("Card event channel closed, poller exiting");
                        break;
                    }
                    if !Self::pause(self.config.cooldown, &shutdown).await {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Tag scan failed, retrying");
                    if !Self::pause(self.config.retry_delay, &shutdown).await {
                        break;
                    }
                }
            }
        }

        tracing::info!("Card poller stopped");
    }

    /// Sleep for `delay`; false if shutdown fired first.
    async fn pause(delay: std::time::Duration, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::ScanError;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scanner that replays a script, then reports no tag forever.
    struct ScriptedScanner {
        script: VecDeque<Result<Option<String>, ScanError>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedScanner {
        fn new(script: Vec<Result<Option<String>, ScanError>>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    script: script.into(),
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    #[async_trait::async_trait]
    impl CardScanner for ScriptedScanner {
        async fn scan(&mut self, _config: &ScanConfig) -> Result<Option<String>, ScanError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.pop_front() {
                Some(result) => result,
                None => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(None)
                }
            }
        }
    }

    fn fast_config() -> ScanConfig {
        ScanConfig {
            retry_delay: Duration::from_millis(5),
            cooldown: Duration::from_millis(1),
            ..ScanConfig::default()
        }
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn run_future_is_send() {
        let (scanner, _calls) = ScriptedScanner::new(Vec::new());
        let (tx, _rx) = mpsc::channel(1);
        let poller = CardPoller::new(Box::new(scanner), fast_config());
        let run = poller.run(tx, CancellationToken::new());
        assert_send(&run);
    }

    #[tokio::test]
    async fn emits_detected_uids_in_order() {
        let (scanner, _calls) = ScriptedScanner::new(vec![
            Ok(Some("AA 11".to_string())),
            Ok(None),
            Ok(Some("BB 22".to_string())),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let handle = CardPoller::new(Box::new(scanner), fast_config()).spawn(tx, shutdown.clone());

        assert_eq!(rx.recv().await.unwrap().uid, "AA 11");
        assert_eq!(rx.recv().await.unwrap().uid, "BB 22");

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn absorbs_scan_errors_and_keeps_polling() {
        let (scanner, calls) = ScriptedScanner::new(vec![
            Err(ScanError::Device("i2c timeout".to_string())),
            Err(ScanError::Closed),
            Ok(Some("CC 33".to_string())),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let handle = CardPoller::new(Box::new(scanner), fast_config()).spawn(tx, shutdown.clone());

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.uid, "CC 33");
        assert!(calls.load(Ordering::SeqCst) >= 3);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn no_tag_emits_nothing() {
        let (scanner, calls) = ScriptedScanner::new(vec![Ok(None), Ok(None)]);
        let (tx, mut rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let handle = CardPoller::new(Box::new(scanner), fast_config()).spawn(tx, shutdown.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
        assert!(calls.load(Ordering::SeqCst) >= 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn exits_when_receiver_dropped() {
        let (scanner, _calls) = ScriptedScanner::new(vec![Ok(Some("DD 44".to_string()))]);
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        let handle =
            CardPoller::new(Box::new(scanner), fast_config()).spawn(tx, CancellationToken::new());

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller should exit once the arbiter is gone")
            .unwrap();
    }
}
