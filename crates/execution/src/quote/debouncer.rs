//! Collapses bursts of amount edits into a single router quote.

use super::engine::{QuoteEngine, QuoteResult};
use crate::error::ClientError;
use cpamm_domain::{Address, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// The inputs a quote was requested for. A quote is only published while its
/// input is still the latest one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteInput {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteState {
    /// No amount entered.
    Idle,
    /// Waiting for the window to elapse or the router to answer.
    Pending { input: QuoteInput },
    Ready { input: QuoteInput, quote: QuoteResult },
    Failed { input: QuoteInput, error: ClientError },
}

impl QuoteState {
    pub fn quote(&self) -> Option<&QuoteResult> {
        match self {
            Self::Ready { quote, .. } => Some(quote),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }
}

pub struct QuoteDebouncer {
    engine: Arc<QuoteEngine>,
    window: Duration,
    latest: watch::Sender<Option<QuoteInput>>,
    state: watch::Sender<QuoteState>,
}

impl QuoteDebouncer {
    pub fn new(engine: Arc<QuoteEngine>, window: Duration) -> Self {
        Self {
            engine,
            window,
            latest: watch::channel(None).0,
            state: watch::channel(QuoteState::Idle).0,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<QuoteState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> QuoteState {
        self.state.borrow().clone()
    }

    fn is_latest(&self, input: &QuoteInput) -> bool {
        self.latest.borrow().as_ref() == Some(input)
    }

    /// Records an edit and, once the window passes without a newer edit,
    /// quotes it.
    ///
    /// Returns the state published for this input, or `None` when a newer
    /// edit superseded it. A superseded input never reaches the router, and a
    /// response that arrives after a newer edit is dropped.
    pub async fn request(&self, input: Option<QuoteInput>) -> Option<QuoteState> {
        let input = match input {
            Some(input) if !input.amount_in.is_zero() => input,
            _ => {
                self.latest.send_replace(None);
                self.state.send_replace(QuoteState::Idle);
                return Some(QuoteState::Idle);
            }
        };
        self.latest.send_replace(Some(input.clone()));
        self.state.send_replace(QuoteState::Pending {
            input: input.clone(),
        });

        tokio::time::sleep(self.window).await;
        if !self.is_latest(&input) {
            debug!("quote input superseded before the window elapsed");
            return None;
        }

        let outcome = match self.engine.route(input.token_in, input.token_out).await {
            Ok(path) => self.engine.quote(input.amount_in, &path).await,
            Err(e) => Err(e),
        };
        if !self.is_latest(&input) {
            debug!("discarding quote for superseded input");
            return None;
        }

        let state = match outcome {
            Ok(quote) => QuoteState::Ready { input, quote },
            Err(error) => QuoteState::Failed { input, error },
        };
        self.state.send_replace(state.clone());
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, units};
    use cpamm_domain::NATIVE_TOKEN;

    const WINDOW: Duration = Duration::from_millis(300);

    fn debouncer(fx: &Fixture) -> Arc<QuoteDebouncer> {
        let engine = Arc::new(QuoteEngine::new(fx.node(), fx.contracts.clone()));
        Arc::new(QuoteDebouncer::new(engine, WINDOW))
    }

    fn input(fx: &Fixture, eth: u64) -> QuoteInput {
        QuoteInput {
            token_in: NATIVE_TOKEN,
            token_out: fx.usdc,
            amount_in: units(eth, 18),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_issues_single_quote() {
        let fx = Fixture::new();
        let debouncer = debouncer(&fx);

        let mut handles = Vec::new();
        for eth in 1..=3 {
            let d = debouncer.clone();
            let i = input(&fx, eth);
            handles.push(tokio::spawn(async move { d.request(Some(i)).await }));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(results[0], None);
        assert_eq!(results[1], None);
        let last = results[2].clone().unwrap();
        assert_eq!(last.quote().unwrap().amount_in(), units(3, 18));
        assert_eq!(fx.ledger.read_count(), 1);
        assert_eq!(debouncer.state(), last);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_response_is_discarded() {
        let fx = Fixture::new();
        let debouncer = debouncer(&fx);
        fx.ledger.set_latency(Duration::from_millis(500));

        let d = debouncer.clone();
        let first = input(&fx, 1);
        let slow = tokio::spawn(async move { d.request(Some(first)).await });

        // Past the window, so the first quote is in flight.
        tokio::time::sleep(Duration::from_millis(400)).await;
        let second = input(&fx, 2);
        let fresh = debouncer.request(Some(second.clone())).await.unwrap();

        assert_eq!(slow.await.unwrap(), None);
        match fresh {
            QuoteState::Ready { input, quote } => {
                assert_eq!(input, second);
                assert_eq!(quote.amount_in(), units(2, 18));
            }
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(debouncer.state().quote().unwrap().amount_in(), units(2, 18));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_input_goes_idle() {
        let fx = Fixture::new();
        let debouncer = debouncer(&fx);
        let mut zero = input(&fx, 1);
        zero.amount_in = U256::zero();
        assert_eq!(debouncer.request(Some(zero)).await, Some(QuoteState::Idle));
        assert_eq!(debouncer.request(None).await, Some(QuoteState::Idle));
        assert_eq!(fx.ledger.read_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_route_is_published() {
        let fx = Fixture::new();
        let debouncer = debouncer(&fx);
        let orphan = Address::repeat_byte(0x42);
        fx.ledger.add_token(orphan, "ORF", "Orphan", 18);
        let state = debouncer
            .request(Some(QuoteInput {
                token_in: orphan,
                token_out: fx.usdc,
                amount_in: units(1, 18),
            }))
            .await
            .unwrap();
        assert!(matches!(
            state,
            QuoteState::Failed {
                error: ClientError::NoRoute { .. },
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_pending_then_ready() {
        let fx = Fixture::new();
        let debouncer = debouncer(&fx);
        let mut rx = debouncer.subscribe();
        let d = debouncer.clone();
        let i = input(&fx, 1);
        let task = tokio::spawn(async move { d.request(Some(i)).await });

        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_pending());
        task.await.unwrap();
        assert!(rx.borrow_and_update().quote().is_some());
    }
}
