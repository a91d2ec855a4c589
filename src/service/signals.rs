use anyhow::{Context, Result};
use signal_hook::consts::signal::*;
use signal_hook_tokio::Signals;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{info, warn};

/// Signal types that can be received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    /// SIGTERM or SIGINT
    Shutdown,
    /// SIGHUP
    Reload,
}

/// Forwards process signals to the service loop
pub struct SignalHandler {
    signal_sender: mpsc::UnboundedSender<SignalType>,
}

impl SignalHandler {
    pub fn new(signal_sender: mpsc::UnboundedSender<SignalType>) -> Self {
        Self { signal_sender }
    }

    /// Create a handler together with the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SignalType>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }

    /// Listen for SIGTERM, SIGINT and SIGHUP until a shutdown signal arrives
    /// or the receiving side goes away
    pub async fn listen_for_signals(self) -> Result<()> {
        let mut signals =
            Signals::new([SIGTERM, SIGINT, SIGHUP]).context("Failed to register signal handlers")?;
        let handle = signals.handle();

        info!("Signal handler initialized, listening for SIGTERM, SIGINT, SIGHUP");

        while let Some(signal) = signals.next().await {
            let signal_type = match signal {
                SIGTERM | SIGINT => {
                    info!(
                        "Received shutdown signal ({}), initiating graceful shutdown",
                        signal
                    );
                    SignalType::Shutdown
                }
                SIGHUP => {
                    info!("Received SIGHUP signal, reloading configuration");
                    SignalType::Reload
                }
                _ => {
                    warn!("Received unexpected signal: {}", signal);
                    continue;
                }
            };

            if self.signal_sender.send(signal_type).is_err() {
                warn!("Service loop is gone, stopping signal handler");
                break;
            }
            if signal_type == SignalType::Shutdown {
                break;
            }
        }

        handle.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_delivers_to_receiver() {
        let (handler, mut receiver) = SignalHandler::channel();
        handler.signal_sender.send(SignalType::Reload).unwrap();
        assert_eq!(receiver.recv().await, Some(SignalType::Reload));
    }
}
