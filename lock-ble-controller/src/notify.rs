//! Chunked notification streams
//!
//! A background task reads raw values from the subscription, reassembles
//! chunks, decrypts and decodes each complete value and forwards it over a
//! channel. The task stops the subscription itself when it finishes, which
//! includes the consumer dropping the stream. A gap longer than the
//! central's timeout between two values is `Timeout`.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use lock_proto::ble::{self, Notification};
use lock_proto::chunk::{Chunk, Reassembler};
use lock_proto::tlv::{self, TlvConfig};
use lock_proto::KeyCredentials;
use tokio::sync::mpsc;

use crate::central::{Central, ValueStream};
use crate::transaction::Session;
use crate::{Error, Result};

/// Pages buffered ahead of the consumer
const CHANNEL_CAPACITY: usize = 16;

pub struct NotificationStream<N> {
    receiver: mpsc::Receiver<Result<N>>,
}

impl<N: Notification + Send + 'static> NotificationStream<N> {
    /// Subscribe to `N::CHARACTERISTIC`. Write the triggering request only
    /// after this returns, so no chunk is missed.
    pub async fn subscribe<C: Central + 'static>(
        session: &Session<C>,
        credentials: KeyCredentials,
        config: TlvConfig,
    ) -> Result<Self> {
        let attribute = *session.attribute(N::CHARACTERISTIC)?;
        let values = session.notify(N::CHARACTERISTIC).await?;
        let central = session.central().clone();
        let peripheral = session.peripheral().clone();
        let idle = session.timeout();
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let outcome = tokio::select! {
                outcome = forward(values, &sender, &credentials, &config, idle) => outcome,
                _ = sender.closed() => {
                    tracing::debug!(
                        characteristic = %N::CHARACTERISTIC,
                        "notification stream dropped"
                    );
                    Ok(())
                }
            };

            if let Err(e) = central.stop_notify(&peripheral, &attribute).await {
                tracing::warn!(error = %e, "stop notify failed");
            }
            if let Err(e) = outcome {
                tracing::debug!(
                    error = %e,
                    characteristic = %N::CHARACTERISTIC,
                    "notification stream failed"
                );
                let _ = sender.send(Err(e)).await;
            }
        });

        Ok(Self { receiver })
    }

    /// Drain every page; the first error aborts
    pub async fn collect(mut self) -> Result<Vec<N>> {
        let mut pages = Vec::new();
        while let Some(page) = self.next().await {
            pages.push(page?);
        }
        Ok(pages)
    }
}

/// Ok once the last page is forwarded or the consumer is gone
async fn forward<N: Notification>(
    mut values: ValueStream,
    sender: &mpsc::Sender<Result<N>>,
    credentials: &KeyCredentials,
    config: &TlvConfig,
    idle: Duration,
) -> Result<()> {
    let mut reassembler = Reassembler::for_envelopes();

    loop {
        let value = match tokio::time::timeout(idle, values.next()).await {
            Ok(Some(value)) => value,
            Ok(None) => return Err(Error::Disconnected),
            Err(_) => return Err(Error::Timeout),
        };

        let chunk: Chunk = tlv::decode(&value, config)?;
        let Some(envelope) = reassembler.push(chunk)? else {
            continue;
        };

        let page: N = ble::decode_notification(&envelope, credentials, config)?;
        let is_last = page.is_last();
        tracing::debug!(is_last, "notification received");

        if sender.send(Ok(page)).await.is_err() || is_last {
            return Ok(());
        }
    }
}

impl<N> Stream for NotificationStream<N> {
    type Item = Result<N>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
