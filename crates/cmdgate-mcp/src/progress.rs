//! Bridges per-line progress events to `notifications/progress`.

use std::future::Future;
use std::time::Duration;

use cmdgate_tools::{ProgressEvent, ProgressSink};
use rmcp::RoleServer;
use rmcp::model::{ProgressNotificationParam, ProgressToken};
use rmcp::service::{Peer, ServiceError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Delivery side of progress notifications.
pub trait ProgressNotifier: Send + Sync + 'static {
    fn notify(
        &self,
        param: ProgressNotificationParam,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;
}

impl ProgressNotifier for Peer<RoleServer> {
    fn notify(
        &self,
        param: ProgressNotificationParam,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send {
        self.notify_progress(param)
    }
}

/// Channel capacity and per-notification delivery bound.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSettings {
    pub buffer: usize,
    pub notify_timeout: Duration,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            buffer: 256,
            notify_timeout: Duration::from_secs(1),
        }
    }
}

/// Owns the sending half handed to the supervisor and the task draining it.
///
/// The supervisor only ever `try_send`s, so a slow client loses notifications
/// instead of stalling the command.
pub struct ProgressForwarder {
    tx: mpsc::Sender<ProgressEvent>,
    task: JoinHandle<()>,
    notify_timeout: Duration,
}

impl ProgressForwarder {
    pub fn spawn<N: ProgressNotifier>(
        notifier: N,
        token: ProgressToken,
        settings: ProgressSettings,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<ProgressEvent>(settings.buffer.max(1));
        let notify_timeout = settings.notify_timeout;
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                #[allow(clippy::cast_precision_loss)]
                let param = ProgressNotificationParam {
                    progress_token: token.clone(),
                    progress: event.sequence as f64,
                    total: None,
                    message: Some(event.text),
                };
                match tokio::time::timeout(notify_timeout, notifier.notify(param)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::debug!("progress notification failed: {e}"),
                    Err(_) => tracing::warn!(
                        sequence = event.sequence,
                        "progress notification timed out, dropped"
                    ),
                }
            }
        });
        Self {
            tx,
            task,
            notify_timeout,
        }
    }

    #[must_use]
    pub fn sink(&self) -> &dyn ProgressSink {
        &self.tx
    }

    /// Close the channel and let queued notifications drain, bounded by one
    /// delivery timeout.
    pub async fn finish(self) {
        let Self {
            tx,
            mut task,
            notify_timeout,
        } = self;
        drop(tx);
        if tokio::time::timeout(notify_timeout, &mut task).await.is_err() {
            tracing::warn!("progress backlog not drained, abandoning remaining notifications");
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<(f64, Option<String>)>>>,
    }

    impl ProgressNotifier for Recorder {
        fn notify(
            &self,
            param: ProgressNotificationParam,
        ) -> impl Future<Output = Result<(), ServiceError>> + Send {
            self.seen
                .lock()
                .unwrap()
                .push((param.progress, param.message));
            std::future::ready(Ok(()))
        }
    }

    struct Stalled;

    impl ProgressNotifier for Stalled {
        fn notify(
            &self,
            _param: ProgressNotificationParam,
        ) -> impl Future<Output = Result<(), ServiceError>> + Send {
            std::future::pending()
        }
    }

    fn token() -> ProgressToken {
        ProgressToken(rmcp::model::NumberOrString::Number(7))
    }

    #[tokio::test]
    async fn forwards_sequence_and_text() {
        let recorder = Recorder::default();
        let forwarder = ProgressForwarder::spawn(recorder.clone(), token(), ProgressSettings::default());
        forwarder.sink().emit(ProgressEvent {
            sequence: 1,
            text: "compiling".into(),
        });
        forwarder.sink().emit(ProgressEvent {
            sequence: 2,
            text: "done".into(),
        });
        forwarder.finish().await;

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (1.0, Some("compiling".to_owned())),
                (2.0, Some("done".to_owned()))
            ]
        );
    }

    #[tokio::test]
    async fn full_buffer_drops_instead_of_blocking() {
        let recorder = Recorder::default();
        let settings = ProgressSettings {
            buffer: 1,
            notify_timeout: Duration::from_secs(1),
        };
        let forwarder = ProgressForwarder::spawn(recorder.clone(), token(), settings);
        for sequence in 1..=100 {
            forwarder.sink().emit(ProgressEvent {
                sequence,
                text: String::new(),
            });
        }
        forwarder.finish().await;
        let delivered = recorder.seen.lock().unwrap().len();
        assert!(delivered >= 1);
        assert!(delivered < 100);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_client_does_not_hang_finish() {
        let settings = ProgressSettings {
            buffer: 8,
            notify_timeout: Duration::from_millis(50),
        };
        let forwarder = ProgressForwarder::spawn(Stalled, token(), settings);
        for sequence in 1..=5 {
            forwarder.sink().emit(ProgressEvent {
                sequence,
                text: "line".into(),
            });
        }
        forwarder.finish().await;
    }
}
