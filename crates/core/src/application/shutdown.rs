// Graceful shutdown signal shared by every long-running loop in the system
// (server accept loop, agent phase loop, maintenance scheduler) — one
// `tokio::sync::watch` channel, cloned cheaply per listener.

use tokio::sync::watch;

#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(&mut self) {
        let _ = self.rx.changed().await;
    }
}

pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_once_shutdown_is_sent() {
        let (sender, mut token) = shutdown_channel();
        assert!(!token.is_shutdown());

        let waiter = tokio::spawn(async move {
            token.wait().await;
            token.is_shutdown()
        });

        sender.shutdown();
        assert!(waiter.await.unwrap());
    }

    #[test]
    fn fresh_token_is_not_shutdown() {
        let (_sender, token) = shutdown_channel();
        assert!(!token.is_shutdown());
    }
}
