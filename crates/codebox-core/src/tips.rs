//! Loading-screen tips
//!
//! The fetch runs beside storage startup and never gates it. Dropping the
//! handle or calling `cancel` stops the request.

use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::Result;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TipControl {
    Continue,
    Cancel,
}

#[derive(Clone)]
pub struct TipFetcher {
    client: reqwest::Client,
    url: String,
}

impl TipFetcher {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Download the tip list and pick one entry.
    pub async fn fetch(&self) -> Result<Option<String>> {
        let tips: Vec<String> = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(pick_tip(&tips, Utc::now().timestamp_subsec_nanos() as usize))
    }

    /// Start fetching on the runtime.
    pub fn spawn(self) -> TipHandle {
        let (tx, rx) = watch::channel(TipControl::Continue);

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = cancelled(rx) => {
                    tracing::debug!(url = %self.url, "Tip fetch cancelled");
                    None
                }
                result = self.fetch() => match result {
                    Ok(tip) => tip,
                    Err(e) => {
                        tracing::debug!(url = %self.url, error = %e, "Tip fetch failed");
                        None
                    }
                },
            }
        });

        TipHandle {
            control: tx,
            task: Some(task),
        }
    }
}

pub struct TipHandle {
    control: watch::Sender<TipControl>,
    task: Option<JoinHandle<Option<String>>>,
}

impl TipHandle {
    pub fn cancel(&self) {
        let _ = self.control.send(TipControl::Cancel);
    }

    /// Wait for the fetch. Cancelled or failed fetches yield `None`.
    pub async fn tip(mut self) -> Option<String> {
        let task = self.task.take()?;
        task.await.ok().flatten()
    }
}

impl Drop for TipHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn cancelled(mut control: watch::Receiver<TipControl>) {
    loop {
        if *control.borrow_and_update() == TipControl::Cancel {
            return;
        }
        if control.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn pick_tip(tips: &[String], seed: usize) -> Option<String> {
    if tips.is_empty() {
        return None;
    }
    tips.get(seed % tips.len()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_pick_tip() {
        let tips = vec!["a".to_string(), "b".to_string()];
        assert_eq!(pick_tip(&tips, 3), Some("b".to_string()));
        assert_eq!(pick_tip(&[], 3), None);
    }

    #[tokio::test]
    async fn test_fetch_from_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let body = r#"["Use the file explorer to manage workspaces"]"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let handle = TipFetcher::new(format!("http://{}/tips.json", addr))
            .unwrap()
            .spawn();
        assert_eq!(
            handle.tip().await.as_deref(),
            Some("Use the file explorer to manage workspaces")
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_pending_fetch() {
        // Accepts connections and never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let handle = TipFetcher::new(format!("http://{}/tips.json", addr))
            .unwrap()
            .spawn();
        handle.cancel();

        let tip = tokio::time::timeout(Duration::from_secs(2), handle.tip())
            .await
            .unwrap();
        assert!(tip.is_none());
    }
}
