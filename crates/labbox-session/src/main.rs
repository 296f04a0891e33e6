//! Session binary
//!
//! Reads one JSON job request per line on stdin, runs the requests
//! concurrently through the session broker, and prints one JSON outcome
//! per line on stdout as each finishes.

use std::sync::Arc;

use labbox_session::{LineOutcome, Session, SessionConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries outcomes.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "labbox_session=info,labbox_hither=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = SessionConfig::from_env()?;
    tracing::info!(?config, "Starting labbox session");
    let session = Arc::new(Session::with_builtins(config));

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();
    let mut line_number = 0;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        let session = Arc::clone(&session);
        let tx = tx.clone();
        tasks.spawn(async move {
            let outcome = session.handle_line(line_number, &line).await;
            emit(&tx, line_number, &outcome);
        });
    }

    while tasks.join_next().await.is_some() {}
    drop(tx);
    writer.await??;

    session.shutdown();
    Ok(())
}

/// Encodes `outcome` and queues it for stdout. Returns whether the line was
/// queued; a dropped line is logged rather than silently lost.
fn emit(tx: &mpsc::UnboundedSender<String>, line_number: usize, outcome: &LineOutcome) -> bool {
    let json = match serde_json::to_string(outcome) {
        Ok(json) => json,
        Err(err) => {
            tracing::error!(line = line_number, error = %err, "Failed to encode outcome");
            return false;
        }
    };
    if tx.send(json).is_err() {
        tracing::warn!(line = line_number, "Output writer closed, dropping outcome");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use labbox_session::InvalidLine;

    fn invalid(line: usize) -> LineOutcome {
        LineOutcome::Invalid(InvalidLine {
            line,
            status: "error",
            error_message: "bad request".into(),
        })
    }

    #[test]
    fn emit_queues_encoded_outcome() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(emit(&tx, 1, &invalid(1)));

        let line = rx.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["line"], 1);
        assert_eq!(value["error_message"], "bad request");
    }

    #[test]
    fn emit_reports_closed_writer() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(!emit(&tx, 7, &invalid(7)));
    }
}
