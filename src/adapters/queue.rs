//! Line-delimited queue entry point.
//!
//! Each input line is one JSON request; each output line is the JSON
//! [`Response`] for it, in the same order.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{Result, StackError};
use crate::orchestrator::{CancelSignal, Orchestrator};

use super::{Response, parse_request};

/// Processes requests from `reader` until end of input or cancellation.
///
/// Returns the number of requests answered.
///
/// # Errors
///
/// Returns an error if reading or writing fails.
pub async fn run_queue<R, W>(
    orchestrator: &Orchestrator,
    reader: R,
    mut writer: W,
    cancel: &CancelSignal,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut answered = 0;

    loop {
        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("Queue cancelled after {} request(s)", answered);
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("End of queue input");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match parse_request(&line) {
            Ok(input) => {
                let run_cancel = cancel
                    .clone()
                    .with_timeout(orchestrator.settings().run_timeout);
                let report = orchestrator.execute(&input, None, &run_cancel).await;
                Response::from_report(&report)
            }
            Err(err) => {
                warn!("Rejected queue message: {}", err);
                Response::from_error(&err)
            }
        };

        let mut encoded = serde_json::to_vec(&response)
            .map_err(|e| StackError::internal(format!("response encoding failed: {e}")))?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        answered += 1;
    }

    Ok(answered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::engine::Engine;
    use crate::engine::fake::{FakeEngine, Point};
    use crate::identity::FixedClock;
    use crate::orchestrator::cancel_pair;
    use crate::testing::sample_json;
    use chrono::NaiveDate;
    use secrecy::SecretString;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::io::BufReader;

    fn orchestrator(engine: FakeEngine) -> Orchestrator {
        let settings = Settings::new("/tmp/vmstack").with_provider_token(SecretString::from("tok-123"));
        let engine: Arc<dyn Engine> = Arc::new(engine);
        Orchestrator::new(engine, Arc::new(settings))
            .with_clock(Arc::new(FixedClock(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())))
    }

    fn responses(output: &[u8]) -> Vec<Value> {
        std::str::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_answers_each_line_in_order() {
        let input = format!("{}\n\n{{broken\n{}\n", sample_json("create"), sample_json("destroy"));
        let mut output = Vec::new();

        let answered = run_queue(
            &orchestrator(FakeEngine::new()),
            BufReader::new(input.as_bytes()),
            &mut output,
            &CancelSignal::never(),
        )
        .await
        .unwrap();

        let responses = responses(&output);
        assert_eq!(answered, 3);
        assert_eq!(responses[0]["statusCode"], 200);
        assert_eq!(responses[1]["statusCode"], 400);
        assert_eq!(responses[2]["statusCode"], 200);
        assert_eq!(responses[2]["body"]["intent"], "destroy");
    }

    #[tokio::test]
    async fn test_failure_carries_kind() {
        let input = format!("{}\n", sample_json("create"));
        let mut output = Vec::new();

        run_queue(
            &orchestrator(FakeEngine::new().failing_at(Point::Up)),
            BufReader::new(input.as_bytes()),
            &mut output,
            &CancelSignal::never(),
        )
        .await
        .unwrap();

        let responses = responses(&output);
        assert_eq!(responses[0]["statusCode"], 502);
        assert_eq!(responses[0]["body"]["error"]["kind"], "ApplyError");
    }

    #[tokio::test]
    async fn test_cancelled_queue_stops_reading() {
        let (handle, cancel) = cancel_pair();
        handle.cancel();
        let input = format!("{}\n", sample_json("create"));
        let mut output = Vec::new();

        let answered = run_queue(
            &orchestrator(FakeEngine::new()),
            BufReader::new(input.as_bytes()),
            &mut output,
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(answered, 0);
        assert!(output.is_empty());
    }
}
