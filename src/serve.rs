//! JSON-lines prediction loop used by the CLI

use crate::metrics::PredictionMetrics;
use crate::predictor::PredictorContext;
use crate::types::{PredictionRequest, PredictionResponse};
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Answer one raw input line. Blank lines yield `None`.
pub fn respond(
    ctx: &PredictorContext,
    metrics: &PredictionMetrics,
    raw: &[u8],
) -> Option<PredictionResponse> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim(),
        Err(e) => {
            metrics.record_failure("parse");
            warn!(error = %e, "Input line is not valid UTF-8");
            return Some(PredictionResponse::failure(
                uuid::Uuid::new_v4().to_string(),
                format!("invalid input line: {}", e),
            ));
        }
    };
    if line.is_empty() {
        return None;
    }

    let request = match PredictionRequest::parse(line) {
        Ok(request) => request,
        Err(e) => {
            metrics.record_failure("parse");
            warn!(error = %e, "Failed to parse input line");
            return Some(PredictionResponse::failure(
                uuid::Uuid::new_v4().to_string(),
                format!("invalid input line: {}", e),
            ));
        }
    };

    let start = Instant::now();
    let response = match ctx.predict(&request.input) {
        Ok(output) => {
            let elapsed = start.elapsed();
            metrics.record_prediction(elapsed, &output);
            debug!(
                id = %request.id,
                latency_us = elapsed.as_micros() as u64,
                "Prediction served"
            );
            PredictionResponse::success(request.id, output)
                .with_latency_us(elapsed.as_micros() as u64)
        }
        Err(e) => {
            metrics.record_failure(e.kind());
            warn!(id = %request.id, kind = e.kind(), error = %e, "Prediction failed");
            PredictionResponse::failure(request.id, e)
        }
    };
    Some(response)
}

/// Read lines from `reader` until EOF, writing one JSON record per
/// non-blank line to `writer`. Bad lines produce error records.
pub async fn serve_lines<R, W>(
    ctx: &PredictorContext,
    metrics: &PredictionMetrics,
    mut reader: R,
    mut writer: W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }

        let Some(response) = respond(ctx, metrics, &buf) else {
            continue;
        };

        let mut record = serde_json::to_vec(&response)?;
        record.push(b'\n');
        writer.write_all(&record).await?;
    }
    writer.flush().await
}
