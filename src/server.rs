use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::error::ErrorKind;
use crate::limits::MAX_LINE_BYTES;
use crate::observability;
use crate::protocol::{self, Response};
use crate::service::RentalService;

/// Serve one client until it disconnects. Each line in gets exactly one
/// line out, in order.
pub async fn process_connection(socket: TcpStream, service: Arc<RentalService>) -> io::Result<()> {
    socket.set_nodelay(true)?;
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

    // After a decode error the stream yields one `None` and then resumes.
    let mut resume = false;
    loop {
        let Some(next) = lines.next().await else {
            if std::mem::take(&mut resume) {
                continue;
            }
            break;
        };
        let line = match next {
            Ok(line) => {
                resume = false;
                line
            }
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                resume = true;
                let resp = Response::failure(
                    ErrorKind::Validation,
                    format!("request line exceeds {MAX_LINE_BYTES} bytes"),
                );
                metrics::counter!(observability::REQUESTS_TOTAL, "op" => "oversized", "status" => "400")
                    .increment(1);
                send(&mut lines, resp).await?;
                continue;
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }

        let started = Instant::now();
        let (op, resp) = match protocol::parse_request(&line) {
            Ok(request) => {
                let op = observability::op_label(&request);
                (op, protocol::dispatch(&service, request).await)
            }
            Err(e) => ("malformed", Response::from_error(&e)),
        };
        let status = resp.status();
        metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => status.to_string())
            .increment(1);
        metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
            .record(started.elapsed().as_secs_f64());
        if status >= 500 {
            tracing::warn!(op, status, "request failed");
        }
        send(&mut lines, resp).await?;
    }
    Ok(())
}

async fn send(lines: &mut Framed<TcpStream, LinesCodec>, resp: Response) -> io::Result<()> {
    lines.send(resp.to_line()).await.map_err(|e| match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::other(other.to_string()),
    })
}
