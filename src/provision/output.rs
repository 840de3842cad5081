use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc::UnboundedSender;

fn flush(pending: &mut Vec<u8>, tx: &UnboundedSender<String>) -> bool {
    if pending.is_empty() {
        return true;
    }

    let line = String::from_utf8_lossy(pending).into_owned();

    pending.clear();

    tx.send(line).is_ok()
}

/// Reads `reader` to the end, sending each non-empty line to `tx`. Both `\n`
/// and `\r` end a line. Stops early if the receiver goes away.
pub(super) async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: UnboundedSender<String>) {
    let mut reader = BufReader::new(reader);
    let mut pending = Vec::new();

    loop {
        let chunk = match reader.fill_buf().await {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::debug!("stopped reading pull output: {}", err);
                break;
            }
        };

        if chunk.is_empty() {
            break;
        }

        let len = chunk.len();
        let mut open = true;

        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                open = flush(&mut pending, &tx);

                if !open {
                    break;
                }
            } else {
                pending.push(byte);
            }
        }

        reader.consume(len);

        if !open {
            return;
        }
    }

    flush(&mut pending, &tx);
}
