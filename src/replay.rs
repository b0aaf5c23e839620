/// Replay notification frames written as hex lines on stdin
use log::{debug, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::pipeline::NotificationSink;

/// Handle reported for replayed frames
pub const REPLAY_HANDLE: u16 = 0x0000;

/// Parse one line of hex, e.g. `ff 55 01 02 ...` or `ff:55:01:02...`
///
/// Returns `None` for blank lines and `#` comments.
pub fn parse_frame_line(line: &str) -> Option<Result<Vec<u8>, hex::FromHexError>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let digits: String = line
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    Some(hex::decode(digits))
}

/// Feed every frame from `reader` to `sink` until end of input
///
/// Returns the number of frames delivered.
pub async fn replay<R, S>(reader: R, sink: &mut S) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    S: NotificationSink,
{
    let mut lines = reader.lines();
    let mut delivered = 0;

    while let Some(line) = lines.next_line().await? {
        match parse_frame_line(&line) {
            Some(Ok(frame)) => {
                debug!("Replaying {} byte frame", frame.len());
                sink.on_notification(REPLAY_HANDLE, &frame);
                delivered += 1;
            }
            Some(Err(e)) => warn!("Skipping invalid hex line {:?}: {}", line, e),
            None => {}
        }
    }

    Ok(delivered)
}

pub async fn replay_stdin<S: NotificationSink>(sink: &mut S) -> std::io::Result<usize> {
    replay(BufReader::new(tokio::io::stdin()), sink).await
}
