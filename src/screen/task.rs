use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};

use super::format::format_line;
use super::state::{Cursor, Format, Query, QueryResponse, SnapshotResponse};

/// Actor loop: the single owner of the virtual terminal.
///
/// Raw PTY chunks are applied to the emulator and then rebroadcast to
/// subscribers from the same serial loop. Because joins are handled between
/// chunk applications, a `Join` response's snapshot and its broadcast
/// receiver are consistent: the receiver yields exactly the chunks fed after
/// the snapshot was taken.
///
/// The broadcast sender lives in this function, nowhere else. Returning
/// drops it, which is what ends every subscriber's stream.
pub async fn run(
    mut raw_rx: mpsc::Receiver<Bytes>,
    mut query_rx: mpsc::Receiver<(Query, oneshot::Sender<QueryResponse>)>,
    cols: usize,
    rows: usize,
    scrollback_limit: usize,
) {
    let (output_tx, _) = broadcast::channel::<Bytes>(super::BROADCAST_CAPACITY);
    let mut vt = avt::Vt::builder()
        .size(cols, rows)
        .scrollback_limit(scrollback_limit)
        .build();

    loop {
        tokio::select! {
            chunk = raw_rx.recv() => {
                match chunk {
                    Some(bytes) => {
                        // Unrecognized escape sequences are ignored by the
                        // emulator; invalid UTF-8 is replaced, never fatal.
                        let text = String::from_utf8_lossy(&bytes);
                        vt.feed_str(&text);
                        let _ = output_tx.send(bytes);
                    }
                    // PTY reader ended; dropping output_tx closes all
                    // subscriber streams.
                    None => break,
                }
            }

            Some((query, response_tx)) = query_rx.recv() => {
                let response = handle_query(&mut vt, query, &output_tx);
                let _ = response_tx.send(response);
            }
        }
    }
}

fn handle_query(
    vt: &mut avt::Vt,
    query: Query,
    output_tx: &broadcast::Sender<Bytes>,
) -> QueryResponse {
    match query {
        Query::Snapshot { format } => QueryResponse::Snapshot(snapshot(vt, format)),

        Query::Join { format } => {
            QueryResponse::Joined(snapshot(vt, format), output_tx.subscribe())
        }

        Query::Resize { cols, rows } => {
            vt.resize(cols, rows);
            QueryResponse::Ok
        }
    }
}

fn snapshot(vt: &avt::Vt, format: Format) -> SnapshotResponse {
    let styled = matches!(format, Format::Styled);
    let (cols, rows) = vt.size();
    let cursor = vt.cursor();

    SnapshotResponse {
        lines: vt.view().map(|l| format_line(l, styled)).collect(),
        cursor: Cursor {
            row: cursor.row,
            col: cursor.col,
            visible: cursor.visible,
        },
        cols,
        rows,
    }
}
