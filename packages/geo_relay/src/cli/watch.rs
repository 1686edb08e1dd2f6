use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::io::Write;
use tokio_tungstenite::tungstenite;

use crate::cli::ClientError;
use crate::position::BroadcastLine;

/// Connect to a relay's broadcast listener and print every line received.
/// Returns when the relay closes the connection.
pub async fn watch(url: &str, parse: bool) -> Result<(), ClientError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(ClientError::from_tungstenite)?;

    let (_ws_write, mut ws_read) = ws_stream.split();
    while let Some(msg) = ws_read.next().await {
        match msg {
            Ok(tungstenite::Message::Text(text)) => {
                let rendered = if parse {
                    describe_line(text.as_str())
                } else {
                    text.as_str().to_string()
                };
                let mut stdout = std::io::stdout().lock();
                let _ = writeln!(stdout, "{rendered}");
                let _ = stdout.flush();
            }
            Ok(tungstenite::Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => return Err(ClientError::Other(e.into())),
        }
    }
    Ok(())
}

/// Human-readable form of a broadcast line; unparseable lines are shown raw.
pub fn describe_line(text: &str) -> String {
    match text.parse::<BroadcastLine>() {
        Ok(line) => format_line(&line),
        Err(e) => format!("{text} (unparsed: {e})"),
    }
}

fn format_line(line: &BroadcastLine) -> String {
    let captured = DateTime::<Utc>::from_timestamp_millis(line.timestamp)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| format!("{}ms", line.timestamp));
    format!(
        "captured {} (producer clock {:04}-{:02}-{:02} {:02}:{:02}:{:02}) lat {} lon {}",
        captured,
        line.year,
        line.month,
        line.day,
        line.hour,
        line.minute,
        line.second,
        line.latitude,
        line.longitude
    )
}
