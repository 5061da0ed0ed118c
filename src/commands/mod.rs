//! Line-oriented commands typed at the terminal.

pub mod broadcast;
pub mod viewer;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

/// Forward stdin lines to a channel. The channel closes on EOF.
pub fn spawn_stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
        debug!("stdin closed");
    });
    rx
}

/// Split `verb rest...` into a lowercase verb and the trimmed remainder.
fn split(line: &str) -> Option<(String, &str)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    Some((verb.to_ascii_lowercase(), rest.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_handles_whitespace() {
        assert_eq!(split("  watch   cam1 "), Some(("watch".to_string(), "cam1")));
        assert_eq!(split("LIST"), Some(("list".to_string(), "")));
        assert_eq!(split("   "), None);
    }
}
