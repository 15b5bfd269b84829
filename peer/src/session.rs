use tokio::io::{AsyncBufRead, Lines};
use tokio::sync::mpsc;

use udpchat_backend::models::ChatEnvelope;

pub const EXIT_COMMAND: &str = "exit";

/// Forward typed lines to the peer until `exit` or end of input.
///
/// Empty lines are skipped. Dropping the sender ends the peer's run loop.
pub async fn forward_input<R>(mut lines: Lines<R>, outgoing: mpsc::Sender<String>)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::warn!("failed to read input: {}", e);
                break;
            }
        };

        let line = line.trim_end();
        if line == EXIT_COMMAND {
            break;
        }
        if line.is_empty() {
            continue;
        }
        if outgoing.send(line.to_string()).await.is_err() {
            break;
        }
    }
}

/// Print received chat lines as `[date time] from: message`
pub async fn print_chat(mut display: mpsc::Receiver<ChatEnvelope>) {
    while let Some(chat) = display.recv().await {
        println!("{}", chat.display_line());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn test_exit_stops_forwarding() {
        let input = BufReader::new("hello\n\nworld\nexit\nafter\n".as_bytes()).lines();
        let (tx, mut rx) = mpsc::channel(8);

        forward_input(input, tx).await;

        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
        assert_eq!(rx.recv().await.as_deref(), Some("world"));
        assert_eq!(rx.recv().await, None);
    }
}
