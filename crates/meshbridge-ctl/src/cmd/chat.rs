//! Interactive chat over a topic socket.
//!
//! Lines read from stdin are sent as text frames; frames from the topic
//! are printed as they arrive. `quit` or end of input closes the socket.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite::Message;

pub async fn cmd_chat(url: &str) -> Result<()> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("failed to open {}, is meshbridged running?", url))?;
    let (mut sink, mut stream) = ws.split();

    eprintln!("Connected to {}. Type `quit` to leave.", url);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("failed to read stdin")? {
                    Some(line) if line.trim() == "quit" => break,
                    Some(line) => sink.send(Message::text(line)).await?,
                    None => break,
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => println!("{}", text.as_str()),
                    Some(Ok(Message::Binary(data))) => {
                        println!("{}", String::from_utf8_lossy(&data))
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        eprintln!("Connection closed by meshbridged.");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("socket error"),
                }
            }
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    Ok(())
}
