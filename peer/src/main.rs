use std::error::Error;

use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use udpchat_backend::config::PeerConfig;
use udpchat_backend::membership::Peer;

mod prompt;
mod session;

use crate::prompt::Prompter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    // environment first, then the interactive answers
    let defaults = PeerConfig::load()?;
    let mut prompter = Prompter::new(BufReader::new(stdin()).lines());
    let config = prompter.peer_config(defaults).await?;
    log::info!(
        "Joining as {} via registry {}:{}",
        config.username,
        config.registry_host,
        config.registry_port
    );

    // the clock handshake gates everything else
    let peer = match Peer::join(&config).await {
        Ok(peer) => peer,
        Err(e) => {
            log::error!("Could not join the chat: {}", e);
            return Err(e.into());
        }
    };
    log::info!(
        "Joined as {} at {} (offset={} ms, members={})",
        peer.username(),
        peer.local_key(),
        peer.offset(),
        peer.cache().len()
    );

    let (outgoing_tx, outgoing_rx) = mpsc::channel(32);
    let (display_tx, display_rx) = mpsc::channel(32);

    tokio::spawn(session::forward_input(prompter.into_lines(), outgoing_tx));
    tokio::spawn(session::print_chat(display_rx));

    peer.run(outgoing_rx, display_tx).await?;
    Ok(())
}
