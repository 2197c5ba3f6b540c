//! Turn client events into terminal lines.

use rendezvous_client::ClientEvent;
use rendezvous_types::ClientId;

/// Lines to print for `event`, as seen by client `me`.
pub fn render(event: &ClientEvent, me: ClientId) -> Vec<String> {
    match event {
        ClientEvent::Peers(peers) => {
            let others: Vec<&ClientId> = peers.iter().filter(|p| **p != me).collect();
            if others.is_empty() {
                return vec!["No clients found".to_string()];
            }
            std::iter::once("Discovered clients:".to_string())
                .chain(others.iter().map(|p| p.to_string()))
                .collect()
        }
        ClientEvent::Broadcast { from, text } if from.is_server() => {
            vec![format!("Server: {}", text)]
        }
        ClientEvent::Broadcast { from, text } => vec![format!("{} : {}", from, text)],
        ClientEvent::Message { from, text } => vec![format!("{} sent: {}", from, text)],
        ClientEvent::EncryptedMessage { from, text } => {
            vec![format!("{} sent (encrypted): {}", from, text)]
        }
        ClientEvent::KeyEstablished { peer } => vec![format!("Key exchanged with {}", peer)],
    }
}
