use anyhow::{Context, Result};

use peer_session::PeerId;
use presence::{PresenceClient, PresenceEntry};

use crate::config::PresenceConfig;

/// One-shot directory query.
pub async fn peers_command(
    presence: &PresenceConfig,
    exclude: Option<String>,
    json: bool,
) -> Result<()> {
    let client = PresenceClient::new(&presence.server_url, presence.request_timeout)
        .context("Failed to create presence client")?;

    let peers = match exclude {
        Some(id) => client.list_others(&PeerId::from(id)).await,
        None => client.list().await,
    }
    .with_context(|| format!("Failed to query presence server at {}", presence.server_url))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&peers)?);
    } else {
        print!("{}", render_table(&peers));
    }
    Ok(())
}

fn render_table(peers: &[PresenceEntry]) -> String {
    if peers.is_empty() {
        return "No peers online.\n".to_string();
    }
    let mut out = format!("{:<38} {:<20} {}\n", "PEER ID", "USERNAME", "CONNECTED AT");
    out.push_str(&"-".repeat(80));
    out.push('\n');
    for peer in peers {
        out.push_str(&format!(
            "{:<38} {:<20} {}\n",
            peer.peer_id.as_str(),
            peer.display_name,
            peer.registered_at.format("%Y-%m-%d %H:%M:%S UTC"),
        ));
    }
    out.push_str(&format!("\n{} peer(s)\n", peers.len()));
    out
}
