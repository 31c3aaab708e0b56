use anyhow::Result;
use clap::Parser;
use shared::domain::{ChannelId, ConversationId, UserId};
use sync_core::{SyncClient, SyncEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

#[derive(Parser, Debug)]
struct Args {
    /// Backend HTTP base, e.g. http://localhost:8080
    #[arg(long)]
    base_url: String,
    /// Push endpoint, e.g. ws://localhost:8080/ws
    #[arg(long)]
    ws_url: String,
    /// Channel to open on startup; omit to start with a DM peer instead.
    #[arg(long)]
    channel: Option<i64>,
    /// DM peer to open on startup.
    #[arg(long)]
    peer: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let client = SyncClient::new(&args.base_url);
    let identity = client.resolve_identity().await?;
    println!("signed in as {} ({})", identity.display_name, identity.user_id);

    client.refresh_roster().await?;
    for channel in client.roster_channels().await {
        println!("  channel {}  {}", channel.channel_id.0, channel.name);
    }
    for user in client.roster_users().await {
        println!("  dm       {}", user.user_id);
    }

    let mut events = client.subscribe_events();
    client.connect(&args.ws_url).await?;

    let conversation = match (args.channel, args.peer) {
        (Some(channel), _) => Some(ConversationId::Channel(ChannelId(channel))),
        (None, Some(peer)) => Some(ConversationId::Direct(UserId::new(peer))),
        (None, None) => None,
    };
    if let Some(conversation) = &conversation {
        client.open_conversation(conversation.clone()).await?;
        for message in client.timeline(conversation).await {
            println!("[{}] {}: {}", conversation, message.sender_id, message.content);
        }
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Ok(event) = event else { break };
                match event {
                    SyncEvent::TimelineUpdated(conversation) => {
                        if let Some(message) = client.timeline(&conversation).await.last() {
                            println!("[{}] {}: {}", conversation, message.sender_id, message.content);
                        }
                    }
                    SyncEvent::UnreadIncremented(conversation) => {
                        println!("(unread in {conversation})");
                    }
                    SyncEvent::HistoryPrepended(outcome) => {
                        println!(
                            "(loaded {} older messages in {}{})",
                            outcome.prepended,
                            outcome.conversation,
                            if outcome.has_more_history { "" } else { ", start of history" },
                        );
                    }
                    SyncEvent::ActiveConversationCleared(channel_id) => {
                        println!("(channel {} was removed)", channel_id.0);
                    }
                    SyncEvent::SendFailed { reason, .. } => {
                        println!("(send failed: {reason})");
                    }
                    SyncEvent::Disconnected => {
                        println!("(push channel disconnected)");
                        break;
                    }
                    SyncEvent::Error(message) => warn!("{message}"),
                    SyncEvent::IdentityResolved(_) | SyncEvent::RosterUpdated => {}
                }
            }
            line = stdin.next_line() => {
                let Ok(Some(line)) = line else { break };
                let Some(active) = client.active_conversation().await else {
                    println!("(no open conversation; pass --channel or --peer)");
                    continue;
                };
                if line.trim() == "/more" {
                    match client.trigger_history_fetch().await {
                        Ok(true) => {}
                        Ok(false) => println!("(no more history)"),
                        Err(err) => warn!("history fetch failed: {err}"),
                    }
                    continue;
                }
                if let Err(err) = client.send_message(active, &line).await {
                    warn!("send failed: {err}");
                }
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
