use std::collections::HashMap;

use shared::{
    domain::{ChannelId, UserId},
    protocol::{ChannelSummary, UserSummary},
};

/// Known users and channels, joined against conversations for display. The
/// reconciler relies on the channel membership test to tell group traffic
/// apart from DMs.
#[derive(Debug, Default)]
pub struct Roster {
    channels: HashMap<ChannelId, ChannelSummary>,
    users: HashMap<UserId, UserSummary>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_known_channel(&self, channel_id: ChannelId) -> bool {
        self.channels.contains_key(&channel_id)
    }

    pub fn channel(&self, channel_id: ChannelId) -> Option<&ChannelSummary> {
        self.channels.get(&channel_id)
    }

    /// Returns true if the channel was not listed before.
    pub fn upsert_channel(&mut self, channel: ChannelSummary) -> bool {
        self.channels.insert(channel.channel_id, channel).is_none()
    }

    pub fn remove_channel(&mut self, channel_id: ChannelId) -> bool {
        self.channels.remove(&channel_id).is_some()
    }

    pub fn upsert_user(&mut self, user: UserSummary) {
        self.users.insert(user.user_id.clone(), user);
    }

    pub fn replace_channels(&mut self, channels: Vec<ChannelSummary>) {
        self.channels = channels
            .into_iter()
            .map(|channel| (channel.channel_id, channel))
            .collect();
    }

    pub fn replace_users(&mut self, users: Vec<UserSummary>) {
        self.users = users
            .into_iter()
            .map(|user| (user.user_id.clone(), user))
            .collect();
    }

    pub fn channels(&self) -> Vec<ChannelSummary> {
        let mut channels: Vec<_> = self.channels.values().cloned().collect();
        channels.sort_by_key(|channel| channel.channel_id);
        channels
    }

    pub fn users(&self) -> Vec<UserSummary> {
        let mut users: Vec<_> = self.users.values().cloned().collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }
}
