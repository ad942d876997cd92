//! Completion notifications for terminal encounters.

use crossbeam_channel::{unbounded, Receiver, Sender};
use raid_proto::CompletionSummary;
use tracing::{info, warn};

pub type SummaryReceiver = Receiver<CompletionSummary>;

/// Receives one summary per encounter, when it completes or fails.
pub trait CompletionNotifier: Send + Sync {
    fn notify(&self, summary: &CompletionSummary);
}

/// Forwards summaries over a channel to whoever renders them.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: Sender<CompletionSummary>,
}

impl ChannelNotifier {
    pub fn new(sender: Sender<CompletionSummary>) -> Self {
        Self { sender }
    }

    pub fn channel() -> (Self, SummaryReceiver) {
        let (sender, receiver) = unbounded();
        (Self::new(sender), receiver)
    }
}

impl CompletionNotifier for ChannelNotifier {
    fn notify(&self, summary: &CompletionSummary) {
        if self.sender.send(summary.clone()).is_err() {
            warn!(
                target: "raid::encounter",
                encounter = %summary.encounter_id,
                "notifier.receiver_dropped"
            );
        }
    }
}

/// Writes summaries to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl CompletionNotifier for LogNotifier {
    fn notify(&self, summary: &CompletionSummary) {
        info!(
            target: "raid::encounter",
            encounter = %summary.encounter_id,
            result = ?summary.result,
            participants = summary.participants.len(),
            monsters_defeated = summary.monsters_defeated,
            duration_ms = summary.duration_ms,
            "encounter.summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raid_proto::{EncounterId, EncounterResult};

    fn summary(id: &str) -> CompletionSummary {
        CompletionSummary {
            encounter_id: EncounterId::new(id),
            region: "marsh".to_string(),
            result: EncounterResult::Victory,
            participants: Vec::new(),
            monsters_defeated: 5,
            duration_ms: 1_000,
            thread_ref: None,
        }
    }

    #[test]
    fn channel_notifier_forwards_in_order() {
        let (notifier, receiver) = ChannelNotifier::channel();
        notifier.notify(&summary("a"));
        notifier.notify(&summary("b"));
        let ids: Vec<_> = receiver
            .try_iter()
            .map(|s| s.encounter_id.to_string())
            .collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn dropped_receiver_is_tolerated() {
        let (notifier, receiver) = ChannelNotifier::channel();
        drop(receiver);
        notifier.notify(&summary("a"));
        LogNotifier.notify(&summary("a"));
    }
}
