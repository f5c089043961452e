use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long one reaction stays on the overlay.
pub const REACTION_TTL: Duration = Duration::from_millis(2000);

/// Outbound half: fan the emoji out to the room.
pub trait ReactionOutlet: Send + Sync {
    fn emit(&self, emoji: &str);
}

/// One floating emoji on the overlay.
#[derive(Debug, Clone)]
pub struct Reaction {
    pub emoji: String,
    /// Horizontal position as a percentage of the overlay width.
    pub column_pct: u8,
    pub shown_at: Instant,
}

/// The ephemeral reaction overlay. Local and remote reactions display
/// identically and expire independently; nothing here is ordered,
/// deduplicated, or acknowledged.
pub struct ReactionBoard {
    outlet: Arc<dyn ReactionOutlet>,
    active: Vec<Reaction>,
}

impl ReactionBoard {
    pub fn new(outlet: Arc<dyn ReactionOutlet>) -> Self {
        Self {
            outlet,
            active: Vec::new(),
        }
    }

    /// Show an emoji locally and fan it out to the room.
    pub fn send(&mut self, emoji: &str, now: Instant) {
        self.display(emoji, now);
        self.outlet.emit(emoji);
    }

    /// Show an emoji a peer sent. Indistinguishable from a local send.
    pub fn apply_remote(&mut self, emoji: &str, now: Instant) {
        self.display(emoji, now);
    }

    fn display(&mut self, emoji: &str, now: Instant) {
        let column_pct = rand::thread_rng().gen_range(20..=80);
        self.active.push(Reaction {
            emoji: emoji.to_string(),
            column_pct,
            shown_at: now,
        });
    }

    /// Drop every reaction whose display window has elapsed.
    pub fn prune(&mut self, now: Instant) {
        self.active
            .retain(|r| now.duration_since(r.shown_at) < REACTION_TTL);
    }

    pub fn visible(&self) -> &[Reaction] {
        &self.active
    }
}
