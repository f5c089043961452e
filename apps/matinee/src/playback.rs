use matinee_proto::{PlaybackEvent, PlaybackKind};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

use crate::player::MediaPlayer;

/// Outbound half of the sync machine: fan a locally observed transition out
/// to the rest of the room.
pub trait PlaybackOutlet: Send + Sync {
    fn emit(&self, kind: PlaybackKind, position: f64);
}

/// Position corrections are gated on this drift so ordinary relay-latency
/// skew does not cause visible seeking on every event.
pub const DRIFT_THRESHOLD_SECS: f64 = 0.5;

/// Keeps one participant's player in lockstep with the room.
///
/// Echoes are suppressed without timers: every event on the wire carries
/// its origin identity and a per-origin sequence number, receivers drop
/// their own and already-seen events, and the transitions the machine
/// itself causes by applying a remote event are recorded and swallowed
/// when the player reports them back.
pub struct PlaybackSync<P> {
    player: P,
    outlet: Arc<dyn PlaybackOutlet>,
    identity: String,
    expected_echoes: VecDeque<PlaybackKind>,
    applied_seq: HashMap<String, u64>,
}

impl<P: MediaPlayer> PlaybackSync<P> {
    pub fn new(player: P, outlet: Arc<dyn PlaybackOutlet>, identity: impl Into<String>) -> Self {
        Self {
            player,
            outlet,
            identity: identity.into(),
            expected_echoes: VecDeque::new(),
            applied_seq: HashMap::new(),
        }
    }

    /// True while player transitions caused by a remote application are
    /// still outstanding; those transitions must not be re-emitted.
    pub fn suppressing(&self) -> bool {
        !self.expected_echoes.is_empty()
    }

    /// Feed one locally observed player transition.
    pub fn observe_local(&mut self, kind: PlaybackKind) {
        if let Some(front) = self.expected_echoes.front() {
            if *front == kind {
                self.expected_echoes.pop_front();
                debug!(?kind, "swallowed player echo of a remote event");
                return;
            }
            // The user acted while an application was in flight; the user
            // wins and stale expectations are void.
            self.expected_echoes.clear();
        }
        self.outlet.emit(kind, self.player.position());
    }

    /// Apply a remote playback event to the local player.
    pub fn apply_remote(&mut self, event: &PlaybackEvent) {
        if event.origin == self.identity {
            return;
        }
        let seen = self.applied_seq.get(&event.origin).copied().unwrap_or(0);
        if event.seq <= seen {
            debug!(origin = %event.origin, seq = event.seq, "dropped stale playback event");
            return;
        }
        self.applied_seq.insert(event.origin.clone(), event.seq);

        if matches!(event.kind, PlaybackKind::Play | PlaybackKind::Seek) {
            let drift = (self.player.position() - event.position).abs();
            if drift > DRIFT_THRESHOLD_SECS {
                debug!(drift, target = event.position, "correcting playback position");
                self.player.set_position(event.position);
                self.expected_echoes.push_back(PlaybackKind::Seek);
            }
        }

        match event.kind {
            PlaybackKind::Play => {
                self.player.play();
                self.expected_echoes.push_back(PlaybackKind::Play);
            }
            PlaybackKind::Pause => {
                self.player.pause();
                self.expected_echoes.push_back(PlaybackKind::Pause);
            }
            // A seek alone leaves the play/pause state untouched.
            PlaybackKind::Seek => {}
        }
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut P {
        &mut self.player
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakePlayer {
        position: f64,
        playing: bool,
        ops: Vec<String>,
    }

    impl MediaPlayer for FakePlayer {
        fn play(&mut self) {
            self.playing = true;
            self.ops.push("play".into());
        }

        fn pause(&mut self) {
            self.playing = false;
            self.ops.push("pause".into());
        }

        fn position(&self) -> f64 {
            self.position
        }

        fn set_position(&mut self, seconds: f64) {
            self.position = seconds;
            self.ops.push(format!("seek:{seconds}"));
        }
    }

    #[derive(Default)]
    struct RecordingOutlet {
        emitted: Mutex<Vec<(PlaybackKind, f64)>>,
    }

    impl PlaybackOutlet for RecordingOutlet {
        fn emit(&self, kind: PlaybackKind, position: f64) {
            self.emitted.lock().unwrap().push((kind, position));
        }
    }

    fn machine(position: f64) -> (PlaybackSync<FakePlayer>, Arc<RecordingOutlet>) {
        let outlet = Arc::new(RecordingOutlet::default());
        let player = FakePlayer {
            position,
            ..FakePlayer::default()
        };
        let sync = PlaybackSync::new(player, outlet.clone(), "me");
        (sync, outlet)
    }

    fn remote(kind: PlaybackKind, position: f64, seq: u64) -> PlaybackEvent {
        PlaybackEvent {
            kind,
            position,
            origin: "partner".into(),
            seq,
        }
    }

    #[test]
    fn small_drift_applies_play_without_moving_position() {
        let (mut sync, _outlet) = machine(10.0);

        sync.apply_remote(&remote(PlaybackKind::Play, 10.0, 1));

        assert!(sync.player().playing);
        assert_eq!(sync.player().position, 10.0);
        assert_eq!(sync.player().ops, vec!["play"]);
    }

    #[test]
    fn large_drift_corrects_position_before_playing() {
        let (mut sync, _outlet) = machine(0.0);

        sync.apply_remote(&remote(PlaybackKind::Seek, 42.3, 1));

        assert_eq!(sync.player().position, 42.3);
        // A bare seek does not touch the play/pause state.
        assert!(!sync.player().playing);
        assert_eq!(sync.player().ops, vec!["seek:42.3"]);
    }

    #[test]
    fn drift_at_the_threshold_is_left_alone() {
        let (mut sync, _outlet) = machine(10.0);

        sync.apply_remote(&remote(PlaybackKind::Play, 10.5, 1));
        assert_eq!(sync.player().position, 10.0);

        sync.apply_remote(&remote(PlaybackKind::Play, 11.1, 2));
        assert_eq!(sync.player().position, 11.1);
    }

    #[test]
    fn own_events_reflected_back_are_ignored() {
        let (mut sync, _outlet) = machine(0.0);

        let echo = PlaybackEvent {
            kind: PlaybackKind::Seek,
            position: 99.0,
            origin: "me".into(),
            seq: 1,
        };
        sync.apply_remote(&echo);

        assert_eq!(sync.player().position, 0.0);
        assert!(sync.player().ops.is_empty());
    }

    #[test]
    fn duplicate_and_stale_sequence_numbers_are_dropped() {
        let (mut sync, _outlet) = machine(0.0);

        sync.apply_remote(&remote(PlaybackKind::Play, 10.0, 2));
        sync.apply_remote(&remote(PlaybackKind::Play, 10.0, 2));
        sync.apply_remote(&remote(PlaybackKind::Pause, 10.0, 1));

        assert_eq!(sync.player().ops, vec!["seek:10", "play"]);
    }

    #[test]
    fn player_echoes_of_applied_events_are_not_re_emitted() {
        let (mut sync, outlet) = machine(10.0);

        sync.apply_remote(&remote(PlaybackKind::Play, 10.0, 1));
        assert!(sync.suppressing());

        // The player reports the transition the machine just caused.
        sync.observe_local(PlaybackKind::Play);
        assert!(!sync.suppressing());
        assert!(outlet.emitted.lock().unwrap().is_empty());

        // The next genuine user action goes out as usual.
        sync.observe_local(PlaybackKind::Pause);
        assert_eq!(
            outlet.emitted.lock().unwrap().as_slice(),
            &[(PlaybackKind::Pause, 10.0)]
        );
    }

    #[test]
    fn corrected_position_swallows_the_seek_echo_too() {
        let (mut sync, outlet) = machine(0.0);

        sync.apply_remote(&remote(PlaybackKind::Play, 42.3, 1));
        assert!(sync.suppressing());

        sync.observe_local(PlaybackKind::Seek);
        sync.observe_local(PlaybackKind::Play);

        assert!(!sync.suppressing());
        assert!(outlet.emitted.lock().unwrap().is_empty());
    }

    #[test]
    fn a_user_action_during_suppression_wins() {
        let (mut sync, outlet) = machine(10.0);

        sync.apply_remote(&remote(PlaybackKind::Play, 10.0, 1));
        assert!(sync.suppressing());

        // Pause arrives instead of the expected play echo: a real user
        // action. It is emitted and the stale expectation is dropped.
        sync.observe_local(PlaybackKind::Pause);
        assert!(!sync.suppressing());
        assert_eq!(
            outlet.emitted.lock().unwrap().as_slice(),
            &[(PlaybackKind::Pause, 10.0)]
        );
    }

    #[test]
    fn local_transitions_emit_with_the_current_position() {
        let (mut sync, outlet) = machine(7.25);

        sync.observe_local(PlaybackKind::Seek);

        assert_eq!(
            outlet.emitted.lock().unwrap().as_slice(),
            &[(PlaybackKind::Seek, 7.25)]
        );
    }
}
