use std::time::Instant;

/// Seam to the local media player.
///
/// The sync machine drives the player through this trait and separately
/// observes the transitions the player reports. Implementations must report
/// exactly one transition for every operation applied through this trait,
/// in the order the operations take effect, plus one for every
/// user-initiated action.
pub trait MediaPlayer: Send {
    fn play(&mut self);
    fn pause(&mut self);
    /// Current position in seconds from the start of the media file.
    fn position(&self) -> f64;
    fn set_position(&mut self, seconds: f64);
}

/// Wall-clock player used by the headless shell: the "media" is just a
/// timeline that advances while playing.
pub struct SimPlayer {
    playing: bool,
    base_position: f64,
    resumed_at: Option<Instant>,
}

impl SimPlayer {
    pub fn new() -> Self {
        Self {
            playing: false,
            base_position: 0.0,
            resumed_at: None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }
}

impl Default for SimPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaPlayer for SimPlayer {
    fn play(&mut self) {
        if !self.playing {
            self.playing = true;
            self.resumed_at = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        self.base_position = self.position();
        self.playing = false;
        self.resumed_at = None;
    }

    fn position(&self) -> f64 {
        match self.resumed_at {
            Some(resumed_at) => self.base_position + resumed_at.elapsed().as_secs_f64(),
            None => self.base_position,
        }
    }

    fn set_position(&mut self, seconds: f64) {
        self.base_position = seconds;
        if self.playing {
            self.resumed_at = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paused_player_holds_its_position() {
        let mut player = SimPlayer::new();
        player.set_position(12.5);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(player.position(), 12.5);
        assert!(!player.is_playing());
    }

    #[test]
    fn playing_player_advances() {
        let mut player = SimPlayer::new();
        player.play();
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert!(player.position() > 0.0);

        player.pause();
        let frozen = player.position();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(player.position(), frozen);
    }
}
