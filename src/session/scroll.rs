/// Decides whether the view auto-scrolls as new content streams in. The
/// follower disengages when the user scrolls away from the bottom and
/// re-arms on every new submission.
#[derive(Debug)]
pub struct ScrollFollower {
    following: bool,
}

impl ScrollFollower {
    pub fn new() -> Self {
        Self { following: true }
    }

    pub fn on_user_scroll(&mut self, at_bottom: bool) {
        self.following = at_bottom;
    }

    pub fn should_follow(&self) -> bool {
        self.following
    }

    pub fn rearm(&mut self) {
        self.following = true;
    }
}

impl Default for ScrollFollower {
    fn default() -> Self {
        Self::new()
    }
}
