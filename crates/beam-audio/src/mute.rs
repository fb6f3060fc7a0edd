use std::collections::HashSet;

/// Process-wide policy for apps whose audio must not be muted locally while
/// other windows of the same app are still on the sender's screen.
///
/// Some apps play all audio through one process regardless of window (one
/// audio service for every window of the bundle). Muting the process would
/// silence the windows that are not being beamed, so the mute tap is skipped
/// while such windows remain.
#[derive(Debug, Clone)]
pub struct MuteBlacklist {
    bundles: HashSet<String>,
}

impl Default for MuteBlacklist {
    fn default() -> Self {
        Self {
            bundles: HashSet::from(["com.google.Chrome".to_owned()]),
        }
    }
}

impl MuteBlacklist {
    pub fn new<I, S>(bundles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bundles: bundles.into_iter().map(Into::into).collect(),
        }
    }

    /// False iff `bundle_id` is blacklisted and the app still has windows
    /// beyond the beamed ones.
    pub fn should_mute(
        &self,
        bundle_id: &str,
        total_windows: usize,
        beamed_windows: usize,
    ) -> bool {
        !(self.bundles.contains(bundle_id) && total_windows > beamed_windows)
    }
}
