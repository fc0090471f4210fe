use tracing::{debug, info};

/// Progress and message sink handed to every algorithm run.
#[derive(Debug, Default)]
pub struct Feedback {
    progress: f64,
    last_step: Option<u32>,
    reported: usize,
    messages: Vec<String>,
}

impl Feedback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records progress in percent. Logged at most once per 5 % step.
    pub fn set_progress(&mut self, percent: f64) {
        self.progress = percent.clamp(0.0, 100.0);
        let step = (self.progress / 5.0).floor() as u32;
        if self.last_step != Some(step) {
            self.last_step = Some(step);
            self.reported += 1;
            debug!("Progress: {:.1}%", self.progress);
        }
    }

    /// Progress after `done` of `total` items.
    pub fn set_progress_of(&mut self, done: usize, total: usize) {
        if total == 0 {
            self.set_progress(100.0);
        } else {
            self.set_progress(done as f64 / total as f64 * 100.0);
        }
    }

    pub fn push_info(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.messages.push(message);
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// How many progress lines have been logged.
    pub fn reported(&self) -> usize {
        self.reported
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_clamped_and_tracked() {
        let mut feedback = Feedback::new();
        feedback.set_progress_of(3, 4);
        assert_eq!(feedback.progress(), 75.0);
        feedback.set_progress(140.0);
        assert_eq!(feedback.progress(), 100.0);
        feedback.set_progress_of(0, 0);
        assert_eq!(feedback.progress(), 100.0);
    }

    #[test]
    fn logs_once_per_five_percent() {
        let mut feedback = Feedback::new();
        for done in 0..1000 {
            feedback.set_progress_of(done, 1000);
        }
        assert_eq!(feedback.reported(), 20);
        feedback.set_progress(100.0);
        feedback.set_progress(100.0);
        assert_eq!(feedback.reported(), 21);
    }

    #[test]
    fn keeps_info_messages() {
        let mut feedback = Feedback::new();
        feedback.push_info("Dropped 2 features");
        assert_eq!(feedback.messages(), ["Dropped 2 features".to_string()]);
    }
}
