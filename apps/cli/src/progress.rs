//! Terminal progress reporting for pipeline stages.

use fedrlhf_training::{ProgressEvent, ProgressSink};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

/// Renders [`ProgressEvent`]s as one indicatif bar per stage.
#[derive(Default)]
pub struct BarProgressSink {
    bar: Mutex<Option<ProgressBar>>,
}

impl BarProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(stage: &str, total: Option<u64>) -> ProgressBar {
        let bar = match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                bar.set_style(
                    ProgressStyle::with_template("{prefix:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=> "),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::with_template("{spinner:.cyan} {prefix:.cyan} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner())
                        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
                );
                bar.enable_steady_tick(Duration::from_millis(100));
                bar
            }
        };
        bar.set_prefix(stage.to_string());
        bar
    }
}

impl ProgressSink for BarProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        let Ok(mut slot) = self.bar.lock() else {
            return;
        };
        match event {
            ProgressEvent::Started { stage, total } => {
                if let Some(old) = slot.take() {
                    old.finish_and_clear();
                }
                *slot = Some(Self::start(&stage, total));
            }
            ProgressEvent::Message { message, .. } => {
                if let Some(bar) = slot.as_ref() {
                    bar.set_message(message);
                }
            }
            ProgressEvent::Step { step, total, .. } => {
                if let Some(bar) = slot.as_ref() {
                    if let Some(total) = total {
                        bar.set_length(total);
                    }
                    bar.set_position(step);
                }
            }
            ProgressEvent::Finished { .. } => {
                if let Some(bar) = slot.take() {
                    bar.finish_and_clear();
                }
            }
        }
    }
}
