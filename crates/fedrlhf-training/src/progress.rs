use serde::{Deserialize, Serialize};

/// Progress of a long-running pipeline stage (`generate`, `select`, `train`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { stage: String, total: Option<u64> },
    Message { stage: String, message: String },
    Step { stage: String, step: u64, total: Option<u64> },
    Finished { stage: String },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { stage, .. } => println!("[{stage}] started"),
            ProgressEvent::Message { stage, message } => println!("[{stage}] {message}"),
            ProgressEvent::Step { stage, step, total } => {
                if let Some(total) = total {
                    println!("[{stage}] step {step}/{total}");
                } else {
                    println!("[{stage}] step {step}");
                }
            }
            ProgressEvent::Finished { stage } => println!("[{stage}] finished"),
        }
    }
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn on_event(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_is_tagged() {
        let event = ProgressEvent::Step { stage: "train".to_string(), step: 2, total: Some(5) };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step");
        assert_eq!(json["stage"], "train");
    }
}
