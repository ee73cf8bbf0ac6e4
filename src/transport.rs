/// Transport collaborator boundary.
///
/// The core never depends on a specific chat or API front end; it only needs
/// somewhere to push human-readable status text for an owner. Front ends
/// implement `StatusSink` and hand it in at construction.
pub trait StatusSink: Send + Sync {
    fn push_status(&self, owner_id: &str, text: &str);
}

/// Default sink: status lines go to the process log.
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn push_status(&self, owner_id: &str, text: &str) {
        log::info!("status for {}: {}", owner_id, text);
    }
}

/// Collects pushed messages for assertions in tests.
#[derive(Default)]
pub struct RecordingSink {
    pub messages: std::sync::Mutex<Vec<(String, String)>>,
}

impl StatusSink for RecordingSink {
    fn push_status(&self, owner_id: &str, text: &str) {
        self.messages
            .lock()
            .expect("sink lock poisoned")
            .push((owner_id.to_string(), text.to_string()));
    }
}
