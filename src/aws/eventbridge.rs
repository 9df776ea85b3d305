//! Event bus sink over `aws-sdk-eventbridge`

use aws_sdk_eventbridge::Client;
use aws_sdk_eventbridge::error::DisplayErrorContext;
use aws_sdk_eventbridge::types::PutEventsRequestEntry;
use tokio::runtime::Runtime;

use super::{current_thread_runtime, load_sdk_config};
use crate::sink::{EventEntry, EventSink, PublishError, PublishResult};

/// [`EventSink`] that puts each entry on an EventBridge bus
pub struct EventBridgeSink {
    client: Client,
    runtime: Runtime,
}

impl EventBridgeSink {
    /// Connect to EventBridge in `region`
    pub fn connect(region: &str) -> PublishResult<Self> {
        let runtime = current_thread_runtime()?;
        let config = load_sdk_config(&runtime, region);
        Ok(Self {
            client: Client::new(&config),
            runtime,
        })
    }
}

impl EventSink for EventBridgeSink {
    fn put_event(&self, entry: &EventEntry) -> PublishResult<()> {
        let request_entry = PutEventsRequestEntry::builder()
            .source(&entry.source)
            .detail_type(&entry.detail_type)
            .detail(&entry.detail)
            .event_bus_name(&entry.event_bus_name)
            .build();

        let output = self
            .runtime
            .block_on(self.client.put_events().entries(request_entry).send())
            .map_err(|e| PublishError::Transport(DisplayErrorContext(&e).to_string()))?;

        if output.failed_entry_count() > 0 {
            let failed = output.entries().iter().find(|e| e.error_code().is_some());
            return Err(PublishError::Rejected {
                code: failed
                    .and_then(|e| e.error_code())
                    .unwrap_or("Unknown")
                    .to_string(),
                message: failed
                    .and_then(|e| e.error_message())
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        Ok(())
    }
}
