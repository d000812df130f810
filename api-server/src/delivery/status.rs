use crate::models::DeliveryStatus;

/// Things that happen to a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryEvent {
    RetryStarted,
    DispatchSucceeded,
    DispatchFailed,
}

impl DeliveryStatus {
    /// Next status after `event`. A retry is accepted from every status, including `success`.
    pub fn transition(self, event: DeliveryEvent) -> DeliveryStatus {
        match (self, event) {
            (_, DeliveryEvent::RetryStarted) => DeliveryStatus::Pending,
            (DeliveryStatus::Pending, DeliveryEvent::DispatchSucceeded) => DeliveryStatus::Success,
            (_, DeliveryEvent::DispatchFailed) => DeliveryStatus::Failed,
            // Only a pending attempt is waiting on a dispatch outcome.
            (status, DeliveryEvent::DispatchSucceeded) => status,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
        }
    }
}
