use async_trait::async_trait;
use tracing::info;

use crate::booking::gateway::{GatewayError, Notifier};
use crate::domain::client::Client;
use crate::domain::reservation::Reservation;

/// Records confirmations in the log. Stands in for an email channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn reservation_confirmed(
        &self,
        client: &Client,
        reservation: &Reservation,
    ) -> Result<(), GatewayError> {
        info!(
            event_name = "booking.notification.logged",
            client_id = %client.id.0,
            has_email = client.email.is_some(),
            reservation_code = %reservation.code,
            date = %reservation.date(),
            start = %reservation.start_time(),
            "reservation confirmation notice"
        );
        Ok(())
    }
}
