//! Opening the error/data channel pair of one dial.

use tokio::io::AsyncWriteExt;

use crate::dialer::Budget;
use crate::{
    BoxedChannel, ChannelKind, ChannelSpec, DialError, DialStage, LogicalAddress,
    MultiplexedConnection, RequestId,
};

/// The two channels a dial needs, opened in a fixed order.
pub(crate) struct ChannelSet {
    /// Read-only from the local side; its write half is already closed.
    pub(crate) error: BoxedChannel,
    pub(crate) data: BoxedChannel,
}

impl ChannelSet {
    /// Opens the error channel, closes its write half, then opens the data
    /// channel. Both carry `request_id` and the address's port.
    ///
    /// If the data channel fails, the error channel is released before the
    /// error is returned. Closing the connection is left to its guard.
    pub(crate) async fn open(
        connection: &dyn MultiplexedConnection,
        address: &LogicalAddress,
        request_id: RequestId,
        budget: &Budget,
    ) -> Result<Self, DialError> {
        let mut error =
            Self::open_one(connection, address, ChannelKind::Error, request_id, budget).await?;

        let half_close = budget
            .run(DialStage::OpenErrorChannel, error.shutdown())
            .await?;
        if let Err(e) = half_close {
            tracing::debug!(error = %e, "closing the write half of the error channel failed");
        }

        let data =
            match Self::open_one(connection, address, ChannelKind::Data, request_id, budget).await {
                Ok(data) => data,
                Err(e) => {
                    drop(error);
                    return Err(e);
                }
            };

        Ok(Self { error, data })
    }

    async fn open_one(
        connection: &dyn MultiplexedConnection,
        address: &LogicalAddress,
        kind: ChannelKind,
        request_id: RequestId,
        budget: &Budget,
    ) -> Result<BoxedChannel, DialError> {
        let spec = ChannelSpec {
            kind,
            port: address.port(),
            request_id,
        };
        let channel = budget
            .run(DialStage::opening(kind), connection.open_channel(&spec))
            .await?
            .map_err(|source| DialError::OpenChannelFailed {
                kind,
                address: address.to_string(),
                source,
            })?;
        tracing::debug!(%kind, %request_id, "channel opened");
        Ok(channel)
    }
}
