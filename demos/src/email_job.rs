//! An example job handler, grounded on the teacher's doc-comment `EmailJob`
//! (`messaging::job`) — adapted here from a typed `Job` struct to this
//! runtime's dynamic `args: &[serde_json::Value]` contract, since the
//! job processor resolves handlers by string `class` tag rather than by
//! a typed job enum.

use async_trait::async_trait;
use cosmo_core::{JobHandler, ProcessingError};
use serde::Deserialize;
use tracing::info;

/// Sends a welcome/notification email. Registered under the `"EmailJob"`
/// class tag; enqueued with `args = [user_id, template]`.
///
/// A fresh instance is constructed per invocation (see
/// [`cosmo_core::JobHandler`]), so this carries no state of its own.
pub struct EmailJob;

#[derive(Debug, Deserialize)]
struct EmailArgs(u64, String);

#[async_trait]
impl JobHandler for EmailJob {
    async fn perform(&self, jid: &str, args: &[serde_json::Value]) -> Result<(), ProcessingError> {
        let EmailArgs(user_id, template) = serde_json::from_value(serde_json::Value::Array(args.to_vec()))
            .map_err(|e| ProcessingError::permanent(format!("malformed EmailJob args: {e}")))?;

        info!(jid = %jid, user_id, template = %template, "sending email");

        // A real handler would call out to a mail provider here. This
        // example only demonstrates the handler contract.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn performs_with_valid_args() {
        let job = EmailJob;
        let args = vec![json!(42), json!("welcome")];
        assert!(job.perform("abc123", &args).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_malformed_args() {
        let job = EmailJob;
        let args = vec![json!("not-a-user-id")];
        assert!(job.perform("abc123", &args).await.is_err());
    }
}
