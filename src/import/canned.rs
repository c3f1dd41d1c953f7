//! Default canned reply templates.

use tracing::info;

use crate::error::ServiceError;
use crate::support::MessageService;
use crate::support::model::CannedDraft;

/// (title, category, content)
const DEFAULT_CANNED: &[(&str, &str, &str)] = &[
    (
        "Loan Approval Status",
        "loan",
        "Thank you for contacting us. We are currently reviewing your loan application. You will receive an update within 2-3 business days. If you have any urgent concerns, please let us know.",
    ),
    (
        "Loan Disbursement Timeline",
        "loan",
        "Once your loan is approved, disbursement typically occurs within 1-2 business days. You will receive a notification once the funds have been transferred to your account.",
    ),
    (
        "Update Account Information",
        "account",
        "To update your account information, please log in to your Branch account and navigate to Settings > Profile. If you need assistance, we can help guide you through the process.",
    ),
    (
        "General Inquiry",
        "general",
        "Thank you for reaching out. We have received your message and will respond to your inquiry shortly. If this is urgent, please call our support line.",
    ),
    (
        "Password Reset",
        "account",
        "To reset your password, please click on \"Forgot Password\" on the login page and follow the instructions sent to your registered email address.",
    ),
];

/// Insert any default template whose title is not present yet. Returns how many were added.
pub async fn seed_default_canned(service: &MessageService) -> Result<usize, ServiceError> {
    let mut added = 0;
    for &(title, category, content) in DEFAULT_CANNED {
        if service
            .seed_canned(CannedDraft::new(title, content, category))
            .await?
            .is_some()
        {
            added += 1;
        }
    }
    info!(added, total = DEFAULT_CANNED.len(), "Default canned messages seeded");
    Ok(added)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::store::{Database, LibSqlBackend};
    use crate::support::BroadcastNotifier;

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let db = LibSqlBackend::new_local(&tmp.path().join("seed.db"), Duration::from_secs(5))
            .await
            .unwrap();
        db.run_migrations().await.unwrap();
        let service = MessageService::new(Arc::new(db), Arc::new(BroadcastNotifier::new(4)));

        assert_eq!(seed_default_canned(&service).await.unwrap(), 5);
        assert_eq!(seed_default_canned(&service).await.unwrap(), 0);

        let canned = service.list_canned().await.unwrap();
        assert_eq!(canned.len(), 5);
        assert_eq!(canned[0].title, "Loan Approval Status");
        assert_eq!(canned[2].category, "account");
    }
}
