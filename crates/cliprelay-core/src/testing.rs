//! Testing helpers and mock utilities.
//!
//! Provides convenient constructors for inbound messages and mocked
//! collaborators.

use crate::credentials::MockCredentialStore;
use crate::session::provider::{ConversationId, InboundMessage, MessageBody};

/// Build a text message from someone else in `conversation`.
#[must_use]
pub fn inbound(id: &str, conversation: &str, text: &str) -> InboundMessage {
    InboundMessage {
        id: id.to_string(),
        sender: "user-1".to_string(),
        conversation: ConversationId::new(conversation),
        body: Some(MessageBody {
            text: Some(text.to_string()),
        }),
        from_self: false,
    }
}

/// Create a credential store mock with nothing persisted that accepts every save.
#[must_use]
pub fn mock_store_empty() -> MockCredentialStore {
    let mut mock = MockCredentialStore::new();
    mock.expect_load().returning(|| Ok(None));
    mock.expect_save().returning(|_| Ok(()));
    mock
}
