mod conversation_service;
mod notification_service;

pub use conversation_service::{
    AddMemberRequest, ConversationCreated, ConversationService, ConversationServiceDependencies,
    ConversationSummary, CreateConversationRequest, MarkReadOutcome, MemberStatus,
    RemoveMemberRequest, SendMessageRequest, UpdateConversationRequest,
};
pub use notification_service::NotificationService;
