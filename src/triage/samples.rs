//! Built-in sample messages for `support-console score --samples`.

pub const SAMPLE_MESSAGES: &[&str] = &[
    "When will my loan be disbursed? I need it urgently!",
    "What's the status of my loan approval?",
    "How to update my account information?",
    "I need to know about the approval process for my loan application.",
    "This is an emergency! I need help immediately!",
    "Can you tell me when I'll receive my funds?",
    "How do I change my email address?",
    "I'm asking about the timeline for disbursement.",
    "Just a general question about your services.",
    "URGENT: My loan disbursement is delayed!",
];
