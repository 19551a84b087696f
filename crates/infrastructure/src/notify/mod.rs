mod email;
mod webhook;

pub use email::SmtpEmailNotifier;
pub use webhook::WebhookChatNotifier;
