//! Entry point for chat front ends.
//!
//! A chat bot hands over the sender and command text; who may run commands is
//! decided by an injected [`Authorizer`], so the router itself never deals
//! with user identities.

use super::CommandRouter;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Decides whether a chat user may issue commands.
pub type Authorizer = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeReply {
    Unauthorized,
    Completed,
    Failed,
}

impl fmt::Display for BridgeReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BridgeReply::Unauthorized => "Only admins can execute that command.",
            BridgeReply::Completed => "Done!",
            BridgeReply::Failed => "Something went wrong, check the manager log.",
        };
        f.write_str(text)
    }
}

#[derive(Clone)]
pub struct ChatBridge {
    router: CommandRouter,
    authorize: Authorizer,
    shutdown: CancellationToken,
}

impl ChatBridge {
    /// `shutdown` is the manager's quit token.
    pub fn new(router: CommandRouter, authorize: Authorizer, shutdown: CancellationToken) -> Self {
        Self {
            router,
            authorize,
            shutdown,
        }
    }

    /// Allow only the listed user names.
    pub fn allow_list<I, S>(users: I) -> Authorizer
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let users: Vec<String> = users.into_iter().map(Into::into).collect();
        Arc::new(move |user: &str| users.iter().any(|u| u == user))
    }

    pub async fn submit(&self, user: &str, command: &str) -> BridgeReply {
        if !(self.authorize)(user) {
            warn!(user, "Rejected chat command \"{}\"", command);
            return BridgeReply::Unauthorized;
        }

        info!(user, "Chat command \"{}\"", command);
        if self.router.handle(command).await {
            BridgeReply::Completed
        } else {
            BridgeReply::Failed
        }
    }

    /// Resolves once the manager quits; the bot should disconnect then.
    pub async fn disconnected(&self) {
        self.shutdown.cancelled().await
    }
}
