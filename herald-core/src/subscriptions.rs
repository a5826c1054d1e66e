//! Active subscriptions of the signed-in user.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::{ApiClient, ContentError};
use crate::auth::SessionProvider;
use crate::claims::subject_of;
use crate::content::invalidate_on_rejection;

const GET_SUBSCRIPTIONS_OPERATION: &str = "GetMySubscriptions";

const GET_SUBSCRIPTIONS_QUERY: &str = r#"
query GetMySubscriptions($userId: ID!) {
  subscriptions(userId: $userId, first: 50, filter: { expired: false }) {
    nodes {
      creator {
        id
        name
        path
        image { url }
      }
    }
  }
}
"#;

/// A creator the user is subscribed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub id: String,
    pub name: String,
    /// Creator path on the provider's site.
    pub slug: String,
    /// Avatar URL, empty when the creator has none.
    pub image: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionsData {
    #[serde(default)]
    subscriptions: Option<SubscriptionConnection>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionConnection {
    #[serde(default)]
    nodes: Vec<SubscriptionNode>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionNode {
    #[serde(default)]
    creator: Option<Creator>,
}

#[derive(Debug, Deserialize)]
struct Creator {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    image: Option<CreatorImage>,
}

#[derive(Debug, Deserialize)]
struct CreatorImage {
    #[serde(default)]
    url: Option<String>,
}

impl Creator {
    fn into_subscription(self) -> Option<Subscription> {
        let name = self.name.filter(|n| !n.is_empty())?;
        Some(Subscription {
            id: self.id.unwrap_or_default(),
            name,
            slug: self.path.unwrap_or_default(),
            image: self.image.and_then(|i| i.url).unwrap_or_default(),
        })
    }
}

/// Lists a user's active subscriptions.
pub struct SubscriptionResolver {
    api: Arc<ApiClient>,
    sessions: Arc<dyn SessionProvider>,
}

impl SubscriptionResolver {
    pub fn new(api: Arc<ApiClient>, sessions: Arc<dyn SessionProvider>) -> Self {
        Self { api, sessions }
    }

    /// List up to 50 non-expired subscriptions.
    ///
    /// The user id comes from the `sub` claim of the session token.
    /// Creators without a display name are skipped.
    pub async fn list_subscriptions(&self, secret: &str) -> Result<Vec<Subscription>, ContentError> {
        let session = self.sessions.session_token(secret, None).await?;
        let user_id = subject_of(session.expose()).ok_or(ContentError::MissingSubject)?;

        let result = self.fetch(session.expose(), &user_id).await;
        invalidate_on_rejection(self.sessions.as_ref(), secret, result)
    }

    async fn fetch(&self, session: &str, user_id: &str) -> Result<Vec<Subscription>, ContentError> {
        let data: Option<SubscriptionsData> = self
            .api
            .graphql(
                session,
                GET_SUBSCRIPTIONS_OPERATION,
                GET_SUBSCRIPTIONS_QUERY,
                serde_json::json!({ "userId": user_id }),
            )
            .await?
            .into_data()?;

        let subscriptions: Vec<Subscription> = data
            .and_then(|d| d.subscriptions)
            .map(|c| c.nodes)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|node| node.creator?.into_subscription())
            .collect();

        tracing::debug!("Found {} active subscription(s)", subscriptions.len());
        Ok(subscriptions)
    }
}
