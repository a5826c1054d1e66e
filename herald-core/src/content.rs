//! Media asset resolution for a content item.
//!
//! [`ContentResolver`] asks the data API for one post and returns the
//! playable media attached to it. Posts and assets are GraphQL unions
//! discriminated by `__typename`; only complete posts carry assets, and
//! only the structured media asset variant is kept.

use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

use crate::api::{ApiClient, ContentError};
use crate::auth::SessionProvider;

const GET_POST_ASSETS_OPERATION: &str = "GetPostDetailPageQuery";

const GET_POST_ASSETS_QUERY: &str = r#"
query GetPostDetailPageQuery($id: ID!) {
  post(id: $id) {
    __typename
    id
    ... on CompleteContentPost {
      title
      assets {
        __typename
        ... on PostGjirafaAsset {
          gjirafaId
          thumbnailUrl
          hasVideo
          audioStaticUrl
          audioStreamUrl
          videoStreamUrl
        }
      }
    }
    ... on PreviewContentPost {
      title
    }
  }
}
"#;

/// A playable media asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    /// Provider-side media identifier.
    #[serde(
        rename = "gjirafaId",
        alias = "id",
        default,
        deserialize_with = "null_as_default"
    )]
    pub id: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub has_video: bool,

    #[serde(default)]
    pub video_stream_url: Option<String>,

    #[serde(default)]
    pub audio_static_url: Option<String>,

    #[serde(default)]
    pub audio_stream_url: Option<String>,

    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// Read an explicit `null` as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct PostData {
    #[serde(default)]
    post: Option<ContentItem>,
}

/// A post as returned by the data API.
#[derive(Debug, Deserialize)]
#[serde(tag = "__typename")]
enum ContentItem {
    #[serde(rename = "CompleteContentPost")]
    Complete {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        assets: Option<Vec<AssetNode>>,
    },

    #[serde(rename = "PreviewContentPost")]
    Preview {
        #[serde(default)]
        title: Option<String>,
    },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "__typename")]
enum AssetNode {
    #[serde(rename = "PostGjirafaAsset")]
    Media(Asset),

    #[serde(other)]
    Other,
}

/// Resolves content ids to media assets.
pub struct ContentResolver {
    api: Arc<ApiClient>,
    sessions: Arc<dyn SessionProvider>,
}

impl ContentResolver {
    /// Create a resolver sharing the client and session source.
    pub fn new(api: Arc<ApiClient>, sessions: Arc<dyn SessionProvider>) -> Self {
        Self { api, sessions }
    }

    /// Resolve the media assets of a content item.
    ///
    /// An empty list is a valid answer. A preview-only post fails with
    /// [`ContentError::Unavailable`].
    pub async fn resolve_assets(
        &self,
        content_id: &str,
        secret: &str,
    ) -> Result<Vec<Asset>, ContentError> {
        self.resolve_assets_with_session(content_id, secret, None)
            .await
    }

    /// Like [`resolve_assets`](Self::resolve_assets), offering a session
    /// token the caller already holds.
    pub async fn resolve_assets_with_session(
        &self,
        content_id: &str,
        secret: &str,
        last_known: Option<&str>,
    ) -> Result<Vec<Asset>, ContentError> {
        let session = self.sessions.session_token(secret, last_known).await?;

        let result = self.fetch_assets(content_id, session.expose()).await;
        invalidate_on_rejection(self.sessions.as_ref(), secret, result)
    }

    async fn fetch_assets(
        &self,
        content_id: &str,
        session: &str,
    ) -> Result<Vec<Asset>, ContentError> {
        let data: Option<PostData> = self
            .api
            .graphql(
                session,
                GET_POST_ASSETS_OPERATION,
                GET_POST_ASSETS_QUERY,
                serde_json::json!({ "id": content_id }),
            )
            .await?
            .into_data()?;

        match data.and_then(|d| d.post) {
            Some(ContentItem::Complete { title, assets }) => {
                let assets: Vec<Asset> = assets
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|node| match node {
                        AssetNode::Media(asset) => Some(asset),
                        AssetNode::Other => None,
                    })
                    .collect();
                tracing::debug!(
                    "Resolved {} asset(s) for {:?}",
                    assets.len(),
                    title.as_deref().unwrap_or(content_id)
                );
                Ok(assets)
            }
            Some(ContentItem::Preview { title }) => {
                tracing::info!(
                    "{:?} is preview-only for this subscription",
                    title.as_deref().unwrap_or(content_id)
                );
                Err(ContentError::Unavailable {
                    content_id: content_id.to_string(),
                })
            }
            Some(ContentItem::Unknown) | None => Ok(Vec::new()),
        }
    }
}

/// Drop the cached session for `secret` when `result` says the provider
/// rejected it.
pub(crate) fn invalidate_on_rejection<T>(
    sessions: &dyn SessionProvider,
    secret: &str,
    result: Result<T, ContentError>,
) -> Result<T, ContentError> {
    if let Err(e) = &result {
        if e.invalidates_session() {
            tracing::warn!("Dropping cached session token after: {}", e);
            sessions.invalidate(secret);
        }
    }
    result
}
