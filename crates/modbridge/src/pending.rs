//! Pending items as extracted from upstream listing pages, and the
//! pagination driver shared by both platforms.

use crate::error::BridgeResult;
use std::collections::HashSet;
use std::future::Future;

/// An item waiting in an upstream moderation queue.
pub trait PendingItem {
    /// Platform-native id (`acrid` on the wiki, post id on the forum).
    fn native_id(&self) -> u64;

    /// Link back to the item on its platform.
    fn source_ref(&self) -> &str;
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct ListingPage<T> {
    pub items: Vec<T>,
    pub next_page: Option<String>,
}

impl<T> ListingPage<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page: None,
        }
    }
}

/// Follow `next_page` cursors from `first_url` until the listing is
/// exhausted. A cursor that points back at an already-visited page ends
/// the walk.
pub async fn collect_pages<T, F, Fut>(first_url: String, mut fetch: F) -> BridgeResult<Vec<T>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = BridgeResult<ListingPage<T>>>,
{
    let mut items = Vec::new();
    let mut visited = HashSet::new();
    let mut next = Some(first_url);

    while let Some(url) = next.take() {
        if !visited.insert(url.clone()) {
            tracing::warn!("pagination loop detected at {url}, stopping");
            break;
        }
        let page = fetch(url).await?;
        items.extend(page.items);
        next = page.next_page;
    }

    Ok(items)
}

/// Native ids of a batch of pending items.
pub fn native_ids<T: PendingItem>(items: &[T]) -> HashSet<u64> {
    items.iter().map(PendingItem::native_id).collect()
}
