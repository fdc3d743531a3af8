//! # Router
//!
//! Joins event streams against the newest known state.
//!
//! - New items are matched against the latest subscription set; every
//!   subscription whose filter occurs in the item's blurb gets one alert.
//! - Search requests are answered from the latest catalog snapshot.
//!
//! Both joins read a [`LatestCell`]. Until the cell holds a value, new items are
//! dropped (not buffered) and searches get a "not loaded yet" reply.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;

use futures_util::stream::{self, Stream, StreamExt};

use crate::core::commands::SearchRequest;
use crate::core::hub::LatestCell;
use crate::core::model::{CatalogSnapshot, ChatId, Item, OutboundMessage, SubscriptionSet};

/// Default cap on the item listing of a search reply, in characters.
pub const SEARCH_LISTING_CAP: usize = 3500;

/// Static routing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Prefix joined with an item's URL path in alerts.
    pub item_url_base: String,
    /// Maximum characters of the item listing in a search reply.
    pub search_listing_cap: usize,
}

impl RouterConfig {
    /// Settings with the default listing cap.
    pub fn new(item_url_base: impl Into<String>) -> Self {
        Self {
            item_url_base: item_url_base.into(),
            search_listing_cap: SEARCH_LISTING_CAP,
        }
    }
}

/// # Router
///
/// Cheap to clone; clones share the latest-value cells.
#[derive(Debug, Clone)]
pub struct Router {
    config: Arc<RouterConfig>,
    subscriptions: LatestCell<Arc<SubscriptionSet>>,
    catalog: LatestCell<CatalogSnapshot>,
}

impl Router {
    /// A router reading the given cells.
    pub fn new(
        config: RouterConfig,
        subscriptions: LatestCell<Arc<SubscriptionSet>>,
        catalog: LatestCell<CatalogSnapshot>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            subscriptions,
            catalog,
        }
    }

    /// Alerts for one newly-appeared item, one per matching subscription.
    pub fn alerts_for(&self, item: &Item) -> Vec<OutboundMessage> {
        let Some(subscriptions) = self.subscriptions.get() else {
            tracing::debug!(key = %item.key, "No subscription state yet, item dropped");
            return Vec::new();
        };

        let blurb = item.blurb();
        let text = format!("New outlet item! {blurb}. {}", item.url(&self.config.item_url_base));
        let alerts: Vec<OutboundMessage> = subscriptions
            .iter()
            .filter(|sub| sub.filter.matches(&blurb))
            .filter_map(|sub| message(sub.chat_id, text.clone()))
            .collect();

        tracing::info!(key = %item.key, alerts = alerts.len(), "New item routed");
        alerts
    }

    /// The reply to one search request.
    pub fn search_reply(&self, request: &SearchRequest) -> Option<OutboundMessage> {
        let query = request.query.trim();
        if query.is_empty() {
            return message(request.chat_id, "Usage: /search <text>");
        }
        let Some(catalog) = self.catalog.get() else {
            return message(request.chat_id, "The catalog has not been loaded yet, please try again shortly.");
        };

        let needle = query.to_lowercase();
        let mut hits: Vec<&Item> = catalog
            .iter()
            .filter(|item| item.title.to_lowercase().contains(&needle))
            .collect();
        hits.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.key.cmp(&b.key)));

        let listing: String = hits
            .iter()
            .map(|item| format!("* {}", item.blurb()))
            .collect::<Vec<_>>()
            .join("\n")
            .chars()
            .take(self.config.search_listing_cap)
            .collect();

        tracing::info!(chat_id = %request.chat_id, query, hits = hits.len(), "Search answered");
        let text = if listing.is_empty() {
            format!("Found {} matching items.", hits.len())
        } else {
            format!("Found {} matching items.\n{listing}", hits.len())
        };
        message(request.chat_id, text)
    }

    /// Stream form of [`alerts_for`](Self::alerts_for).
    pub fn alerts<S>(&self, items: S) -> impl Stream<Item = OutboundMessage> + Send + 'static
    where
        S: Stream<Item = Item> + Send + 'static,
    {
        let router = self.clone();
        items.flat_map(move |item| stream::iter(router.alerts_for(&item)))
    }

    /// Stream form of [`search_reply`](Self::search_reply).
    pub fn replies<S>(&self, searches: S) -> impl Stream<Item = OutboundMessage> + Send + 'static
    where
        S: Stream<Item = SearchRequest> + Send + 'static,
    {
        let router = self.clone();
        searches.filter_map(move |request| std::future::ready(router.search_reply(&request)))
    }
}

fn message(chat_id: ChatId, text: impl Into<String>) -> Option<OutboundMessage> {
    OutboundMessage::new(chat_id, text)
        .inspect_err(|e| tracing::warn!(%chat_id, error = %e, "Message dropped"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Filter, ItemKey, Subscription};
    use std::collections::HashSet;

    const BASE: &str = "https://shop.example/p/";

    fn item(key: &str, title: &str) -> Item {
        Item {
            key: ItemKey(key.into()),
            title: title.into(),
            sales_price: Some("1 000,-".into()),
            list_price: Some("2 000,-".into()),
            discount_text: Some("-50%".into()),
            location: Some("Oslo".into()),
            url_path: Some(format!("{key}-path")),
        }
    }

    fn subs(pairs: &[(i64, &str)]) -> Arc<SubscriptionSet> {
        Arc::new(
            pairs
                .iter()
                .map(|(chat, f)| Subscription { chat_id: ChatId(*chat), filter: Filter::parse(f).unwrap() })
                .collect(),
        )
    }

    fn router() -> (Router, LatestCell<Arc<SubscriptionSet>>, LatestCell<CatalogSnapshot>) {
        let subscriptions = LatestCell::new();
        let catalog = LatestCell::new();
        let router = Router::new(RouterConfig::new(BASE), subscriptions.clone(), catalog.clone());
        (router, subscriptions, catalog)
    }

    #[test]
    fn matching_item_produces_one_alert_per_subscription() {
        let (router, subscriptions, _) = router();
        subscriptions.set(subs(&[(1, "sofa")]));

        let alerts = router.alerts_for(&item("7", "Grey Sofa"));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].chat_id(), ChatId(1));
        assert_eq!(
            alerts[0].text(),
            "New outlet item! Grey Sofa - 1 000,- - -50% - Oslo. https://shop.example/p/7-path"
        );

        assert!(router.alerts_for(&item("8", "Lamp")).is_empty());
    }

    #[test]
    fn several_chats_and_location_matches() {
        let (router, subscriptions, _) = router();
        subscriptions.set(subs(&[(1, "sofa"), (2, "SOFA"), (3, "oslo"), (4, "chair")]));

        let mut chats: Vec<i64> = router.alerts_for(&item("7", "Grey Sofa")).iter().map(|m| m.chat_id().0).collect();
        chats.sort();
        assert_eq!(chats, vec![1, 2, 3]);
    }

    #[test]
    fn items_before_any_subscription_state_are_dropped() {
        let (router, subscriptions, _) = router();
        assert!(router.alerts_for(&item("7", "Grey Sofa")).is_empty());

        // Later subscriptions do not resurrect earlier items.
        subscriptions.set(subs(&[(1, "sofa")]));
        assert_eq!(router.alerts_for(&item("8", "Red Sofa")).len(), 1);
    }

    #[test]
    fn search_lists_title_matches() {
        let (router, _, catalog) = router();
        catalog.set(Arc::new(HashSet::from([item("1", "Grey Sofa"), item("2", "Lamp"), item("3", "Sofa Bed")])));

        let reply = router
            .search_reply(&SearchRequest { chat_id: ChatId(5), query: "sofa".into() })
            .unwrap();
        assert_eq!(
            reply.text(),
            "Found 2 matching items.\n* Grey Sofa - 1 000,- - -50% - Oslo\n* Sofa Bed - 1 000,- - -50% - Oslo"
        );
    }

    #[test]
    fn search_listing_is_capped() {
        let (router, _, catalog) = router();
        let many: HashSet<Item> = (0..500).map(|n| item(&n.to_string(), &format!("Sofa {n:03}"))).collect();
        catalog.set(Arc::new(many));

        let reply = router
            .search_reply(&SearchRequest { chat_id: ChatId(5), query: "sofa".into() })
            .unwrap();
        let (header, listing) = reply.text().split_once('\n').unwrap();
        assert_eq!(header, "Found 500 matching items.");
        assert_eq!(listing.chars().count(), SEARCH_LISTING_CAP);
    }

    #[test]
    fn search_cold_start_and_usage_replies() {
        let (router, _, _) = router();
        let cold = router.search_reply(&SearchRequest { chat_id: ChatId(5), query: "sofa".into() }).unwrap();
        assert!(cold.text().contains("not been loaded"));

        let usage = router.search_reply(&SearchRequest { chat_id: ChatId(5), query: "  ".into() }).unwrap();
        assert_eq!(usage.text(), "Usage: /search <text>");
    }

    #[test]
    fn search_without_hits_has_no_listing() {
        let (router, _, catalog) = router();
        catalog.set(Arc::new(HashSet::from([item("1", "Lamp")])));
        let reply = router.search_reply(&SearchRequest { chat_id: ChatId(5), query: "sofa".into() }).unwrap();
        assert_eq!(reply.text(), "Found 0 matching items.");
    }
}
